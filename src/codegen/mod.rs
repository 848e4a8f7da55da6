//! Emits the substitute units, the interception table and rewritten sources.
//!
//! Output layout under `<out>/src/`:
//!
//! ```text
//! mod.rs              declares every unit
//! intercepts.rs       InterceptsLocation, LOCATIONS, lookup()
//! <ns>_<type>.rs      one substitute per distinct (function, arguments)
//! ```

pub mod intercepts;
pub mod render;
pub mod rewrite;
pub mod rustfmt;
pub mod substitute;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use tracing::{debug, error, info};

use crate::analysis::location::SourceLocation;
use crate::config::GeneratorConfig;
use crate::diagnostics::{DiagnosticBag, DiagnosticId};
use crate::pipeline::CancellationToken;
use crate::resolve::ExecutionRequest;
use crate::response::Resolution;
use crate::version::VERSION;
use intercepts::{InterceptRow, intercepts_module};
use rewrite::Replacement;
use substitute::{SubstituteBody, substitute_item, substitute_name, unit_name};

pub const INTERCEPTS_UNIT: &str = "intercepts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutePlan {
    pub name: String,
    /// Qualified name of the precomputed function.
    pub function: String,
    pub sites: Vec<SourceLocation>,
    /// The substitute panics with a build-time error.
    pub panics: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPlan {
    pub name: String,
    pub declaring_type: String,
    pub substitutes: Vec<SubstitutePlan>,
}

/// Everything the generator wrote for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationPlan {
    pub units: Vec<UnitPlan>,
    pub files: Vec<PathBuf>,
}

impl GenerationPlan {
    pub fn substitute_count(&self) -> usize {
        self.units.iter().map(|unit| unit.substitutes.len()).sum()
    }

    pub fn intercepted_sites(&self) -> usize {
        self.substitutes().map(|(_, sub)| sub.sites.len()).sum()
    }

    pub fn substitutes(&self) -> impl Iterator<Item = (&UnitPlan, &SubstitutePlan)> {
        self.units
            .iter()
            .flat_map(|unit| unit.substitutes.iter().map(move |sub| (unit, sub)))
    }

    /// Source replacements redirecting every intercepted call into `module`.
    pub fn replacements(&self, module: &str) -> Vec<Replacement> {
        self.substitutes()
            .flat_map(|(unit, sub)| {
                sub.sites.iter().map(move |site| Replacement {
                    file: site.file.clone(),
                    span: site.span,
                    text: format!("{module}::{}::{}()", unit.name, sub.name),
                })
            })
            .collect()
    }

    fn intercept_rows(&self) -> Vec<InterceptRow> {
        self.substitutes()
            .flat_map(|(unit, sub)| {
                sub.sites.iter().map(move |site| InterceptRow {
                    location: site.clone(),
                    substitute: format!("{}::{}", unit.name, sub.name),
                })
            })
            .collect()
    }
}

struct UnitBuilder {
    declaring_type: String,
    items: Vec<TokenStream>,
    substitutes: Vec<SubstitutePlan>,
}

pub struct CodeGenerator {
    config: Arc<GeneratorConfig>,
}

impl CodeGenerator {
    pub fn new(config: Arc<GeneratorConfig>) -> Self {
        Self { config }
    }

    /// Removes previously generated units.
    pub fn clean(&self) -> Result<()> {
        let dir = self.config.generated_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn generate(
        &self,
        resolved: &[(&ExecutionRequest, &Resolution)],
        diagnostics: &mut DiagnosticBag,
        cancel: &CancellationToken,
    ) -> Result<GenerationPlan> {
        let mut units: BTreeMap<String, UnitBuilder> = BTreeMap::new();
        for (request, resolution) in resolved {
            let function = &request.function;
            let body = match resolution {
                Resolution::Value(text) => SubstituteBody::Value(text),
                Resolution::Failure(message) => SubstituteBody::Panic(message),
                Resolution::TimedOut => {
                    debug!(key = %request.dedup_key, "timed out, call sites left unchanged");
                    continue;
                }
                Resolution::Missing => {
                    error!(key = %request.dedup_key, "no response, dropped from generation");
                    continue;
                }
            };

            let name = substitute_name(function, &request.cache_key);
            let item = match substitute_item(request, &name, body) {
                Ok(item) => item,
                Err(err) => {
                    error!(key = %request.dedup_key, "{err}");
                    for invocation in &request.invocations {
                        diagnostics.report(
                            DiagnosticId::ExecutionFailed,
                            Some(invocation.location.clone()),
                            [function.qualified_name(), err.to_string()],
                        );
                    }
                    continue;
                }
            };

            let unit = units
                .entry(unit_name(function))
                .or_insert_with(|| UnitBuilder {
                    declaring_type: function.qualified_type(),
                    items: Vec::new(),
                    substitutes: Vec::new(),
                });
            unit.items.push(item);
            unit.substitutes.push(SubstitutePlan {
                name,
                function: function.qualified_name(),
                sites: request
                    .invocations
                    .iter()
                    .map(|invocation| invocation.location.clone())
                    .collect(),
                panics: matches!(body, SubstituteBody::Panic(_)),
            });
        }

        cancel.check()?;
        self.clean()?;
        let dir = self.config.generated_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut plan = GenerationPlan::default();
        for (name, unit) in units {
            let items = &unit.items;
            let tokens = quote! {
                #![allow(clippy::all, unused)]
                #(#items)*
            };
            let header = format!(
                "// @generated by precomp {VERSION} for `{}`. Do not edit.\n",
                unit.declaring_type
            );
            plan.files
                .push(self.write_unit(&format!("{name}.rs"), &header, &tokens)?);
            plan.units.push(UnitPlan {
                name,
                declaring_type: unit.declaring_type,
                substitutes: unit.substitutes,
            });
        }

        let header = format!("// @generated by precomp {VERSION}. Do not edit.\n");
        let table = intercepts_module(&plan.intercept_rows());
        plan.files
            .push(self.write_unit(&format!("{INTERCEPTS_UNIT}.rs"), &header, &table)?);

        let modules = std::iter::once(INTERCEPTS_UNIT.to_string())
            .chain(plan.units.iter().map(|unit| unit.name.clone()))
            .map(|name| format_ident!("{}", name));
        let root = quote!(#(pub mod #modules;)*);
        plan.files.push(self.write_unit("mod.rs", &header, &root)?);

        info!(
            units = plan.units.len(),
            substitutes = plan.substitute_count(),
            sites = plan.intercepted_sites(),
            "generated substitutes"
        );
        Ok(plan)
    }

    fn write_unit(&self, file_name: &str, header: &str, tokens: &TokenStream) -> Result<PathBuf> {
        let body = rustfmt::maybe_rustfmt(tokens, self.config.format_output, &self.config.edition);
        let path = self.config.generated_dir().join(file_name);
        fs::write(&path, format!("{header}{body}"))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
