use std::fs;
use std::sync::Arc;

use anyhow::Result;
use precomp::analysis::{AnalysisResult, Analyzer};
use precomp::codegen::CodeGenerator;
use precomp::codegen::rewrite::write_rewritten;
use precomp::diagnostics::{DiagnosticBag, DiagnosticId};
use precomp::resolve::{ExecutionRequest, deduplicate};
use precomp::response::Resolution;
use precomp::{CancellationToken, GeneratorConfig};

const SOURCE: &str = r#"
pub struct Lookup;

impl Lookup {
    #[precompute]
    pub fn squares(n: usize) -> Vec<u64> {
        (0..n as u64).map(|i| i * i).collect()
    }

    #[precompute]
    pub fn name(id: u8) -> Option<String> {
        Some(format!("item-{id}"))
    }

    #[precompute]
    pub async fn ready(flag: bool) -> bool {
        flag
    }

    #[precompute]
    pub fn broken(x: i32) -> i32 {
        x / 0
    }
}

pub fn use_them() {
    let squares = Lookup::squares(4);
    let again = Lookup::squares(4);
    let name = Lookup::name(7);
    let ready = Lookup::ready(true);
    let broken = Lookup::broken(1);
    let slow = Lookup::name(9);
}
"#;

fn analyze(config: &GeneratorConfig) -> AnalysisResult {
    Analyzer::new(config.project_dir.clone(), config.function_defaults())
        .analyze_sources(&[("src/table.rs", SOURCE)])
}

fn resolutions(requests: &[ExecutionRequest]) -> Vec<Resolution> {
    requests
        .iter()
        .map(|request| match (request.function.name.as_str(), request.arguments[0].text.as_str()) {
            ("squares", _) => Resolution::Value("[0, 1, 4, 9]".into()),
            ("name", "7u8") | ("name", "7") => Resolution::Value("Some(\"item-7\")".into()),
            ("name", _) => Resolution::TimedOut,
            ("ready", _) => Resolution::Value("true".into()),
            ("broken", _) => Resolution::Failure("PANIC: attempt to divide by zero".into()),
            _ => Resolution::Missing,
        })
        .collect()
}

fn config(dir: &std::path::Path) -> GeneratorConfig {
    let mut config = GeneratorConfig::new(dir, dir.join("out"));
    config.format_output = false;
    config
}

#[test]
fn units_hold_one_substitute_per_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    let analysis = analyze(&config);
    let requests = deduplicate(&analysis.invocations);
    assert_eq!(requests.len(), 5);
    let resolutions = resolutions(&requests);
    let resolved = requests.iter().zip(&resolutions).collect::<Vec<_>>();

    let mut diagnostics = DiagnosticBag::new();
    let generator = CodeGenerator::new(Arc::new(config.clone()));
    let plan = generator.generate(&resolved, &mut diagnostics, &CancellationToken::new())?;

    assert_eq!(plan.units.len(), 1);
    assert_eq!(plan.units[0].name, "table_lookup");
    assert_eq!(plan.substitute_count(), 4);
    assert_eq!(plan.intercepted_sites(), 5);
    assert!(diagnostics.is_empty());

    let unit = fs::read_to_string(config.generated_dir().join("table_lookup.rs"))?;
    assert!(unit.starts_with("// @generated by precomp"));
    syn::parse_file(&unit)?;
    assert!(unit.contains("intercepts_location"));
    assert!(unit.contains("vec !"));
    assert!(unit.contains("attempt to divide by zero"));
    assert!(unit.contains("ready"));

    let root = fs::read_to_string(config.generated_dir().join("mod.rs"))?;
    assert!(root.contains("pub mod intercepts"));
    assert!(root.contains("pub mod table_lookup"));

    let table = fs::read_to_string(config.generated_dir().join("intercepts.rs"))?;
    syn::parse_file(&table)?;
    assert_eq!(table.matches("\"table_lookup::").count(), 5);
    Ok(())
}

#[test]
fn unrenderable_values_become_execution_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    let analysis = analyze(&config);
    let requests = deduplicate(&analysis.invocations);
    let bad = requests
        .iter()
        .filter(|request| request.function.name == "squares")
        .collect::<Vec<_>>();
    let resolution = Resolution::Value("not a list".into());
    let resolved = bad.iter().map(|request| (*request, &resolution)).collect::<Vec<_>>();

    let mut diagnostics = DiagnosticBag::new();
    let plan = CodeGenerator::new(Arc::new(config))
        .generate(&resolved, &mut diagnostics, &CancellationToken::new())?;
    assert_eq!(plan.substitute_count(), 0);
    assert_eq!(diagnostics.count(DiagnosticId::ExecutionFailed), 2);
    Ok(())
}

#[test]
fn rewritten_sources_call_the_substitutes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    let analysis = analyze(&config);
    let requests = deduplicate(&analysis.invocations);
    let resolutions = resolutions(&requests);
    let resolved = requests.iter().zip(&resolutions).collect::<Vec<_>>();

    let mut diagnostics = DiagnosticBag::new();
    let plan = CodeGenerator::new(Arc::new(config.clone()))
        .generate(&resolved, &mut diagnostics, &CancellationToken::new())?;
    let written = write_rewritten(
        &config.rewritten_dir(),
        &analysis.files,
        &plan.replacements(&config.substitute_module),
        &CancellationToken::new(),
    )?;
    assert_eq!(written.len(), 1);

    let text = fs::read_to_string(config.rewritten_dir().join("src/table.rs"))?;
    assert_eq!(text.matches("crate::precomp_generated::table_lookup::squares__").count(), 2);
    assert!(text.contains("Lookup::name(9)"));
    assert!(!text.contains("Lookup::name(7)"));
    assert!(text.contains("crate::precomp_generated::table_lookup::broken__"));
    syn::parse_file(&text)?;
    Ok(())
}

#[test]
fn regeneration_replaces_stale_units() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    fs::create_dir_all(config.generated_dir())?;
    fs::write(config.generated_dir().join("stale_unit.rs"), "// old")?;

    let mut diagnostics = DiagnosticBag::new();
    CodeGenerator::new(Arc::new(config.clone()))
        .generate(&[], &mut diagnostics, &CancellationToken::new())?;
    assert!(!config.generated_dir().join("stale_unit.rs").exists());
    assert!(config.generated_dir().join("intercepts.rs").exists());
    Ok(())
}

#[test]
fn types_named_like_the_intercept_table_get_their_own_unit() -> Result<()> {
    let source = r"
pub struct Intercepts;

impl Intercepts {
    #[precompute]
    pub fn one(n: u32) -> u32 {
        n
    }
}

pub fn call() -> u32 {
    Intercepts::one(1)
}
";
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());
    let analysis = Analyzer::new(config.project_dir.clone(), config.function_defaults())
        .analyze_sources(&[("src/lib.rs", source)]);
    let requests = deduplicate(&analysis.invocations);
    assert_eq!(requests.len(), 1);
    let value = Resolution::Value("1".into());
    let resolved = vec![(&requests[0], &value)];

    let mut diagnostics = DiagnosticBag::new();
    let plan = CodeGenerator::new(Arc::new(config.clone()))
        .generate(&resolved, &mut diagnostics, &CancellationToken::new())?;
    assert_eq!(plan.units[0].name, "intercepts_");

    let unit = fs::read_to_string(config.generated_dir().join("intercepts_.rs"))?;
    assert!(unit.contains("one__"));
    let table = fs::read_to_string(config.generated_dir().join("intercepts.rs"))?;
    assert!(table.contains("\"intercepts_::one__"));
    let root = fs::read_to_string(config.generated_dir().join("mod.rs"))?;
    assert_eq!(root.matches("pub mod intercepts ;").count(), 1);
    assert_eq!(root.matches("pub mod intercepts_ ;").count(), 1);
    Ok(())
}
