use std::fs;
use std::path::Path;

use anyhow::Result;
use precomp::analysis::Analyzer;
use precomp::diagnostics::DiagnosticId;
use precomp::resolve::deduplicate;
use precomp::{CancellationToken, GeneratorConfig};

const TABLE: &str = r#"
use crate::helpers::Scale;

pub struct Table;

impl Table {
    #[precompute(timeout_ms = 250)]
    pub fn area(side: u32) -> u64 {
        u64::from(side) * u64::from(side)
    }

    #[precompute]
    pub fn label(name: &str) -> String {
        format!("table {name}")
    }

    #[precompute]
    pub fn generic<T: Default>() -> u32 {
        0
    }

    #[precompute]
    pub fn scaled(&self) -> u32 {
        1
    }
}
"#;

const MAIN: &str = r#"
mod geometry;

fn main() {
    let a = geometry::table::Table::area(3);
    let b = crate::geometry::table::Table::area(3);
    let c = geometry::table::Table::area(4);
    let n = 5;
    let d = geometry::table::Table::area(n);
    let e = geometry::table::Table::label("kitchen");
    println!("{a} {b} {c} {d} {e}");
}
"#;

fn write(root: &Path, relative: &str, text: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

#[test]
fn calls_resolve_across_modules() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "src/main.rs", MAIN)?;
    write(dir.path(), "src/geometry/table.rs", TABLE)?;
    write(dir.path(), "src/broken.rs", "fn oops( {")?;

    let config = GeneratorConfig::new(dir.path(), dir.path().join("out"));
    let files = config.source_files()?;
    assert_eq!(files.len(), 3);

    let analyzer = Analyzer::new(dir.path(), config.function_defaults());
    let analysis = analyzer.analyze(&files, &CancellationToken::new())?;

    let names = analysis
        .functions
        .iter()
        .map(|function| function.qualified_name())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["geometry::table::Table::area", "geometry::table::Table::label"]
    );
    assert_eq!(analysis.functions[0].config.timeout_ms, 250);

    let ids = analysis
        .diagnostics
        .iter()
        .map(|diag| diag.id)
        .collect::<Vec<_>>();
    assert!(ids.contains(&DiagnosticId::ParseFailure));
    assert!(ids.contains(&DiagnosticId::GenericFunction));
    assert!(ids.contains(&DiagnosticId::NonStaticFunction));
    assert!(ids.contains(&DiagnosticId::NonLiteralArguments));

    assert_eq!(analysis.invocations.len(), 4);
    let requests = deduplicate(&analysis.invocations);
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].invocations.len(), 2);
    assert_eq!(requests[0].arguments[0].text, "3");
    assert_eq!(requests[2].arguments[0].text, "\"kitchen\"");
    Ok(())
}

#[test]
fn declaring_source_drops_crate_imports() -> Result<()> {
    let config = GeneratorConfig::new("/work/app", "/work/app/out");
    let analyzer = Analyzer::new("/work/app", config.function_defaults());
    let analysis = analyzer.analyze_sources(&[("src/geometry/table.rs", TABLE)]);
    let source = &analysis.functions[0].declaring_source;
    assert!(!source.contains("helpers"));
    assert!(!source.contains("precompute"));
    assert!(source.contains("pub fn area"));
    Ok(())
}

#[test]
fn cancelled_analysis_stops_early() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "src/main.rs", MAIN)?;
    let config = GeneratorConfig::new(dir.path(), dir.path().join("out"));
    let token = CancellationToken::new();
    token.cancel();
    let analyzer = Analyzer::new(dir.path(), config.function_defaults());
    assert!(analyzer.analyze(&config.source_files()?, &token).is_err());
    Ok(())
}
