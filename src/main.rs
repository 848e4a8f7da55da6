use precomp::cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        // Critical diagnostics have already been rendered; skip the error noise.
        if e.to_string().contains(cli::CRITICAL_DIAGNOSTICS) {
            std::process::exit(1);
        }
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use precomp::cli::{CacheAction, Command, PrecompCli, generator_config};

    #[test]
    fn generate_command_collects_repeated_flags() {
        let cli = PrecompCli::parse_from([
            "precomp",
            "generate",
            "--source",
            "src/lib.rs",
            "--source",
            "src/math/*.rs",
            "--out-dir",
            "target/precomp",
            "--timeout-behavior",
            "fail",
            "--no-rewrite",
        ]);
        match cli.command() {
            Command::Generate(args) => {
                assert_eq!(args.sources, vec!["src/lib.rs", "src/math/*.rs"]);
                assert!(args.no_rewrite);
                assert_eq!(args.timeout_behavior.as_deref(), Some("fail"));
            }
            other => panic!("expected generate command, got {other:?}"),
        }
    }

    #[test]
    fn flags_override_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let project = dir.path().to_string_lossy().into_owned();
        let cli = PrecompCli::parse_from([
            "precomp",
            "generate",
            "--project-dir",
            project.as_str(),
            "--out-dir",
            "out",
            "--timeout-ms",
            "42",
            "--disable",
        ]);
        let Command::Generate(args) = cli.command() else {
            panic!("expected generate command");
        };
        let config = generator_config(args, true)?;
        assert_eq!(config.timeout_ms, 42);
        assert!(!config.enabled);
        assert!(config.debug);
        assert_eq!(config.out_dir, std::path::PathBuf::from("out"));
        Ok(())
    }

    #[test]
    fn cache_subcommands_parse() {
        let cli = PrecompCli::parse_from(["precomp", "cache", "clear", "--project-dir", "app"]);
        assert!(matches!(
            cli.command(),
            Command::Cache {
                action: CacheAction::Clear(_)
            }
        ));
    }
}
