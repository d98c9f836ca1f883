use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relink_core::{LinkConfig, MappingTable, MemoryStore, MissPolicy, RelinkOptions, RelinkReport, Relinker};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "relink", version, about = "Rewrite references in an imported dataset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite every mapped record and write the dataset back
    Run(RunArgs),
    /// Validate a link configuration and print what it covers
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Link configuration (TOML). Built-in defaults when omitted
    #[arg(long, value_name = "PATH", env = "RELINK_CONFIG")]
    config: Option<PathBuf>,
    /// Old-to-new identifier mapping (JSON)
    #[arg(long, value_name = "PATH", env = "RELINK_MAPPING")]
    mapping: PathBuf,
    /// Imported dataset (JSON)
    #[arg(long, value_name = "PATH", env = "RELINK_DATASET")]
    dataset: PathBuf,
    /// Where to write the rewritten dataset (default: overwrite --dataset)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// What to do with identifiers missing from the mapping
    #[arg(long, value_enum, default_value_t = MissPolicyArg::Keep)]
    miss_policy: MissPolicyArg,
    /// Report what would change without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser)]
struct CheckConfigArgs {
    /// Link configuration (TOML)
    #[arg(value_name = "PATH", env = "RELINK_CONFIG")]
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MissPolicyArg {
    /// Keep the old identifier and log a warning
    Keep,
    /// Abort the pass
    Fail,
}

impl From<MissPolicyArg> for MissPolicy {
    fn from(arg: MissPolicyArg) -> Self {
        match arg {
            MissPolicyArg::Keep => MissPolicy::KeepOld,
            MissPolicyArg::Fail => MissPolicy::Fail,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let report = run(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckConfig(args) => {
            print!("{}", check_config(&args.config)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::load(path)
            .with_context(|| format!("Failed to load link configuration from {}", path.display())),
        None => Ok(LinkConfig::default()),
    }
}

fn run(args: &RunArgs) -> Result<RelinkReport> {
    let config = load_config(args.config.as_deref())?;
    let mapping = MappingTable::load(&args.mapping, args.miss_policy.into())
        .with_context(|| format!("Failed to load mapping from {}", args.mapping.display()))?;
    let store = MemoryStore::load(&args.dataset)
        .with_context(|| format!("Failed to load dataset from {}", args.dataset.display()))?;

    tracing::info!(
        "Relinking {} rows across {} mapped identifiers{}",
        store.len(),
        mapping.len(),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let report = Relinker::new(&config, &mapping, &store, &store)
        .with_options(RelinkOptions { dry_run: args.dry_run })
        .run()
        .context("Relink pass failed")?;

    if args.dry_run {
        tracing::info!("Dry run, dataset not written");
    } else {
        let output = args.output.as_deref().unwrap_or(&args.dataset);
        store
            .save(output)
            .with_context(|| format!("Failed to write dataset to {}", output.display()))?;
        tracing::info!("Wrote {}", output.display());
    }

    Ok(report)
}

fn check_config(path: &Path) -> Result<String> {
    let config = load_config(Some(path))?;
    let mut summary = String::new();
    for entity_type in config.entity_types() {
        let name = entity_type.as_str();
        summary.push_str(&format!(
            "{}: {} link fields, {} relation fields, {} structured fields\n",
            name,
            config.link_fields(name).len(),
            config.relation_fields(name).len(),
            config.document_fields(name).len()
        ));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_core::{FieldValue, RelinkError};
    use std::fs;

    const CONFIG: &str = r#"
[link_mapping.properties_with_links]
tt_content = ["bodytext"]

[[link_mapping.properties_with_relations.tt_content]]
field = "header_link"
table = "pages"
"#;

    const MAPPING: &str = r#"{"pages": {"1": 11, "7": 42}, "tt_content": {"5": 105}}"#;

    const DATASET: &str = r#"{
        "tt_content": [
            {"uid": 105, "bodytext": "<a href=\"t3://page?uid=1\">home</a>", "header_link": "7"}
        ]
    }"#;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(dataset: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("relink.toml"), CONFIG).unwrap();
            fs::write(dir.path().join("mapping.json"), MAPPING).unwrap();
            fs::write(dir.path().join("dataset.json"), dataset).unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn args(&self) -> RunArgs {
            RunArgs {
                config: Some(self.path("relink.toml")),
                mapping: self.path("mapping.json"),
                dataset: self.path("dataset.json"),
                output: None,
                miss_policy: MissPolicyArg::Keep,
                dry_run: false,
            }
        }
    }

    // === run tests ===

    #[test]
    fn run_rewrites_dataset_in_place() {
        let fixture = Fixture::new(DATASET);
        let report = run(&fixture.args()).unwrap();
        assert_eq!(report.rows_updated, 1);

        let store = MemoryStore::load(&fixture.path("dataset.json")).unwrap();
        let row = store.row("tt_content", 105).unwrap();
        assert_eq!(
            row.get("bodytext"),
            Some(&FieldValue::from(r#"<a href="t3://page?uid=11">home</a>"#))
        );
        assert_eq!(row.get("header_link"), Some(&FieldValue::from("42")));
    }

    #[test]
    fn run_writes_to_output_when_given() {
        let fixture = Fixture::new(DATASET);
        let mut args = fixture.args();
        args.output = Some(fixture.path("out.json"));
        run(&args).unwrap();

        assert_eq!(fs::read_to_string(fixture.path("dataset.json")).unwrap(), DATASET);
        let store = MemoryStore::load(&fixture.path("out.json")).unwrap();
        assert_eq!(
            store.row("tt_content", 105).unwrap().get("header_link"),
            Some(&FieldValue::from("42"))
        );
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let fixture = Fixture::new(DATASET);
        let mut args = fixture.args();
        args.dry_run = true;
        args.output = Some(fixture.path("out.json"));

        let report = run(&args).unwrap();
        assert_eq!(report.rows_updated, 1);
        assert_eq!(fs::read_to_string(fixture.path("dataset.json")).unwrap(), DATASET);
        assert!(!fixture.path("out.json").exists());
    }

    #[test]
    fn fail_policy_surfaces_unmapped_identifier() {
        let fixture = Fixture::new(
            r#"{"tt_content": [{"uid": 105, "bodytext": "", "header_link": "99"}]}"#,
        );
        let mut args = fixture.args();
        args.miss_policy = MissPolicyArg::Fail;

        let err = run(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelinkError>(),
            Some(RelinkError::UnmappedIdentifier { old_id: 99, .. })
        ));
    }

    #[test]
    fn missing_mapping_file_names_the_path() {
        let fixture = Fixture::new(DATASET);
        let mut args = fixture.args();
        args.mapping = fixture.path("nope.json");

        let err = run(&args).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn default_config_covers_file_metadata() {
        let fixture = Fixture::new(r#"{"sys_file_metadata": [{"uid": 8, "file": 3}]}"#);
        fs::write(fixture.path("mapping.json"), r#"{"sys_file": {"3": 33}, "sys_file_metadata": {"8": 8}}"#)
            .unwrap();
        let mut args = fixture.args();
        args.config = None;

        run(&args).unwrap();
        let store = MemoryStore::load(&fixture.path("dataset.json")).unwrap();
        assert_eq!(store.row("sys_file_metadata", 8).unwrap().get("file"), Some(&FieldValue::Int(33)));
    }

    // === check-config tests ===

    #[test]
    fn check_config_summarises_entity_types() {
        let fixture = Fixture::new(DATASET);
        let summary = check_config(&fixture.path("relink.toml")).unwrap();
        assert!(summary.contains("tt_content: 1 link fields, 1 relation fields, 0 structured fields"));
        assert!(summary.contains("sys_file_metadata: 0 link fields, 1 relation fields"));
    }

    #[test]
    fn check_config_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[link_mapping]\nproperties_with_linkz = {}\n").unwrap();
        assert!(check_config(&path).is_err());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "relink",
            "run",
            "--mapping",
            "m.json",
            "--dataset",
            "d.json",
            "--miss-policy",
            "fail",
            "--dry-run",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.miss_policy, MissPolicyArg::Fail);
        assert!(args.dry_run);
        assert_eq!(args.mapping, PathBuf::from("m.json"));
    }
}
