//! luabench - Lua exploit/mitigation benchmark
//!
//! ## Commands
//!
//! - `run`: build interpreter variants and run exploits against them
//! - `list`: show the interpreters, mitigations and exploits in the catalog
//! - `show-config`: print the effective configuration as TOML
//!
//! A run selecting exactly one (interpreter, exploit, mitigation) triple
//! exits with status 1 when the exploit succeeded, so it can gate scripts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use luabench_core::{
    render_table_md, write_report_json, BenchConfig, Catalog, MatrixReport, NO_MITIGATION,
};
use luabench_matrix::{Matrix, Selection};
use serde_json::json;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "luabench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark Lua interpreter mitigations against exploit payloads", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark matrix
    Run(RunArgs),

    /// List the catalog
    List {
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    ShowConfig(ConfigArgs),
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Working directory holding interpreters/, temp/ and exploited/
    #[arg(long, env = "LUABENCH_WORKDIR")]
    workdir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wall-clock limit per exploit run, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Number of variants processed concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Keep variant trees between runs and reuse matching builds
    #[arg(long)]
    reuse_builds: bool,

    /// Give every entry its own side-effect directory
    #[arg(long)]
    isolate_targets: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Interpreter to build (repeatable)
    #[arg(short, long = "interpreter")]
    interpreters: Vec<String>,

    /// Exploit to run (repeatable)
    #[arg(short, long = "exploit")]
    exploits: Vec<String>,

    /// Mitigation to apply (repeatable, `none` for the unpatched build;
    /// defaults to `none`)
    #[arg(short, long = "mitigation")]
    mitigations: Vec<String>,

    /// Select every interpreter in the catalog
    #[arg(long)]
    all_interpreters: bool,

    /// Select every exploit in the catalog
    #[arg(long)]
    all_exploits: bool,

    /// Select `none` plus every mitigation in the catalog
    #[arg(long)]
    all_mitigations: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    luabench_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::List { format } => {
            cmd_list(&Catalog::builtin(), format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig(args) => {
            let config = effective_config(&args)?;
            print!("{}", config.to_toml().context("render configuration")?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Layer CLI flags and `LUABENCH_WORKDIR` over the TOML file (if any) over
/// workdir defaults.
fn effective_config(args: &ConfigArgs) -> Result<BenchConfig> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::load_with_workdir(path, args.workdir.as_deref())
            .with_context(|| format!("load configuration {}", path.display()))?,
        None => BenchConfig::from_workdir(args.workdir.as_deref().unwrap_or(Path::new("."))),
    };

    if let Some(secs) = args.timeout_secs {
        config.run_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    config.reuse_builds |= args.reuse_builds;
    config.isolate_targets |= args.isolate_targets;

    if let Err(e) = config.validate() {
        bail!("invalid configuration: {}", e);
    }
    Ok(config)
}

fn build_selection(args: &RunArgs, catalog: &Catalog) -> Result<Selection> {
    let interpreters = if args.all_interpreters {
        catalog.interpreter_ids()
    } else {
        args.interpreters.clone()
    };
    let exploits = if args.all_exploits {
        catalog.exploits.ids()
    } else {
        args.exploits.clone()
    };
    let mitigations = if args.all_mitigations {
        Selection::everything(catalog).mitigations
    } else if args.mitigations.is_empty() {
        vec![NO_MITIGATION.to_string()]
    } else {
        args.mitigations.clone()
    };

    if interpreters.is_empty() {
        bail!("no interpreters selected; pass --interpreter or --all-interpreters");
    }
    if exploits.is_empty() {
        bail!("no exploits selected; pass --exploit or --all-exploits");
    }

    Ok(Selection {
        interpreters,
        exploits,
        mitigations,
    })
}

async fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let catalog = Catalog::builtin();
    let config = effective_config(&args.config)?;
    let selection = build_selection(&args, &catalog)?;
    let single = selection.triple_count() == 1;

    let matrix = Matrix::new(catalog, config).context("set up matrix")?;
    info!(
        run_id = %matrix.run_id(),
        entries = selection.triple_count(),
        jobs = matrix.config().jobs,
        "starting benchmark"
    );

    let report = matrix.run(&selection).await.context("run matrix")?;
    emit_report(&report, args.format, args.output.as_deref())?;

    if single && report.exploited_count() > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn emit_report(report: &MatrixReport, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    match (format, output) {
        (OutputFormat::Json, Some(path)) => write_report_json(path, report)?,
        (OutputFormat::Json, None) => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("serialize matrix report")?
            );
        }
        (OutputFormat::Table, Some(path)) => {
            std::fs::write(path, render_table_md(report))
                .with_context(|| format!("write {}", path.display()))?;
        }
        (OutputFormat::Table, None) => print!("{}", render_table_md(report)),
    }
    if let Some(path) = output {
        println!("Wrote report for run {} to {}", report.run_id, path.display());
    }
    Ok(())
}

fn families(families: &[luabench_core::InterpreterFamily]) -> String {
    families
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(",")
}

fn cmd_list(catalog: &Catalog, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let value = json!({
            "interpreters": catalog.interpreters(),
            "mitigations": catalog.mitigations.iter().collect::<Vec<_>>(),
            "exploits": catalog.exploits.iter().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Interpreters:");
    for interp in catalog.interpreters() {
        println!(
            "  {:<24} {:<8} {}",
            interp.id,
            interp.family.name(),
            interp.source_dir.display()
        );
    }

    println!("\nMitigations:");
    for m in catalog.mitigations.iter() {
        println!("  {:<24} {:<16} {}", m.id, families(&m.families()), m.description);
    }

    println!("\nExploits:");
    for e in catalog.exploits.iter() {
        println!("  {:<24} {:<16} {}", e.id, families(&e.families), e.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    fn run_args(args: &[&str]) -> RunArgs {
        let mut argv = vec!["luabench", "run"];
        argv.extend_from_slice(args);
        match parse(&argv).command {
            Commands::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_repeatable_flags() {
        let args = run_args(&[
            "--interpreter",
            "lua-5.4.6",
            "-i",
            "LuaJIT-rolling",
            "--exploit",
            "std_os_execute",
            "--mitigation",
            "none",
            "--mitigation",
            "stdlibrary_sandbox",
            "--jobs",
            "4",
        ]);
        assert_eq!(args.interpreters, vec!["lua-5.4.6", "LuaJIT-rolling"]);
        assert_eq!(args.mitigations, vec!["none", "stdlibrary_sandbox"]);
        assert_eq!(args.config.jobs, Some(4));
        assert_eq!(args.format, OutputFormat::Table);
    }

    #[test]
    fn test_selection_defaults_to_unpatched() {
        let catalog = Catalog::builtin();
        let args = run_args(&["-i", "lua-5.4.6", "-e", "std_os_execute"]);
        let selection = build_selection(&args, &catalog).unwrap();
        assert_eq!(selection.mitigations, vec![NO_MITIGATION]);
        assert_eq!(selection.triple_count(), 1);
    }

    #[test]
    fn test_selection_all_shortcuts() {
        let catalog = Catalog::builtin();
        let args = run_args(&["--all-interpreters", "--all-exploits", "--all-mitigations"]);
        let selection = build_selection(&args, &catalog).unwrap();
        assert_eq!(selection, Selection::everything(&catalog));
    }

    #[test]
    fn test_selection_requires_interpreter() {
        let catalog = Catalog::builtin();
        let args = run_args(&["-e", "std_os_execute"]);
        let err = build_selection(&args, &catalog).unwrap_err();
        assert!(err.to_string().contains("--interpreter"));
    }

    #[test]
    fn test_effective_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            workdir: Some(dir.path().to_path_buf()),
            timeout_secs: Some(3),
            jobs: Some(2),
            isolate_targets: true,
            ..Default::default()
        };
        let config = effective_config(&args).unwrap();
        assert_eq!(config.run_timeout_ms, 3000);
        assert_eq!(config.jobs, 2);
        assert!(config.isolate_targets);
        assert!(!config.reuse_builds);
        assert_eq!(config.temp_dir, dir.path().join("temp"));
    }

    #[test]
    fn test_effective_config_rejects_zero_jobs() {
        let args = ConfigArgs {
            jobs: Some(0),
            ..Default::default()
        };
        assert!(effective_config(&args).is_err());
    }

    #[test]
    fn test_effective_config_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luabench.toml");
        std::fs::write(&path, "workdir = \"/srv/bench\"\nrun_timeout_ms = 2500\n").unwrap();
        let args = ConfigArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = effective_config(&args).unwrap();
        assert_eq!(config.run_timeout_ms, 2500);
        assert_eq!(config.interpreters_dir, PathBuf::from("/srv/bench/interpreters"));
    }

    #[test]
    fn test_workdir_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luabench.toml");
        std::fs::write(&path, "workdir = \"/srv/bench\"\nrun_timeout_ms = 2500\n").unwrap();
        let args = ConfigArgs {
            workdir: Some(PathBuf::from("/srv/override")),
            config: Some(path),
            ..Default::default()
        };
        let config = effective_config(&args).unwrap();
        assert_eq!(config.run_timeout_ms, 2500);
        assert_eq!(config.workdir, PathBuf::from("/srv/override"));
        assert_eq!(config.interpreters_dir, PathBuf::from("/srv/override/interpreters"));
        assert_eq!(config.temp_dir, PathBuf::from("/srv/override/temp"));
    }

    #[test]
    fn test_list_json_serializes_catalog() {
        cmd_list(&Catalog::builtin(), OutputFormat::Json).unwrap();
        cmd_list(&Catalog::builtin(), OutputFormat::Table).unwrap();
    }
}
