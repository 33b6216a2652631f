use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use modindex_core::batch::{BatchOptions, resolve_mirror};
use modindex_core::config::{CONFIG_RELATIVE_PATH, IndexConfig, load_config};
use modindex_core::detect::detect_content;
use modindex_core::host::{HttpApiConfig, HttpRepositoryApi};
use modindex_core::publish::write_artifacts;
use modindex_core::reconcile::{MissPolicy, ResolveOptions};
use modindex_core::scan::{ScanOptions, SelectionStrategy};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "modindex",
    version,
    about = "Resolve mod descriptors against their upstream repositories"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Resolve every mod in the mirror and write the index artifacts")]
    Resolve(ResolveArgs),
    #[command(about = "Run metadata format detection on a local file")]
    Detect(DetectArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    #[arg(long, value_name = "PATH", help = "Mirror checkout containing mods/")]
    mirror: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Directory for out.json and out.json.gz")]
    out_dir: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Number of items resolved in parallel")]
    jobs: Option<usize>,
    #[arg(long, help = "Fail items whose repository has no recognizable metadata")]
    strict: bool,
    #[arg(long, help = "Take the first detected file instead of ranking shapes")]
    first_match: bool,
    #[arg(long, help = "Resolve and report without writing artifacts")]
    no_write: bool,
}

#[derive(Debug, Args)]
struct DetectArgs {
    file: PathBuf,
    #[arg(long, help = "Require the header delimiter on the first line of scripts")]
    require_delimiter: bool,
}

struct Runtime {
    project_root: PathBuf,
    config_path: PathBuf,
    config: IndexConfig,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Resolve(args)) => {
            let runtime = load_runtime(cli.project_root.as_deref(), cli.config.as_deref())?;
            run_resolve(&runtime, args)
        }
        Some(Commands::Detect(args)) => run_detect(args),
        Some(Commands::Config) => {
            let runtime = load_runtime(cli.project_root.as_deref(), cli.config.as_deref())?;
            run_config(&runtime)
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_resolve(runtime: &Runtime, args: ResolveArgs) -> Result<()> {
    let config = &runtime.config;
    let mirror_dir = args
        .mirror
        .map(|path| absolutize(&runtime.project_root, path))
        .unwrap_or_else(|| config.mirror_dir(&runtime.project_root));
    let output_dir = args
        .out_dir
        .map(|path| absolutize(&runtime.project_root, path))
        .unwrap_or_else(|| config.output_dir(&runtime.project_root));

    let options = BatchOptions {
        resolve: ResolveOptions {
            scan: ScanOptions {
                strategy: if args.first_match {
                    SelectionStrategy::FirstMatch
                } else {
                    config.selection()
                },
                no_pad: !config.index.require_header_delimiter,
            },
            on_miss: if args.strict {
                MissPolicy::Strict
            } else {
                config.on_miss()
            },
        },
        jobs: args.jobs.unwrap_or_else(|| config.jobs()).max(1),
    };

    // Credentials are checked before any item is touched.
    let api = HttpRepositoryApi::new(HttpApiConfig::from_config(config))?;
    info!(
        mirror = %normalize_path(&mirror_dir),
        jobs = options.jobs,
        "resolving mirror"
    );
    let report = resolve_mirror(&api, &mirror_dir, &options)?;

    println!("resolve");
    println!("mirror_dir: {}", normalize_path(&mirror_dir));
    println!("selection: {}", options.resolve.scan.strategy.as_str());
    println!("on_miss: {}", options.resolve.on_miss.as_str());
    println!("jobs: {}", options.jobs);
    println!("items: {}", report.items);
    println!("resolved: {}", report.records.len());
    println!("failed: {}", report.failures.len());
    for failure in &report.failures {
        println!(
            "  - {} ({}): {}",
            failure.item,
            failure.repo.as_deref().unwrap_or("<no repo>"),
            failure.error
        );
    }

    if args.no_write {
        println!("artifacts: <skipped>");
        return Ok(());
    }
    let artifacts = write_artifacts(&output_dir, &report.records)?;
    println!(
        "artifact.json: {} ({} bytes)",
        normalize_path(&artifacts.json_path),
        artifacts.json_bytes
    );
    println!(
        "artifact.gzip: {} ({} bytes)",
        normalize_path(&artifacts.gzip_path),
        artifacts.gzip_bytes
    );
    Ok(())
}

fn run_detect(args: DetectArgs) -> Result<()> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    match detect_content(name, &content, !args.require_delimiter) {
        Some(meta) => {
            println!("format: {}", meta.format.as_str());
            println!("{}", serde_json::to_string_pretty(&meta.fields)?);
        }
        None => println!("format: <none>"),
    }
    Ok(())
}

fn run_config(runtime: &Runtime) -> Result<()> {
    let config = &runtime.config;
    println!("project_root: {}", normalize_path(&runtime.project_root));
    println!(
        "config_path: {} ({})",
        normalize_path(&runtime.config_path),
        if runtime.config_path.exists() {
            "found"
        } else {
            "missing"
        }
    );
    println!(
        "mirror_dir: {}",
        normalize_path(&config.mirror_dir(&runtime.project_root))
    );
    println!(
        "output_dir: {}",
        normalize_path(&config.output_dir(&runtime.project_root))
    );
    println!("jobs: {}", config.jobs());
    println!("timeout_ms: {}", config.timeout_ms());
    println!("retries: {}", config.retries());
    println!("retry_delay_ms: {}", config.retry_delay_ms());
    println!("user_agent: {}", config.user_agent());
    println!("selection: {}", config.selection().as_str());
    println!("on_miss: {}", config.on_miss().as_str());
    println!(
        "require_header_delimiter: {}",
        config.index.require_header_delimiter
    );
    println!(
        "github_token: {}",
        if config.github_token().is_some() {
            "<set>"
        } else {
            "<missing>"
        }
    );
    Ok(())
}

fn load_runtime(project_root: Option<&Path>, config: Option<&Path>) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let cwd = env::current_dir().context("failed to read current directory")?;
    let project_root = project_root
        .map(|path| absolutize(&cwd, path.to_path_buf()))
        .unwrap_or(cwd);
    let project_env = project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let config_path = config
        .map(|path| absolutize(&project_root, path.to_path_buf()))
        .unwrap_or_else(|| project_root.join(CONFIG_RELATIVE_PATH));
    let config = load_config(&config_path)?;

    Ok(Runtime {
        project_root,
        config_path,
        config,
    })
}

fn absolutize(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
