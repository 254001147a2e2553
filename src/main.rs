//! CLI entry point for nornic-search.
//!
//! Commands for configuration, backend probing and search quality evaluation.
//! `eval` exits non-zero when any test case misses its thresholds so it can
//! gate CI.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use nornic_search::display::{
    THEME, create_help_text, create_key_value_table, create_progress_bar, with_spinner,
};
use nornic_search::eval::{
    Corpus, EvalResult, Harness, HttpSearcher, OutputFormat, Reporter, Searcher,
    demo_test_cases, save_json,
};
use nornic_search::gpu::{self, Accelerator, BackendKind};
use nornic_search::io::ExitCode;
use nornic_search::search::CrossEncoder;
use nornic_search::{NornicError, Settings};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Vector search evaluation and tooling
#[derive(Parser)]
#[command(
    name = "nornic-search",
    version = env!("CARGO_PKG_VERSION"),
    about = "Vector search evaluation and tooling",
    long_about = "Cluster-accelerated vector search with hybrid retrieval, plus a quality harness for CI.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = create_help_text()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .nornic/settings.toml
    #[command(about = "Set up .nornic directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Probe similarity backends
    #[command(about = "List CPU and CUDA backends available on this machine")]
    Devices,

    /// Grade search quality against expected results
    #[command(
        about = "Run a search quality evaluation",
        after_help = "Examples:\n  nornic-search eval --corpus corpus.json\n  nornic-search eval --corpus corpus.json --suite suite.json --output detailed\n  nornic-search eval --url http://localhost:7474 --threshold p10=0.6,hit=0.9"
    )]
    Eval(EvalArgs),
}

#[derive(Args)]
struct EvalArgs {
    /// Nodes (and optionally test cases) to index in-process
    #[arg(long, conflicts_with = "url")]
    corpus: Option<PathBuf>,

    /// Test suite JSON; replaces the corpus test cases
    #[arg(long)]
    suite: Option<PathBuf>,

    /// Query a running server instead of an in-process index
    #[arg(long)]
    url: Option<String>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
    output: OutputFormat,

    /// Also write the full report as JSON
    #[arg(long)]
    save: Option<PathBuf>,

    /// Threshold overrides, e.g. p10=0.5,mrr=0.5,hit=0.8
    #[arg(long)]
    threshold: Option<String>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", THEME.fail_with_icon(&e.to_string()));
            return ExitCode::ConfigError.into();
        }
    };
    init_logging(&settings);

    match run(cli.command, settings).await {
        Ok(code) => code.into(),
        Err(e) => {
            let code = e
                .downcast_ref::<NornicError>()
                .map(ExitCode::from_error)
                .unwrap_or(ExitCode::GeneralError);
            eprintln!("{}", THEME.fail_with_icon(&format!("{e:#}")));
            if let Some(error) = e.downcast_ref::<NornicError>() {
                for suggestion in error.recovery_suggestions() {
                    eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
                }
            }
            code.into()
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, NornicError> {
    let loaded = match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    loaded.map_err(|e| NornicError::Config {
        reason: e.to_string(),
    })
}

/// Logs go to stderr; `RUST_LOG` wins over `logging.level`.
fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(command: Commands, settings: Settings) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| NornicError::Config {
                    reason: e.to_string(),
                })?;
            println!(
                "{}",
                THEME.pass_with_icon(&format!(
                    "Created configuration file at: {}",
                    THEME.apply(&THEME.path, path.display())
                ))
            );
            println!("Edit this file to customize your settings.");
            Ok(ExitCode::Success)
        }
        Commands::Config => {
            match Settings::config_path() {
                Some(path) => println!("Configuration file: {}", path.display()),
                None => println!("Configuration file: none (using defaults)"),
            }
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(ExitCode::Success)
        }
        Commands::Devices => {
            print_devices(&settings);
            Ok(ExitCode::Success)
        }
        Commands::Eval(args) => run_eval(args, &settings).await,
    }
}

fn print_devices(settings: &Settings) {
    let cuda_count = gpu::device_count(BackendKind::Cuda);
    let mut rows = vec![
        (
            "cpu".to_string(),
            format!("available ({} threads)", num_cpus::get()),
        ),
        (
            "cuda".to_string(),
            if gpu::is_available(BackendKind::Cuda) {
                format!("available ({cuda_count} devices)")
            } else {
                "not available".to_string()
            },
        ),
    ];

    for id in 0..cuda_count {
        if let Ok(accelerator) = Accelerator::cuda(id) {
            let info = accelerator.info();
            rows.push((
                format!("cuda:{}", info.id),
                format!(
                    "{} | {:.1} GiB | sm_{}{}",
                    info.name,
                    info.memory_bytes as f64 / (1u64 << 30) as f64,
                    info.compute_capability.0,
                    info.compute_capability.1
                ),
            ));
        }
    }

    println!("{}", create_key_value_table(("Backend", "Status"), rows));
    println!(
        "Configured backend: {} (device {})",
        THEME.apply(&THEME.number, settings.gpu.backend),
        settings.gpu.device_id
    );
}

async fn run_eval(args: EvalArgs, settings: &Settings) -> anyhow::Result<ExitCode> {
    let thresholds = match &args.threshold {
        Some(overrides) => settings
            .eval
            .with_overrides(overrides)
            .map_err(NornicError::from)?,
        None => settings.eval,
    };

    let mut options = settings.search.options.clone();
    options.rerank_enabled |= settings.rerank.enabled;

    let result = if let Some(url) = &args.url {
        let searcher = HttpSearcher::new(url.as_str()).map_err(NornicError::from)?;
        searcher.check_health().await.map_err(NornicError::from)?;
        info!("Evaluating against {}", searcher.base_url());

        let mut harness = Harness::new(searcher)
            .with_thresholds(thresholds)
            .with_options(options)
            .with_adaptive_rrf(settings.search.adaptive_rrf)
            .with_suite_name("http");
        match &args.suite {
            Some(path) => harness.load_suite(path).map_err(NornicError::from)?,
            None => harness.add_test_cases(demo_test_cases()),
        }
        run_harness(harness, args.quiet).await?
    } else {
        let Some(corpus_path) = &args.corpus else {
            bail!("Either --corpus or --url is required");
        };
        let corpus = Corpus::load(corpus_path).map_err(NornicError::from)?;

        let accelerator = Accelerator::from_config(settings.gpu.backend, settings.gpu.device_id)
            .map_err(NornicError::from)?;
        let cross_encoder = if settings.rerank.enabled {
            Some(CrossEncoder::new(settings.rerank.clone()).map_err(NornicError::from)?)
        } else {
            None
        };
        let pipeline = with_spinner("Indexing corpus...", || {
            corpus.build_pipeline(settings.kmeans.clone(), accelerator, cross_encoder)
        })
        .map_err(NornicError::from)?;

        if settings.rerank.enabled && !pipeline.cross_encoder_available().await {
            println!(
                "{}",
                THEME.warning_with_icon("Rerank service not reachable, results will not be reranked")
            );
        }

        let suite_name = corpus_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "corpus".to_string());
        let mut harness = Harness::new(pipeline)
            .with_thresholds(thresholds)
            .with_options(options)
            .with_adaptive_rrf(settings.search.adaptive_rrf)
            .with_suite_name(suite_name);
        match &args.suite {
            Some(path) => harness.load_suite(path).map_err(NornicError::from)?,
            None => harness.add_test_cases(corpus.test_cases.clone()),
        }
        run_harness(harness, args.quiet).await?
    };

    Reporter::stdout()
        .print(&result, args.output)
        .context("Failed to write report")?;
    if let Some(path) = &args.save {
        save_json(&result, path).map_err(NornicError::from)?;
        eprintln!(
            "Report saved to {}",
            THEME.apply(&THEME.path, path.display())
        );
    }

    Ok(ExitCode::from_eval(&result))
}

async fn run_harness<S: Searcher>(
    harness: Harness<S>,
    quiet: bool,
) -> anyhow::Result<EvalResult> {
    debug!("Running {} test cases", harness.test_cases().len());

    let bar = (!quiet).then(|| {
        create_progress_bar(harness.test_cases().len() as u64, "Evaluating")
    });
    let result = harness
        .run_with_progress(|test| {
            if let Some(bar) = &bar {
                bar.set_message(test.test_case.name.clone());
                bar.inc(1);
            }
        })
        .await
        .map_err(NornicError::from);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    Ok(result?)
}
