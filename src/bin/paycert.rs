//! paycert CLI - replays certification fixtures against a payment gateway.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use paycert::{
    ExternalValueSource, EnvValueSource, FileSink, FixtureDirectory,
    FixtureSource, GatewayConfig, HttpRequestExecutor, NameFilter,
    SequentialRunner, StaticValueSource, DEFAULT_SOURCE_NAMESPACE,
};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Replay recorded certification scenarios against a payment gateway.
#[derive(Parser, Debug)]
#[command(name = "paycert", version, about)]
struct Cli {
    /// Directory of fixture files (searched recursively).
    #[arg(long = "fixtures", default_value = "cert_fixtures")]
    fixtures: PathBuf,

    /// Gateway configuration file (YAML).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// File receiving one `<name>,<requestId>` line per scenario.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Only run scenarios whose name starts with this prefix.
    #[arg(short = 'f', long = "filter", conflicts_with = "group")]
    filter: Option<String>,

    /// Only run one certification group (e.g. `AC` for `L_AC_*`).
    #[arg(short = 'g', long = "group")]
    group: Option<String>,

    /// YAML file of external values, key to value.
    #[arg(long = "source-values", conflicts_with = "source_env_prefix")]
    source_values: Option<PathBuf>,

    /// Read external values from `<PREFIX><KEY>` environment variables.
    #[arg(long = "source-env-prefix")]
    source_env_prefix: Option<String>,

    /// Namespace of external placeholders (`${<namespace>.key}`).
    #[arg(long = "source-namespace", default_value = DEFAULT_SOURCE_NAMESPACE)]
    source_namespace: String,

    /// Gateway base URL (overrides the configuration file).
    #[arg(short = 'b', long = "base-url", env = "PAYCERT_BASE_URL")]
    base_url: Option<String>,

    /// Gateway user.
    #[arg(long = "user", env = "PAYCERT_USER")]
    user: Option<String>,

    /// Gateway password.
    #[arg(long = "password", env = "PAYCERT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Merchant identifier.
    #[arg(long = "merchant-id", env = "PAYCERT_MERCHANT_ID")]
    merchant_id: Option<String>,

    /// Timeout in seconds per request.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// `RUST_LOG` wins when set; otherwise `--verbose` turns on debug output
/// for this crate only, keeping reqwest and hyper at their usual level.
fn init_tracing(verbose: bool) {
    let directives = if verbose {
        "paycert=debug,info"
    } else {
        "paycert=info,warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .compact()
        .try_init();
}

fn prepare_config(args: &Cli) -> Result<GatewayConfig> {
    let mut config = match (&args.config, &args.base_url) {
        (Some(path), _) => GatewayConfig::load(path)?,
        (None, Some(base_url)) => GatewayConfig::new(base_url.clone()),
        (None, None) => {
            return Err(anyhow!(
                "Either --config or --base-url must be provided"
            ))
        }
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(user) = &args.user {
        config.user = Some(user.clone());
    }
    if let Some(password) = &args.password {
        config.password = Some(password.clone());
    }
    if let Some(merchant_id) = &args.merchant_id {
        config.merchant_id = Some(merchant_id.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    config.validate()?;
    Ok(config)
}

fn prepare_source(args: &Cli) -> Result<Box<dyn ExternalValueSource>> {
    if let Some(path) = &args.source_values {
        return Ok(Box::new(StaticValueSource::from_yaml_file(path)?));
    }
    if let Some(prefix) = &args.source_env_prefix {
        return Ok(Box::new(EnvValueSource::new(prefix.clone())));
    }
    warn!(
        "No external value source configured; ${{{}.*}} placeholders will fail",
        args.source_namespace
    );
    Ok(Box::new(StaticValueSource::default()))
}

fn prepare_filter(args: &Cli) -> Option<NameFilter> {
    match (&args.filter, &args.group) {
        (Some(prefix), _) => Some(NameFilter::prefix(prefix)),
        (None, Some(group)) => Some(NameFilter::cert_group(group)),
        (None, None) => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let config = prepare_config(&args)?;
    let scenarios = FixtureDirectory::new(&args.fixtures)
        .load()
        .context(format!(
            "Failed to load fixtures from {}",
            args.fixtures.display()
        ))?;
    if scenarios.is_empty() {
        return Err(anyhow!(
            "No fixtures found in {}",
            args.fixtures.display()
        ));
    }

    let source = prepare_source(&args)?;
    let sink = FileSink::create(&args.output).context(format!(
        "Failed to create results file: {}",
        args.output.display()
    ))?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping before the next scenario");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut runner = SequentialRunner::new(
        Box::new(HttpRequestExecutor::new(config)),
        source,
        Box::new(sink),
    )
    .with_source_namespace(&args.source_namespace)
    .with_cancel_flag(cancel);
    if let Some(filter) = prepare_filter(&args) {
        runner = runner.with_filter(filter);
    }

    match runner.run(&scenarios).await {
        Ok(summary) => {
            info!(
                "Summary:\n  Completed: {}\n  Skipped: {}\n  Duration: {} ms\n  Results: {}",
                summary.completed.len(),
                summary.skipped.len(),
                summary.duration_ms,
                args.output.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("\x1b[31m{}\x1b[0m", e);
            exit(1);
        }
    }
}
