use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use priceguard_core::{
    config::{LogFormat, LoggingConfig},
    create_resolver, load_config, validate_config, AdjustmentExecutor, AdjustmentState, Clock,
    Config, Credentials, JsonOrderCatalog, OrderCatalog, OrderFilter, OrderReportWriter,
    Orchestrator, Pacer, RunHistory, RunLock, RunTrigger, SanitizedConfig, Scheduler,
    SessionManager, SessionStore, SystemClock, WebDriverStorefront,
};

#[derive(Parser)]
#[command(
    name = "priceguard",
    about = "Watch order history for price drops and request price adjustments",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        short,
        global = true,
        env = "PRICEGUARD_CONFIG",
        default_value = "priceguard.toml"
    )]
    config: PathBuf,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Run the browser without a window
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run once now, then print the next planned run
    Run,

    /// Keep running at the times the scheduler picks
    Schedule {
        /// Start with a run instead of waiting for the first planned slot
        #[arg(long)]
        now: bool,
    },

    /// Show catalog counts and recent runs
    Status {
        /// Number of recent runs to list
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },

    /// Print when the next run would start
    Next,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if cli.headless {
        config.storefront.headless = true;
    }
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config.logging, cli.verbose)?;
    info!("Configuration loaded from {:?}", cli.config);
    debug!(
        "Effective configuration: {}",
        serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default()
    );

    match cli.command {
        Commands::Run => run_now(&config).await,
        Commands::Schedule { now } => run_schedule(&config, now).await,
        Commands::Status { runs } => show_status(&config, runs),
        Commands::Next => show_next(&config),
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    build_subscriber(config, verbose, std::io::stderr)?.init();
    Ok(())
}

/// Console layer on `console`, plus a second layer on the log file when one
/// is configured.
fn build_subscriber<W>(
    config: &LoggingConfig,
    verbose: bool,
    console: W,
) -> Result<impl Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let default_filter = if verbose {
        "info,priceguard=debug,priceguard_core=debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let file_layer = match &config.file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            Some(fmt_layer(config.format, Arc::new(file), false))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config.format, console, true))
        .with(file_layer))
}

fn fmt_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// Everything a run needs, wired from configuration.
struct App {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    storefront: Arc<WebDriverStorefront>,
}

fn open_scheduler(config: &Config) -> Result<Arc<Scheduler>> {
    let history_path = config.storage.history_path();
    let history = RunHistory::open(&history_path)
        .with_context(|| format!("Failed to open run history {:?}", history_path))?;
    let scheduler = Scheduler::new(config.scheduler.clone(), history)
        .context("Failed to initialize scheduler")?;
    Ok(Arc::new(scheduler))
}

fn open_catalog(config: &Config) -> Result<Arc<JsonOrderCatalog>> {
    let path = config.storage.catalog_path();
    let catalog = JsonOrderCatalog::open(&path)
        .with_context(|| format!("Failed to open order catalog {:?}", path))?;
    Ok(Arc::new(catalog))
}

fn build_app(config: &Config) -> Result<App> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pacer = Pacer::new(&config.pacing);

    let catalog = open_catalog(config)?;
    info!("Order catalog: {:?}", config.storage.catalog_path());

    let resolver = create_resolver(&config.captcha).context("Failed to create CAPTCHA resolver")?;
    info!("CAPTCHA resolver: {}", resolver.name());
    let captcha_timeout = Duration::from_secs(u64::from(config.captcha.timeout_secs));

    let storefront = Arc::new(
        WebDriverStorefront::new(config.storefront.clone(), pacer.clone(), clock.clone())
            .context("Failed to create storefront driver")?
            .with_resolver(resolver.clone(), captcha_timeout),
    );
    info!("WebDriver endpoint: {}", config.storefront.webdriver_url);

    let sessions = SessionManager::new(
        SessionStore::new(config.storage.session_path()),
        storefront.clone(),
        Credentials {
            email: config.account.email.clone(),
            password: config.account.password.clone(),
        },
        config.pipeline.login_attempts,
        clock.clone(),
    )
    .with_pacer(pacer.clone());

    let executor = AdjustmentExecutor::new(
        storefront.clone(),
        resolver,
        captcha_timeout,
        pacer.clone(),
    );

    let scheduler = open_scheduler(config)?;
    let reports = OrderReportWriter::new(
        config.storage.reports_path(),
        config.pipeline.max_attempts,
    );

    let orchestrator = Orchestrator::new(
        config.pipeline.clone(),
        catalog,
        sessions,
        storefront.clone(),
        executor,
        clock,
    )
    .with_reports(reports)
    .with_scheduler(scheduler.clone())
    .with_run_lock(RunLock::new(config.storage.lock_path()))
    .with_pacer(pacer)
    .with_max_pages(config.storefront.max_pages);

    Ok(App {
        orchestrator: Arc::new(orchestrator),
        scheduler,
        storefront,
    })
}

/// Request a graceful stop on Ctrl+C or SIGTERM.
fn spawn_shutdown_watcher(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing current order");
        orchestrator.shutdown();
    });
}

async fn run_now(config: &Config) -> Result<()> {
    let app = build_app(config)?;
    spawn_shutdown_watcher(app.orchestrator.clone());

    let result = app.orchestrator.run(RunTrigger::Manual).await;
    app.storefront.shutdown().await;
    let report = result?;

    println!("{}", report);
    if let Some(cause) = &report.abort_cause {
        bail!("run aborted: {}", cause);
    }
    Ok(())
}

async fn run_schedule(config: &Config, now: bool) -> Result<()> {
    let app = build_app(config)?;
    spawn_shutdown_watcher(app.orchestrator.clone());

    info!("Scheduler started");
    let shutdown = app.orchestrator.subscribe_shutdown();
    app.scheduler
        .run_loop(&app.orchestrator, now, shutdown)
        .await;

    app.storefront.shutdown().await;
    info!("Scheduler stopped");
    Ok(())
}

fn show_status(config: &Config, runs: usize) -> Result<()> {
    let catalog = open_catalog(config)?;
    let total = catalog.count(&OrderFilter::new())?;

    println!("Orders ({} total, {})", total, config.storage.catalog_path().display());
    for state in [
        AdjustmentState::Unseen,
        AdjustmentState::Ineligible,
        AdjustmentState::Eligible,
        AdjustmentState::Attempted,
        AdjustmentState::FailedRetryable,
        AdjustmentState::Succeeded,
        AdjustmentState::FailedTerminal,
    ] {
        let count = catalog.count(&OrderFilter::new().with_state(state))?;
        if count > 0 {
            println!("  {:<18} {}", state.as_str(), count);
        }
    }

    let scheduler = open_scheduler(config)?;
    let recent = scheduler.history().recent(runs);
    println!();
    if recent.is_empty() {
        println!("No runs recorded yet");
    } else {
        println!("Recent runs");
        for record in recent.iter().rev() {
            println!(
                "  {}  {:<9}  scanned {}, eligible {}, succeeded {}, failed {}, deferred {}",
                record.started_at.format("%Y-%m-%d %H:%M"),
                record.outcome.as_str(),
                record.orders_scanned,
                record.eligible,
                record.adjustments_succeeded,
                record.adjustments_failed,
                record.deferred
            );
        }
    }

    println!();
    println!("Next run: {}", scheduler.next_run_time(Utc::now()));
    Ok(())
}

fn show_next(config: &Config) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    let plan = scheduler.next_run_time(Utc::now());
    if plan.is_fallback() {
        warn!("Using the default interval: {}", plan.reason);
    }
    println!("{}", plan);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
