use anyhow::Result;
use clap::Parser;
use pillocam::app::keyboard_input::KeyboardInputHandler;
use pillocam::{
    AnalysisService, CapturePlatform, ControlHandle, Controller, EventFilter, HttpAnalysisClient,
    PillocamConfig, SimulatedPlatform, StubAnalysisService,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "pillocam")]
#[command(about = "Camera client that streams frames to a remote pill-counting service")]
#[command(version)]
#[command(long_about = "Pillocam opens a local camera, negotiates capture constraints with \
automatic relaxation, and submits frames at a fixed rate to a remote analysis service \
that returns annotated images and object counts. A local HTTP control API and optional \
keyboard controls drive the camera and detection loop.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pillocam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the client")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize then shut down
    #[arg(long, help = "Start the camera and contact the service once, then exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Use the simulated camera platform instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Use an in-process stand-in for the analysis service
    #[arg(long)]
    offline: bool,

    /// Enable single-key terminal controls
    #[arg(short, long)]
    keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting Pillocam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PillocamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let platform = build_platform(&args)?;
    let service = build_service(&args, &config)?;

    let mut controller = Controller::new(config.clone(), platform, service);
    controller.initialize().await;

    if args.dry_run {
        let exit_code = controller.shutdown().await;
        println!("✓ Dry run completed: {}", controller.handle().snapshot().summary());
        std::process::exit(exit_code);
    }

    spawn_status_logger(controller.handle());
    spawn_event_logger(controller.handle(), args.debug);

    #[cfg(feature = "control_api")]
    let control_task = if config.control.enabled {
        let server = pillocam::ControlServer::new(config.control.clone(), controller.handle());
        Some(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Control API stopped: {}", e);
            }
        }))
    } else {
        info!("Control API disabled");
        None
    };

    let keyboard = if args.keyboard {
        let handler = KeyboardInputHandler::new(controller.handle());
        handler.start();
        Some(handler)
    } else {
        None
    };

    let exit_code = controller.run().await.map_err(|e| {
        error!("Controller error: {}", e);
        e
    })?;

    if let Some(handler) = keyboard {
        handler.stop().await;
    }

    #[cfg(feature = "control_api")]
    {
        if let Some(task) = control_task {
            task.abort();
        }
    }

    info!("Pillocam exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

fn build_platform(args: &Args) -> Result<Arc<dyn CapturePlatform>> {
    #[cfg(all(feature = "camera", target_os = "linux"))]
    {
        if !args.simulate {
            let platform = pillocam::GstPlatform::new()?;
            return Ok(Arc::new(platform));
        }
    }

    if !args.simulate {
        warn!("Built without camera support, falling back to the simulated platform");
    }
    info!("Using simulated camera platform");
    Ok(Arc::new(SimulatedPlatform::with_default_devices()))
}

fn build_service(args: &Args, config: &PillocamConfig) -> Result<Arc<dyn AnalysisService>> {
    if args.offline {
        info!("Offline mode: using in-process analysis stub");
        return Ok(Arc::new(StubAnalysisService::new()));
    }

    let client = HttpAnalysisClient::new(
        &config.remote.base_url,
        config.detection.request_timeout(),
    )?;
    info!("Analysis service at {}", config.remote.base_url);
    Ok(Arc::new(client))
}

/// Log a one-line summary whenever observable state changes
fn spawn_status_logger(handle: ControlHandle) {
    let mut status = handle.status();
    tokio::spawn(async move {
        while status.changed().await {
            info!("{}", status.snapshot().summary());
        }
    });
}

/// Log camera and detection events; everything when debugging
fn spawn_event_logger(handle: ControlHandle, all_events: bool) {
    let filter = if all_events {
        EventFilter::All
    } else {
        EventFilter::EventTypes(vec![
            "session_state_changed",
            "device_list_changed",
            "detection_completed",
        ])
    };
    let mut events = handle.subscribe_filtered(filter, "event-logger");

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("{}", event.description());
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
    };

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pillocam={}", log_level)));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };
    layers.push(fmt_layer);

    let guard = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pillocam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Pillocam Configuration File");
    println!("# Every value can be overridden with PILLOCAM_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", toml::to_string_pretty(&PillocamConfig::default())?);
    Ok(())
}
