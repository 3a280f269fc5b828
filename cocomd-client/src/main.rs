//! CocoMD operator client - main entry point
//!
//! `cocomd interactive` (the default) runs a session controller and reads
//! operator commands from stdin, printing every session event.
//! `cocomd classify` performs one upload and prints the result.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cocomd_client::commands::{self, OperatorCommand, HELP};
use cocomd_client::{
    DirectoryExporter, ServerEndpoints, SessionController, SessionHandle, UploadClassifier,
    UploadImage, UploadOutcome,
};
use cocomd_common::api::{diagnosis_label, LinkState, UploadContext, UploadKind};
use cocomd_common::config::{CliOverrides, ClientConfig, LoggingConfig, TomlConfig};
use cocomd_common::events::{ClientEvent, EventBus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cocomd
#[derive(Parser, Debug)]
#[command(name = "cocomd")]
#[command(about = "Operator client for the CocoMD coconut maturity and disease server")]
#[command(version)]
struct Args {
    /// Config file (default: <config_dir>/cocomd/config.toml, env COCOMD_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Inference server base URL (env COCOMD_SERVER_URL)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Location sent with uploads
    #[arg(long, global = true)]
    location: Option<String>,

    /// Device sent with uploads
    #[arg(long, global = true)]
    device: Option<String>,

    /// Directory for captured frames (env COCOMD_EXPORT_DIR)
    #[arg(long, global = true)]
    export_dir: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Read operator commands from stdin (default)
    Interactive,

    /// Classify a single image and exit
    Classify {
        /// maturity or disease
        kind: UploadKind,

        /// Image file to upload
        path: PathBuf,

        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before the real subscriber exists; route its
    // warnings through a temporary stderr subscriber
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("cocomd=info"))
        .with_writer(std::io::stderr)
        .finish();
    let file = tracing::subscriber::with_default(bootstrap, || {
        TomlConfig::load_or_default(args.config.as_deref())
    })
    .context("Failed to load config file")?;

    let overrides = CliOverrides {
        server_url: args.server.clone(),
        location: args.location.clone(),
        device: args.device.clone(),
        export_dir: args.export_dir.clone(),
    };
    let config = ClientConfig::resolve(&overrides, file).context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    info!(
        "Starting CocoMD client v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Inference server: {}", config.server_url);

    match args.command.unwrap_or(CliCommand::Interactive) {
        CliCommand::Interactive => run_interactive(config, args.json).await,
        CliCommand::Classify { kind, path, output } => {
            classify(&config, kind, &path, output.as_deref(), args.json).await
        }
    }
}

/// Install the global subscriber: stderr always, plus the log file if set
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cocomd={}", logging.level)));

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

async fn run_interactive(config: ClientConfig, json: bool) -> Result<()> {
    let bus = Arc::new(EventBus::new(config.event_capacity));
    let exporter = DirectoryExporter::new(&config.export_dir, config.frame_file_name.clone());
    info!("Captured frames go to {}", exporter.target().display());

    let (handle, controller) = SessionController::spawn(&config, Box::new(exporter), bus)
        .context("Failed to start session controller")?;

    let printer = tokio::spawn(print_events(handle.subscribe(), json));

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                match commands::parse(&line) {
                    Ok(Some(command)) => {
                        if !execute(&handle, command).await? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    // Controller may already be gone if it failed
    let _ = handle.shutdown().await;
    controller.await.context("Session controller panicked")?;
    printer.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Run one operator command; `false` ends the session
async fn execute(handle: &SessionHandle, command: OperatorCommand) -> Result<bool> {
    match command {
        OperatorCommand::Mode(mode) => handle.select_mode(mode).await?,
        OperatorCommand::Back => handle.deselect_mode().await?,
        OperatorCommand::Stream { start: true } => handle.start_stream().await?,
        OperatorCommand::Stream { start: false } => handle.stop_stream().await?,
        OperatorCommand::Count { start: true } => handle.start_counting().await?,
        OperatorCommand::Count { start: false } => handle.stop_counting().await?,
        OperatorCommand::Upload { kind, path } => match UploadImage::from_path(&path).await {
            Ok(image) => handle.upload(kind, image).await?,
            Err(e) => println!("Cannot read {}: {}", path.display(), e),
        },
        OperatorCommand::Capture => handle.capture_frame().await?,
        OperatorCommand::Context { location, device } => {
            handle
                .set_upload_context(UploadContext::new(location, device))
                .await?
        }
        OperatorCommand::Status => println!("{}", handle.snapshot().await?),
        OperatorCommand::Help => println!("{}", HELP),
        OperatorCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Failed to serialize {}: {}", event.event_type(), e),
                    }
                } else {
                    println!("{}", describe(&event));
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Console lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &ClientEvent) -> String {
    let on_off = |b: bool| if b { "on" } else { "off" };
    match event {
        ClientEvent::ModeChanged { mode, .. } => format!("mode: {}", mode),
        ClientEvent::StreamStateChanged {
            streaming,
            link,
            connection,
            ..
        } => {
            let note = if *link == LinkState::Broken {
                " (stop the stream to reset)"
            } else {
                ""
            };
            format!(
                "stream: {} link={} connection={}{}",
                on_off(*streaming),
                link,
                connection,
                note
            )
        }
        ClientEvent::CountingStateChanged { counting, .. } => {
            format!("counting: {}", on_off(*counting))
        }
        ClientEvent::CountsUpdated { counts, .. } => format!("counts: {}", counts),
        ClientEvent::FrameUpdated {
            source, size_bytes, ..
        } => match source {
            Some(source) => format!("frame: {} bytes from {:?}", size_bytes, source),
            None => "frame: cleared".to_string(),
        },
        ClientEvent::DiagnosisUpdated { label, .. } => match label {
            Some(label) => format!("diagnosis: {}", label),
            None => "diagnosis: cleared".to_string(),
        },
        ClientEvent::UploadDispatched {
            kind, generation, ..
        } => format!("upload: {} request #{} sent", kind, generation),
        ClientEvent::StaleResponseDiscarded {
            kind,
            generation,
            current,
            ..
        } => format!(
            "upload: {} response #{} superseded by #{}",
            kind, generation, current
        ),
        ClientEvent::FrameExported { path, .. } => format!("captured: {}", path.display()),
        ClientEvent::CommandRejected {
            command, reason, ..
        } => format!("rejected {}: {}", command, reason),
        ClientEvent::RequestFailed {
            endpoint,
            status,
            message,
            ..
        } => match status {
            Some(status) => format!("error: {} returned {}: {}", endpoint, status, message),
            None => format!("error: {}: {}", endpoint, message),
        },
        ClientEvent::StreamError {
            connection,
            message,
            ..
        } => format!("stream error (connection {}): {}", connection, message),
        ClientEvent::MessageDropped {
            connection,
            message,
            ..
        } => format!("dropped message (connection {}): {}", connection, message),
        ClientEvent::ExportFailed { message, .. } => format!("capture failed: {}", message),
    }
}

async fn classify(
    config: &ClientConfig,
    kind: UploadKind,
    path: &Path,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let endpoints = ServerEndpoints::new(&config.server_url)?;
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let classifier = UploadClassifier::new(kind, http, &endpoints);

    let image = UploadImage::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let outcome = classifier
        .submit(image, &config.upload_context)
        .await
        .with_context(|| format!("{} classification failed", kind))?;

    match &outcome {
        UploadOutcome::Maturity(frame) => {
            let counts = frame.increment(config.tally_detections).unwrap_or_default();
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "counts": counts,
                        "detections": frame.detections,
                    })
                );
            } else {
                println!("counts: {}", counts);
                for detection in &frame.detections {
                    match detection.confidence {
                        Some(c) => println!("  {} ({:.2})", detection.label, c),
                        None => println!("  {}", detection.label),
                    }
                }
            }
        }
        UploadOutcome::Disease {
            classifications, ..
        } => {
            let label = diagnosis_label(classifications);
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "diagnosis": label,
                        "classifications": classifications,
                    })
                );
            } else {
                println!("diagnosis: {}", label);
            }
        }
    }

    if let Some(output) = output {
        std::fs::write(output, outcome.image())
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!("Annotated image written to {}", output.display());
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
