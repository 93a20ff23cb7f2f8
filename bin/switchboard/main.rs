//! Switchboard - command dispatch for network device consoles
//!
//! Thin command-line front end over the switchboard library: browse the
//! catalog, resolve templates, list serial ports, run a batch against one
//! device or open an interactive console.

mod cli;
mod console;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use switchboard::{
    build_orchestrator, handle_startup_error, init, BaudRate, CommandBatch, CommandSet, Config,
    Device, ExecutionMode, MemoryConnector, Orchestrator, SystemConnector, TemplateId,
    TranscriptRecorder, TransportConfig, TransportConnector,
};
use switchboard::transport::serial::SerialTransport;

use cli::{CatalogAction, Cli, Command, ConsoleArgs, RunArgs};

/// Prompt the dry-run device prints after every command
const DRY_RUN_PROMPT: &str = "Switch#";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match init_with_logging(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", handle_startup_error(&e));
            process::exit(2);
        }
    };

    if let Err(e) = run(cli, config).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

/// Load configuration, then install the subscriber at the configured level
fn init_with_logging(cli: &Cli) -> switchboard::Result<Config> {
    // The log level may come from the file, so read it before logging starts
    let config = init(cli.config.as_deref())?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let env_filter = env::var("RUST_LOG").unwrap_or(level);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    info!("Starting switchboard v{}", switchboard::VERSION);
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Catalog { action } => catalog(&config, action),
        Command::Resolve { template, params } => {
            let catalog = config.load_catalog()?;
            let batch = catalog.resolve_picks(&[params.pick(&template)])?;
            for command in batch.commands() {
                println!("{}", command);
            }
            Ok(())
        }
        Command::Run(args) => run_batch(&config, args).await,
        Command::Console(args) => run_console(&config, args).await,
        Command::Devices => {
            if config.devices.is_empty() {
                println!("no device profiles configured");
            }
            for device in &config.devices {
                println!(
                    "{:<16} {:<24} {}",
                    device.id,
                    device.display_name(),
                    device.transport.endpoint()
                );
            }
            Ok(())
        }
        Command::Ports => {
            let ports = SerialTransport::available_ports()?;
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
    }
}

fn catalog(config: &Config, action: CatalogAction) -> Result<()> {
    let catalog = config.load_catalog()?;
    match action {
        CatalogAction::List { category } => {
            for entry in catalog.categories() {
                if category.as_deref().is_some_and(|name| name != entry.name) {
                    continue;
                }
                println!("{}", entry.name);
                for template in &entry.templates {
                    println!("  {:<48} {}", template.id.as_str(), template.name);
                }
            }
            if let Some(name) = category {
                if catalog.templates_in(&name).is_none() {
                    bail!("no category named '{}'", name);
                }
            }
        }
        CatalogAction::Show { template } => {
            let template = catalog.get(&TemplateId::new(template))?;
            println!("{} ({})", template.name, template.id);
            if !template.description.is_empty() {
                println!("{}", template.description);
            }
            println!();
            for command in &template.commands {
                println!("  {}", command);
            }
            if !template.parameters.is_empty() {
                println!();
                for param in &template.parameters {
                    println!("  -p {}=<{}>  {}", param.name, param.kind, param.description);
                }
            }
        }
    }
    Ok(())
}

async fn run_batch(config: &Config, args: RunArgs) -> Result<()> {
    let device = profile(config, &args.device, args.dry_run)?;
    let orchestrator = connect(config, &device, args.dry_run)?;

    let mut picks = Vec::new();
    if let Some(path) = &args.set {
        let set = CommandSet::load_from_path(path)
            .with_context(|| format!("failed to load command set {}", path.display()))?;
        info!("Loaded command set '{}' ({} picks)", set.name, set.picks.len());
        picks.extend(set.picks);
    }
    picks.extend(args.template_picks());
    if picks.is_empty() {
        bail!("nothing to run: pass --set or --pick");
    }
    let batch: CommandBatch = orchestrator.catalog().resolve_picks(&picks)?;
    if batch.is_empty() {
        bail!("the selected templates expand to no commands");
    }

    let mut events = orchestrator.subscribe();
    let recorder = start_transcript(config, &orchestrator).await?;
    orchestrator.connect(device.clone()).await?;

    let result = async {
        let id = device.id.as_str();
        orchestrator.set_mode(id, ExecutionMode::Queued).await?;
        if let Some(ms) = args.delay_ms {
            orchestrator.set_delay(id, Duration::from_millis(ms)).await?;
        }
        orchestrator.set_auto_advance(id, args.auto).await?;

        debug!("Running {} commands on {}", batch.len(), id);
        let token = orchestrator.enqueue(id, batch).await?;
        console::follow_batch(&orchestrator, &mut events, id, token, args.format).await
    }
    .await;

    orchestrator.shutdown().await;
    drain_remaining(&mut events, args.format)?;
    finish_transcript(recorder).await;
    result
}

async fn run_console(config: &Config, args: ConsoleArgs) -> Result<()> {
    let device = profile(config, &args.device, args.dry_run)?;
    let orchestrator = connect(config, &device, args.dry_run)?;
    let credential = match &device.transport {
        TransportConfig::Ssh(params) => params.credential.clone(),
        TransportConfig::Serial(_) => None,
    };

    let events = orchestrator.subscribe();
    let recorder = start_transcript(config, &orchestrator).await?;
    orchestrator.connect(device.clone()).await?;

    let result =
        console::run_console(&orchestrator, events, &device.id, credential, args.format).await;

    orchestrator.shutdown().await;
    finish_transcript(recorder).await;
    result
}

/// Device profile by id; dry runs accept ids missing from the configuration
fn profile(config: &Config, id: &str, dry_run: bool) -> Result<Device> {
    match config.device(id) {
        Ok(device) => Ok(device.clone()),
        Err(_) if dry_run => Ok(Device::new(
            id,
            TransportConfig::serial("dry-run", BaudRate::default()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Orchestrator talking to real hardware, or to an echo device for dry runs
fn connect(config: &Config, device: &Device, dry_run: bool) -> Result<Orchestrator> {
    let connector: Arc<dyn TransportConnector> = if dry_run {
        info!("Dry run: {} is simulated", device.id);
        Arc::new(MemoryConnector::echo(DRY_RUN_PROMPT))
    } else {
        Arc::new(SystemConnector::new())
    };
    build_orchestrator(config, connector).context("failed to prepare the engine")
}

async fn start_transcript(
    config: &Config,
    orchestrator: &Orchestrator,
) -> Result<Option<TranscriptRecorder>> {
    match &config.logging.transcript {
        Some(path) => Ok(Some(
            TranscriptRecorder::start(
                Path::new(path),
                config.logging.transcript_format,
                orchestrator.subscribe(),
            )
            .await?,
        )),
        None => Ok(None),
    }
}

async fn finish_transcript(recorder: Option<TranscriptRecorder>) {
    if let Some(recorder) = recorder {
        let path = recorder.path().to_path_buf();
        match recorder.finish().await {
            Ok(count) => info!("Wrote {} events to {}", count, path.display()),
            Err(e) => error!("Transcript {} incomplete: {}", path.display(), e),
        }
    }
}

/// Print events published while shutting down
fn drain_remaining(
    events: &mut switchboard::EventSubscription,
    format: cli::OutputFormat,
) -> Result<()> {
    while let Some(envelope) = events.try_recv() {
        console::print_event(&envelope, format)?;
    }
    Ok(())
}
