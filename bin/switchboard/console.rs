//! Event printing and the interactive console loop.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use switchboard::recorder::render_text;
use switchboard::{
    BatchToken, Credential, EngineEvent, EventEnvelope, EventSubscription, ExecutionMode,
    Orchestrator,
};

use crate::cli::OutputFormat;

/// Environment variable consulted by `:login` when the profile has no credential
pub const SECRET_ENV_VAR: &str = "SWITCHBOARD_SECRET";

pub type StdinLines = Lines<BufReader<Stdin>>;

pub fn stdin_lines() -> StdinLines {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Print one event to stdout
pub fn print_event(envelope: &EventEnvelope, format: OutputFormat) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Json => writeln!(stdout, "{}", envelope.to_json_line()?)?,
        OutputFormat::Text => match &envelope.event {
            EngineEvent::NextCommand { device, command } => {
                writeln!(stdout, "? [{}] next: {}", device, command)?
            }
            event => {
                if let Some(line) = render_text(event) {
                    write!(stdout, "{}", line)?;
                }
            }
        },
    }
    stdout.flush()?;
    Ok(())
}

/// Print events until `token` completes on `device`
///
/// In step mode each offered command is confirmed from stdin. Returns an
/// error when the session reports one.
pub async fn follow_batch(
    orchestrator: &Orchestrator,
    events: &mut EventSubscription,
    device: &str,
    token: BatchToken,
    format: OutputFormat,
) -> Result<()> {
    let mut stdin = stdin_lines();

    loop {
        let envelope = tokio::select! {
            envelope = events.recv() => match envelope {
                Some(envelope) => envelope,
                None => bail!("event stream ended"),
            },
            _ = tokio::signal::ctrl_c() => {
                let dropped = orchestrator.cancel(device).await?;
                bail!("interrupted, {} commands not sent", dropped);
            }
        };
        print_event(&envelope, format)?;

        match &envelope.event {
            EngineEvent::BatchCompleted { device: from, token: done }
                if from == device && *done == token =>
            {
                return Ok(());
            }
            EngineEvent::Error {
                device: Some(from),
                kind,
                detail,
            } if from == device => bail!("{:?}: {}", kind, detail),
            EngineEvent::Disconnected { device: from, reason } if from == device => {
                bail!("device disconnected: {}", reason)
            }
            EngineEvent::NextCommand {
                device: from,
                command,
            } if from == device => {
                eprint!("press Enter to send '{}' (or type a replacement): ", command);
                let typed = stdin
                    .next_line()
                    .await
                    .context("failed to read stdin")?
                    .unwrap_or_default();
                let line = if typed.trim().is_empty() {
                    command.clone()
                } else {
                    typed
                };
                orchestrator.send_manual(device, &line).await?;
            }
            _ => {}
        }
    }
}

/// Interactive console: plain lines are sent, `:` lines drive the engine
pub async fn run_console(
    orchestrator: &Orchestrator,
    mut events: EventSubscription,
    device: &str,
    credential: Option<Credential>,
    format: OutputFormat,
) -> Result<()> {
    let mut stdin = stdin_lines();
    eprintln!("connected to {}; type :help for console commands", device);

    loop {
        tokio::select! {
            envelope = events.recv() => match envelope {
                Some(envelope) => {
                    print_event(&envelope, format)?;
                    if matches!(&envelope.event, EngineEvent::Disconnected { device: from, .. } if from == device) {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            },
            line = stdin.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    return Ok(());
                };
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => return Ok(()),
                    Ok(command) => {
                        if let Err(e) = execute(orchestrator, device, command, credential.as_ref()).await {
                            eprintln!("error: {:#}", e);
                        }
                    }
                    Err(message) => eprintln!("{}", message),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(String),
    Next,
    Auto(bool),
    Mode(ExecutionMode),
    Delay(Duration),
    Cancel,
    Pending,
    Probe,
    Login,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let Some(rest) = line.trim_start().strip_prefix(':') else {
            return Ok(ConsoleCommand::Send(line.trim_end().to_string()));
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();
        match (name, arg) {
            ("next", None) => Ok(ConsoleCommand::Next),
            ("auto", Some("on")) => Ok(ConsoleCommand::Auto(true)),
            ("auto", Some("off")) => Ok(ConsoleCommand::Auto(false)),
            ("mode", Some(mode)) => mode
                .parse()
                .map(ConsoleCommand::Mode)
                .map_err(|e: switchboard::Error| e.to_string()),
            ("delay", Some(ms)) => ms
                .parse::<u64>()
                .map(|ms| ConsoleCommand::Delay(Duration::from_millis(ms)))
                .map_err(|_| format!("invalid delay '{}': expected milliseconds", ms)),
            ("cancel", None) => Ok(ConsoleCommand::Cancel),
            ("pending", None) => Ok(ConsoleCommand::Pending),
            ("probe", None) => Ok(ConsoleCommand::Probe),
            ("login", None) => Ok(ConsoleCommand::Login),
            ("help", None) => Ok(ConsoleCommand::Help),
            ("quit", None) | ("q", None) => Ok(ConsoleCommand::Quit),
            _ => Err(format!("unknown console command ':{}'; try :help", rest.trim())),
        }
    }
}

const HELP: &str = "\
:next              send the next queued command
:auto on|off       send queued commands on a timer
:mode manual|queued
:delay <ms>        pause between timed commands
:cancel            drop pending commands
:pending           list pending commands
:probe             test whether the device answers
:login             send the login credential
:quit              disconnect and exit";

async fn execute(
    orchestrator: &Orchestrator,
    device: &str,
    command: ConsoleCommand,
    credential: Option<&Credential>,
) -> Result<()> {
    match command {
        ConsoleCommand::Send(line) => {
            orchestrator.send_manual(device, &line).await?;
        }
        ConsoleCommand::Next => match orchestrator.peek_next(device).await? {
            Some(next) => {
                orchestrator.send_manual(device, &next).await?;
            }
            None => eprintln!("queue is empty"),
        },
        ConsoleCommand::Auto(enabled) => orchestrator.set_auto_advance(device, enabled).await?,
        ConsoleCommand::Mode(mode) => orchestrator.set_mode(device, mode).await?,
        ConsoleCommand::Delay(delay) => orchestrator.set_delay(device, delay).await?,
        ConsoleCommand::Cancel => {
            let dropped = orchestrator.cancel(device).await?;
            eprintln!("dropped {} pending commands", dropped);
        }
        ConsoleCommand::Pending => {
            for (index, command) in orchestrator.pending(device).await?.iter().enumerate() {
                eprintln!("{:>3}. {}", index + 1, command);
            }
        }
        ConsoleCommand::Probe => {
            let outcome = orchestrator.probe(device).await?;
            eprintln!("probe: {:?}", outcome);
        }
        ConsoleCommand::Login => {
            let from_env = std::env::var(SECRET_ENV_VAR).ok().map(Credential::new);
            match credential.cloned().or(from_env) {
                Some(secret) => orchestrator.send_login(device, &secret).await?,
                None => bail!(
                    "no credential in the device profile and {} is not set",
                    SECRET_ENV_VAR
                ),
            }
        }
        ConsoleCommand::Help => eprintln!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
