//! SSH shell transport
//!
//! Runs the system `ssh` client inside a pseudoterminal so the device sees
//! an interactive session, exactly as if an operator had typed the command.
//! When the device profile carries a credential, the first password prompt
//! is answered automatically.

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::bridge::{BridgeOptions, ChannelStreams};
use super::Transport;
use crate::error::{Error, Result};
use crate::models::{Credential, SshParams, TransportKind};

/// Bytes of recent output kept while looking for a password prompt
const PROMPT_WINDOW: usize = 64;

/// How the `ssh` client is launched
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Client executable
    pub program: String,
    /// `StrictHostKeyChecking` value
    pub host_key_checking: String,
    /// Additional client arguments placed before the destination
    pub extra_args: Vec<String>,
    /// Terminal width reported to the device
    pub columns: u16,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            host_key_checking: "accept-new".to_string(),
            extra_args: Vec::new(),
            columns: 200,
        }
    }
}

impl SshOptions {
    /// Client arguments for a destination
    pub fn arguments(&self, params: &SshParams) -> Vec<String> {
        let mut args = vec![
            "-tt".to_string(),
            "-p".to_string(),
            params.port.to_string(),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.host_key_checking),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(format!("{}@{}", params.username, params.host));
        args
    }
}

#[derive(Default)]
struct PromptWatch {
    tail: String,
    answered: bool,
}

impl PromptWatch {
    /// Feed output; true the first time a password prompt is seen
    fn observe(&mut self, text: &str) -> bool {
        if self.answered {
            return false;
        }
        self.tail.push_str(text);
        if self.tail.len() > PROMPT_WINDOW {
            let mut cut = self.tail.len() - PROMPT_WINDOW;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
        if self.tail.trim_end().to_lowercase().ends_with("password:") {
            self.answered = true;
            self.tail.clear();
            return true;
        }
        false
    }
}

/// Types the profile credential when the client asks for a password
struct PasswordResponder {
    credential: Option<Credential>,
    watch: Mutex<PromptWatch>,
}

impl PasswordResponder {
    fn new(credential: Option<Credential>) -> Self {
        Self {
            credential,
            watch: Mutex::new(PromptWatch::default()),
        }
    }

    /// Answer a prompt found in `data`; true when the reply was written
    ///
    /// A failed reply is logged and left to the operator. The output that
    /// carried the prompt is still delivered.
    async fn respond(&self, data: &[u8], streams: &ChannelStreams, endpoint: &str) -> bool {
        let Some(credential) = self.credential.as_ref() else {
            return false;
        };
        let prompted = self
            .watch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(&String::from_utf8_lossy(data));
        if !prompted {
            return false;
        }

        info!("Answering password prompt for {}", endpoint);
        let mut reply = zeroize::Zeroizing::new(credential.expose().as_bytes().to_vec());
        reply.extend_from_slice(TransportKind::Ssh.line_ending().as_bytes());
        match streams.write(&reply).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not answer password prompt for {}: {}", endpoint, e);
                false
            }
        }
    }
}

/// Interactive shell through the `ssh` client
pub struct SshTransport {
    params: SshParams,
    streams: ChannelStreams,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    responder: PasswordResponder,
}

impl SshTransport {
    /// Launch the client and attach to its terminal
    pub async fn open(params: SshParams, options: &SshOptions) -> Result<Self> {
        let options = options.clone();
        let endpoint = format!("{}@{}:{}", params.username, params.host, params.port);
        tokio::task::spawn_blocking(move || spawn_client(params, &options))
            .await
            .map_err(|e| Error::Connection {
                transport: format!("ssh {}", endpoint),
                reason: e.to_string(),
            })?
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }
}

fn spawn_client(params: SshParams, options: &SshOptions) -> Result<SshTransport> {
    let endpoint = format!("{}@{}:{}", params.username, params.host, params.port);
    let connection_error = |reason: String| Error::Connection {
        transport: format!("ssh {}", endpoint),
        reason,
    };

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: options.columns,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| connection_error(e.to_string()))?;

    let mut command = CommandBuilder::new(&options.program);
    command.args(options.arguments(&params));
    command.env("TERM", "vt100");

    let mut child = pair
        .slave
        .spawn_command(command)
        .map_err(|e| connection_error(format!("failed to start {}: {}", options.program, e)))?;
    drop(pair.slave);

    let killer = child.clone_killer();
    // Reap the client so it never lingers as a zombie
    thread::Builder::new()
        .name("ssh-wait".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => debug!("ssh client exited: {:?}", status),
            Err(e) => debug!("ssh client wait failed: {}", e),
        })?;

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| connection_error(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| connection_error(e.to_string()))?;

    let streams = ChannelStreams::spawn(
        BridgeOptions {
            label: "ssh".to_string(),
            zero_read_is_eof: true,
        },
        reader,
        writer,
    )?;

    info!("Started ssh session to {}", endpoint);
    Ok(SshTransport {
        streams,
        killer: Mutex::new(killer),
        master: Mutex::new(Some(pair.master)),
        responder: PasswordResponder::new(params.credential.clone()),
        params,
    })
}

#[async_trait]
impl Transport for SshTransport {
    async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.streams.write(bytes).await
    }

    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>> {
        let data = self.streams.read(timeout).await?;
        if !data.is_empty() {
            self.responder
                .respond(&data, &self.streams, &self.describe())
                .await;
        }
        Ok(data)
    }

    async fn close(&self) -> Result<()> {
        if self.streams.is_closed() {
            return Ok(());
        }
        self.streams.close();

        let killed = self
            .killer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .kill();
        if let Err(e) = killed {
            // Already exited on its own
            debug!("ssh client kill: {}", e);
        }
        self.master
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        debug!("Closed ssh session to {}", self.describe());
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }

    fn describe(&self) -> String {
        format!(
            "{}@{}:{}",
            self.params.username, self.params.host, self.params.port
        )
    }
}
