//! Transcript Recorder
//!
//! Appends every engine event to a file. JSON lines keep the full envelope
//! for tooling; the text format reads like a console log.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventEnvelope, EventSubscription};

/// On-disk transcript encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    /// One `EventEnvelope` JSON object per line
    #[default]
    JsonLines,
    /// Human-readable console transcript
    Text,
}

impl std::str::FromStr for TranscriptFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" | "json_lines" | "jsonl" => Ok(TranscriptFormat::JsonLines),
            "text" => Ok(TranscriptFormat::Text),
            other => Err(Error::ConfigValidationFailed {
                field: "transcript_format".to_string(),
                reason: format!("unknown transcript format '{}'", other),
            }),
        }
    }
}

/// Render one event as a transcript line, if it belongs in a transcript
pub fn render(envelope: &EventEnvelope, format: TranscriptFormat) -> Result<Option<String>> {
    match format {
        TranscriptFormat::JsonLines => Ok(Some(format!("{}\n", envelope.to_json_line()?))),
        TranscriptFormat::Text => Ok(render_text(&envelope.event)),
    }
}

/// Console-style rendering; device output is kept verbatim
pub fn render_text(event: &EngineEvent) -> Option<String> {
    let line = match event {
        EngineEvent::Connected { device, endpoint } => {
            format!("# [{}] connected to {}\n", device, endpoint)
        }
        EngineEvent::Disconnected { device, reason } => {
            format!("# [{}] disconnected: {}\n", device, reason)
        }
        EngineEvent::DeviceOutput { text, .. } => text.clone(),
        EngineEvent::CommandSent { device, command } => format!("> [{}] {}\n", device, command),
        EngineEvent::NextCommand { .. } => return None,
        EngineEvent::BatchCompleted { device, token } => {
            format!("# [{}] batch {} completed\n", device, token)
        }
        EngineEvent::Notice { device, message } => format!("# [{}] {}\n", device, message),
        EngineEvent::Error {
            device,
            kind,
            detail,
        } => format!(
            "! [{}] {:?}: {}\n",
            device.as_deref().unwrap_or("engine"),
            kind,
            detail
        ),
    };
    Some(line)
}

/// Background task writing events to a file
pub struct TranscriptRecorder {
    path: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<u64>>,
}

impl TranscriptRecorder {
    /// Open `path` for appending and start recording `events`
    pub async fn start(
        path: &Path,
        format: TranscriptFormat,
        mut events: EventSubscription,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::TranscriptOpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let mut writer = BufWriter::new(file);
        let (stop, mut stopped) = oneshot::channel::<()>();

        info!("Recording transcript to {} ({:?})", path.display(), format);
        let task = tokio::spawn(async move {
            let mut written = 0u64;
            loop {
                tokio::select! {
                    biased;
                    envelope = events.recv() => match envelope {
                        Some(envelope) => {
                            written += write_event(&mut writer, &envelope, format).await?;
                        }
                        None => break,
                    },
                    _ = &mut stopped => {
                        while let Some(envelope) = events.try_recv() {
                            written += write_event(&mut writer, &envelope, format).await?;
                        }
                        break;
                    }
                }
            }
            writer.flush().await?;
            Ok::<u64, Error>(written)
        });

        Ok(Self {
            path: path.to_path_buf(),
            stop: Some(stop),
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write out everything already published, then stop
    ///
    /// Returns the number of events recorded.
    pub async fn finish(mut self) -> Result<u64> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let written = (&mut self.task)
            .await
            .map_err(|e| Error::Other(format!("transcript task failed: {}", e)))??;
        debug!("Transcript {} closed after {} events", self.path.display(), written);
        Ok(written)
    }
}

async fn write_event<W>(
    writer: &mut W,
    envelope: &EventEnvelope,
    format: TranscriptFormat,
) -> Result<u64>
where
    W: AsyncWriteExt + Unpin,
{
    match render(envelope, format)? {
        Some(line) => {
            writer.write_all(line.as_bytes()).await?;
            Ok(1)
        }
        None => Ok(0),
    }
}
