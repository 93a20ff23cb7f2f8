//! Blocking I/O Bridge
//!
//! Serial ports and PTY masters only offer blocking `Read`/`Write`. This
//! module moves them onto a dedicated reader thread and writer thread and
//! exposes channel ends that async code can await.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender as StdSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;

use crate::error::{Error, IoOperation, Result};

const READ_BUFFER_SIZE: usize = 4096;

/// How the reader thread should interpret its source
#[derive(Debug, Clone)]
pub(crate) struct BridgeOptions {
    /// Thread name prefix
    pub label: String,
    /// A zero-length read means end of stream (PTY) rather than an idle
    /// poll interval (serial with `VTIME`)
    pub zero_read_is_eof: bool,
}

struct WriteRequest {
    data: Vec<u8>,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Async handles onto a blocking byte stream
pub(crate) struct ChannelStreams {
    output_rx: tokio::sync::Mutex<UnboundedReceiver<io::Result<Vec<u8>>>>,
    input_tx: Mutex<Option<StdSender<WriteRequest>>>,
    closed: Arc<AtomicBool>,
}

impl ChannelStreams {
    /// Start the reader and writer threads
    pub fn spawn<R, W>(options: BridgeOptions, mut reader: R, mut writer: W) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let closed = Arc::new(AtomicBool::new(false));
        let (tx_out, rx_out) = unbounded_channel::<io::Result<Vec<u8>>>();
        let (tx_in, rx_in) = channel::<WriteRequest>();

        let reader_closed = Arc::clone(&closed);
        let zero_read_is_eof = options.zero_read_is_eof;
        thread::Builder::new()
            .name(format!("{}-reader", options.label))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    if reader_closed.load(Ordering::Acquire) {
                        break;
                    }
                    match reader.read(&mut buf) {
                        Ok(0) if zero_read_is_eof => {
                            debug!("transport read EOF");
                            break;
                        }
                        Ok(0) => continue,
                        Ok(n) => {
                            if tx_out.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(e) => {
                            if !reader_closed.load(Ordering::Acquire) {
                                let _ = tx_out.send(Err(e));
                            }
                            break;
                        }
                    }
                }
                debug!("transport reader thread exiting");
            })?;

        thread::Builder::new()
            .name(format!("{}-writer", options.label))
            .spawn(move || {
                while let Ok(request) = rx_in.recv() {
                    let result = write_through(&mut writer, &request.data);
                    let _ = request.ack.send(result);
                }
                debug!("transport writer thread exiting");
            })?;

        Ok(Self {
            output_rx: tokio::sync::Mutex::new(rx_out),
            input_tx: Mutex::new(Some(tx_in)),
            closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hand bytes to the writer thread and wait until they are flushed
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let sender = self
            .input_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(closed_pipe)?;

        let (ack, done) = oneshot::channel();
        sender
            .send(WriteRequest {
                data: data.to_vec(),
                ack,
            })
            .map_err(|_| closed_pipe())?;

        done.await
            .map_err(|_| closed_pipe())?
            .map_err(|e| Error::io(IoOperation::Write, e))
    }

    /// Wait up to `timeout` for the next chunk of output
    pub async fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let mut output = self.output_rx.lock().await;
        match tokio::time::timeout(timeout, output.recv()).await {
            Err(_) => Ok(Vec::new()),
            Ok(None) => Err(Error::TransportClosed),
            Ok(Some(Ok(data))) => Ok(data),
            Ok(Some(Err(e))) => Err(Error::io(IoOperation::Read, e)),
        }
    }

    /// Stop both threads; the reader exits at its next wakeup
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.input_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Write the whole buffer once and flush it
///
/// Errors, including a short write's, are returned unretried: the prefix
/// that was accepted must not reach the device twice.
fn write_through<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    writer.write_all(data)?;
    writer.flush()
}

fn closed_pipe() -> Error {
    Error::io(
        IoOperation::Write,
        io::Error::new(io::ErrorKind::BrokenPipe, "transport is closed"),
    )
}
