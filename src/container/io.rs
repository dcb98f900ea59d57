//! Moving bytes between attached containers and the host.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bollard::container::LogOutput;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::terminal::AnsiFilter;

/// Copy attached output frames to `stdout`/`stderr`, each through its own
/// [`AnsiFilter`]. TTY output arrives as console frames and goes to stdout.
pub async fn pump_output<S, O, E>(mut output: S, stdout: O, stderr: E) -> io::Result<()>
where
    S: Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
    O: Write,
    E: Write,
{
    let mut out = AnsiFilter::new(stdout);
    let mut err = AnsiFilter::new(stderr);

    while let Some(frame) = output.next().await {
        match frame {
            Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                out.write_all(&message)?;
                out.flush()?;
            }
            Ok(LogOutput::StdErr { message }) => {
                err.write_all(&message)?;
                err.flush()?;
            }
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) => {
                tracing::debug!("Attach stream ended: {}", e);
                break;
            }
        }
    }

    out.finish()?;
    err.finish()
}

/// Forward host stdin to the container until either side closes.
pub async fn forward_stdin(input: Pin<Box<dyn AsyncWrite + Send>>) -> io::Result<u64> {
    forward_input(io::stdin(), input).await
}

/// Copy `reader` into `input`.
///
/// The blocking reads happen on a detached thread, so aborting the returned
/// future stops forwarding at once and never holds up runtime shutdown.
pub async fn forward_input<R, W>(reader: R, mut input: W) -> io::Result<u64>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut chunks = spawn_reader(reader)?;
    let mut total = 0u64;
    while let Some(chunk) = chunks.recv().await {
        let chunk = chunk?;
        input.write_all(&chunk).await?;
        input.flush().await?;
        total += chunk.len() as u64;
    }
    input.shutdown().await?;
    Ok(total)
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
) -> io::Result<mpsc::Receiver<io::Result<Vec<u8>>>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("r2r-stdin".to_string())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                let sent = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => tx.blocking_send(Ok(buf[..n].to_vec())),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// A cloneable in-memory writer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Take the contents as lossy UTF-8, leaving the buffer empty.
    pub fn take_string(&self) -> String {
        let bytes = match self.0.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Puts the host terminal in raw mode for the guard's lifetime.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        let enabled = match crossterm::terminal::enable_raw_mode() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Could not enable raw mode: {}", e);
                false
            }
        };
        Self { enabled }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}
