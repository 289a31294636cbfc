use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::Bytes;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;

use super::ExitInfo;
use super::OutputEvent;
use super::READ_CHUNK_SIZE;
use super::SpawnRequest;
use super::SpawnedProcess;
use super::Transport;
use super::output_channel;
use crate::error::Result;
use crate::error::TetherErr;
use crate::util::MutexExt;

const INITIAL_ROWS: u16 = 24;
const INITIAL_COLS: u16 = 80;
const WRITER_QUEUE_DEPTH: usize = 128;

pub(crate) struct PtyTransport {
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    master: StdMutex<Box<dyn MasterPty + Send>>,
    pid: Option<u32>,
}

impl PtyTransport {
    pub(crate) async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.writer_tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| TetherErr::TransportUnavailable)
    }

    pub(crate) fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .lock_unchecked()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| TetherErr::Io(std::io::Error::other(err.to_string())))
    }

    pub(crate) fn kill(&self) {
        if let Err(err) = self.killer.lock_unchecked().kill() {
            // Already gone; the wait thread reports the exit.
            debug!(pid = self.pid, %err, "terminal process kill request failed");
        }
    }
}

pub(crate) fn spawn_pty(request: SpawnRequest) -> Result<SpawnedProcess> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: INITIAL_ROWS,
            cols: INITIAL_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(TetherErr::spawn)?;

    let mut command_builder = CommandBuilder::new(&request.program);
    command_builder.args(&request.args);
    if let Some(cwd) = request.cwd.as_ref() {
        command_builder.cwd(cwd);
    }
    for (key, value) in &request.env {
        command_builder.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(command_builder)
        .map_err(TetherErr::spawn)?;
    // The child holds its own copy of the slave side; releasing ours lets the
    // reader see end of file once the child exits.
    drop(pair.slave);
    let pid = child.process_id();
    let killer = child.clone_killer();

    let (output_tx, first_output) = output_channel();
    let mut reader = pair.master.try_clone_reader().map_err(TetherErr::spawn)?;
    let reader_tx = output_tx.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = reader_tx.send(OutputEvent::Data(Bytes::copy_from_slice(&buf[..n])));
                }
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                // Linux reports EIO on the master once the child side closes.
                Err(err) => {
                    debug!(%err, "terminal reader stopped");
                    break;
                }
            }
        }
        let _ = reader_tx.send(OutputEvent::Closed);
    });

    let writer = pair.master.take_writer().map_err(TetherErr::spawn)?;
    let writer = Arc::new(StdMutex::new(writer));
    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            let writer = Arc::clone(&writer);
            let _ = tokio::task::spawn_blocking(move || {
                let mut guard = writer.lock_unchecked();
                if let Err(err) = guard.write_all(&bytes).and_then(|()| guard.flush()) {
                    debug!(%err, "terminal write failed");
                }
            })
            .await;
        }
    });

    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(err) => {
                debug!(%err, "failed to collect terminal process status");
                None
            }
        };
        let _ = exit_tx.send(ExitInfo { code });
    });

    Ok(SpawnedProcess {
        transport: Transport::Pty(PtyTransport {
            writer_tx,
            killer: StdMutex::new(killer),
            master: StdMutex::new(pair.master),
            pid,
        }),
        pid,
        output: output_tx,
        first_output,
        exit: exit_rx,
    })
}
