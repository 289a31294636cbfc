use std::io::ErrorKind;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::ExitInfo;
use super::OutputEvent;
use super::READ_CHUNK_SIZE;
use super::SpawnRequest;
use super::SpawnedProcess;
use super::Transport;
use super::output_channel;
use crate::error::Result;
use crate::error::TetherErr;

pub(crate) struct PipeTransport {
    stdin: Mutex<ChildStdin>,
    cancel: CancellationToken,
}

impl PipeTransport {
    pub(crate) async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub(crate) fn kill(&self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn_pipe(request: SpawnRequest) -> Result<SpawnedProcess> {
    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = request.cwd.as_ref() {
        command.current_dir(cwd);
    }
    #[cfg(target_os = "linux")]
    {
        let parent_pid = std::process::id() as libc::pid_t;
        // SAFETY: the hook only issues async-signal-safe syscalls.
        unsafe {
            command.pre_exec(move || {
                crate::process_death::set_parent_death(parent_pid);
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(TetherErr::spawn)?;
    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TetherErr::spawn(anyhow::anyhow!("child stdin was not captured")))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| TetherErr::spawn(anyhow::anyhow!("child stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TetherErr::spawn(anyhow::anyhow!("child stderr was not captured")))?;

    let (output_tx, first_output) = output_channel();
    let reader_tx = output_tx.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => {
                    let _ = reader_tx.send(OutputEvent::Closed);
                    break;
                }
                Ok(n) => {
                    let _ = reader_tx.send(OutputEvent::Data(Bytes::copy_from_slice(&buf[..n])));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = reader_tx.send(OutputEvent::Fault(err.to_string()));
                    break;
                }
            }
        }
    });

    tokio::spawn(drain_stderr(stderr, pid));

    let cancel = CancellationToken::new();
    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    if let Err(err) = child.start_kill() {
                        warn!(pid, %err, "failed to kill model process");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(pid, %err, "failed to collect model process status");
                    None
                }
            };
            let _ = exit_tx.send(ExitInfo { code });
        }
    });

    Ok(SpawnedProcess {
        transport: Transport::Pipe(PipeTransport {
            stdin: Mutex::new(stdin),
            cancel,
        }),
        pid,
        output: output_tx,
        first_output,
        exit: exit_rx,
    })
}

/// Reads stderr to end of file so the child never blocks on a full pipe or
/// dies writing to a closed one. Lines need not be valid UTF-8.
async fn drain_stderr(stderr: impl AsyncRead + Unpin, pid: Option<u32>) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!(pid, line = %text.trim_end(), "model process stderr");
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(pid, %err, "model process stderr closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stderr_drain_survives_invalid_utf8() {
        let (mut child_side, our_side) = tokio::io::duplex(64);
        let drained = tokio::spawn(drain_stderr(our_side, None));

        child_side
            .write_all(b"\xff\xfe bad bytes\nstill logging\n")
            .await
            .expect("first write");
        // A closed read side would fail this write.
        child_side
            .write_all(&[b'x'; 256])
            .await
            .expect("drain keeps reading");
        drop(child_side);

        drained.await.expect("drain task");
    }
}
