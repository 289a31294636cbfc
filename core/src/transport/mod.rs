//! Byte transports for a supervised process.
//!
//! Both transports publish stdout (or the terminal) on a broadcast channel of
//! [`OutputEvent`]s and report the process's exit once over a oneshot.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::oneshot;

use crate::error::Result;

mod pipe;
mod pty;

pub(crate) use pipe::PipeTransport;
pub(crate) use pipe::spawn_pipe;
pub(crate) use pty::PtyTransport;
pub(crate) use pty::spawn_pty;

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 8192;

/// How the process is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Headless, line-delimited JSON over piped stdin/stdout/stderr.
    Dispatch,
    /// Raw pseudo-terminal for a human at the keyboard.
    Interact,
}

#[derive(Debug, Clone)]
pub enum OutputEvent {
    Data(Bytes),
    /// The output stream reached end of file.
    Closed,
    /// Reading the output stream failed.
    Fault(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// `None` when the process was terminated by a signal or its status could
    /// not be collected.
    pub code: Option<i32>,
}

#[derive(Debug, Clone)]
pub(crate) struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

pub(crate) struct SpawnedProcess {
    pub transport: Transport,
    pub pid: Option<u32>,
    pub output: broadcast::Sender<OutputEvent>,
    /// Subscribed before the reader started, so no early output is missed.
    pub first_output: broadcast::Receiver<OutputEvent>,
    pub exit: oneshot::Receiver<ExitInfo>,
}

pub(crate) fn output_channel() -> (
    broadcast::Sender<OutputEvent>,
    broadcast::Receiver<OutputEvent>,
) {
    broadcast::channel(OUTPUT_CHANNEL_CAPACITY)
}

pub(crate) enum Transport {
    Pipe(PipeTransport),
    Pty(PtyTransport),
}

impl Transport {
    pub(crate) fn mode(&self) -> Mode {
        match self {
            Transport::Pipe(_) => Mode::Dispatch,
            Transport::Pty(_) => Mode::Interact,
        }
    }

    pub(crate) async fn write(&self, bytes: &[u8]) -> Result<()> {
        match self {
            Transport::Pipe(pipe) => pipe.write(bytes).await,
            Transport::Pty(pty) => pty.write(bytes).await,
        }
    }

    /// Pipes have no window size; resizing them is a no-op.
    pub(crate) fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match self {
            Transport::Pipe(_) => Ok(()),
            Transport::Pty(pty) => pty.resize(cols, rows),
        }
    }

    /// Requests termination. Safe to call repeatedly.
    pub(crate) fn kill(&self) {
        match self {
            Transport::Pipe(pipe) => pipe.kill(),
            Transport::Pty(pty) => pty.kill(),
        }
    }
}

pub(crate) fn spawn(mode: Mode, request: SpawnRequest) -> Result<SpawnedProcess> {
    match mode {
        Mode::Dispatch => spawn_pipe(request),
        Mode::Interact => spawn_pty(request),
    }
}
