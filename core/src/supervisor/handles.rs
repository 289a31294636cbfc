use std::sync::Arc;

use super::ProcessInstance;
use super::Supervisor;
use crate::error::Result;
use crate::error::TetherErr;
use crate::transport::ExitInfo;
use crate::transport::Mode;

/// Process lifecycle controls of a [`Supervisor`].
pub struct Executor<'a> {
    supervisor: &'a Supervisor,
}

impl<'a> Executor<'a> {
    pub(super) fn new(supervisor: &'a Supervisor) -> Self {
        Self { supervisor }
    }

    /// The live process, or `None` when unbooted.
    pub fn instance(&self) -> Option<ProcessInstance> {
        self.supervisor.instance()
    }

    /// Replaces any live process with a fresh one in `mode`. Resolves only
    /// after the previous process has been observed to exit.
    pub async fn boot(&self, mode: Mode) -> Result<()> {
        self.supervisor.boot(mode).await
    }

    /// Requests termination of the live process, if any. Does not wait.
    pub fn kill(&self) {
        self.supervisor.kill();
    }
}

/// Raw byte access to the live process, for driving an interactive session.
pub struct Terminal<'a> {
    supervisor: &'a Supervisor,
}

impl<'a> Terminal<'a> {
    pub(super) fn new(supervisor: &'a Supervisor) -> Self {
        Self { supervisor }
    }

    pub async fn write(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        let live = self
            .supervisor
            .inner
            .live()
            .ok_or(TetherErr::TransportUnavailable)?;
        live.transport.write(bytes.as_ref()).await
    }

    /// Resizes the pseudo-terminal. Ignored for dispatch processes.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let live = self
            .supervisor
            .inner
            .live()
            .ok_or(TetherErr::TransportUnavailable)?;
        if live.instance.mode != Mode::Interact {
            return Ok(());
        }
        live.transport.resize(cols, rows)
    }

    /// Registers a callback for output of the current process and of every
    /// process spawned later on this handle.
    pub fn on_data(&self, listener: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.supervisor.inner.listeners.add_data(Arc::new(listener));
    }

    /// Registers a callback for the exit of the current process and of every
    /// process spawned later on this handle.
    pub fn on_exit(&self, listener: impl Fn(ExitInfo) + Send + Sync + 'static) {
        self.supervisor.inner.listeners.add_exit(Arc::new(listener));
    }
}
