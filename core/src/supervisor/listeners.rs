use std::sync::Arc;
use std::sync::Mutex;

use crate::transport::ExitInfo;
use crate::util::MutexExt;

pub(crate) type DataListener = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub(crate) type ExitListener = Arc<dyn Fn(ExitInfo) + Send + Sync>;

/// Callbacks registered on the handle. They survive every reboot and receive
/// events from whichever process is current.
#[derive(Default)]
pub(crate) struct Listeners {
    data: Mutex<Vec<DataListener>>,
    exit: Mutex<Vec<ExitListener>>,
}

impl Listeners {
    pub(crate) fn add_data(&self, listener: DataListener) {
        self.data.lock_unchecked().push(listener);
    }

    pub(crate) fn add_exit(&self, listener: ExitListener) {
        self.exit.lock_unchecked().push(listener);
    }

    // Snapshots are taken so a callback may register further listeners.
    pub(crate) fn emit_data(&self, chunk: &[u8]) {
        let listeners = self.data.lock_unchecked().clone();
        for listener in listeners {
            listener(chunk);
        }
    }

    pub(crate) fn emit_exit(&self, info: ExitInfo) {
        let listeners = self.exit.lock_unchecked().clone();
        for listener in listeners {
            listener(info);
        }
    }
}
