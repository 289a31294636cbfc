//! Lifecycle owner for one model process and its conversation record.
//!
//! A [`Supervisor`] holds at most one live process. Dispatch turns
//! ([`Supervisor::ask`], [`Supervisor::act`]) run over pipes; an interactive
//! terminal runs over a pseudo-terminal. Switching mode or task category
//! respawns the process, while the [`Series`] and the registered listeners
//! stay with the handle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::Shared;
use tether_protocol::InputEnvelope;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::accounting::Metrics;
use crate::accounting::finalize;
use crate::args::dispatch_args;
use crate::args::interact_args;
use crate::config::Config;
use crate::config::ModelConfig;
use crate::config::TaskCategory;
use crate::decoder::decode_turn;
use crate::error::ExecutionStateError;
use crate::error::Result;
use crate::reconcile::Placement;
use crate::reconcile::reconcile;
use crate::record::Exchange;
use crate::record::Series;
use crate::transport::ExitInfo;
use crate::transport::Mode;
use crate::transport::OutputEvent;
use crate::transport::SpawnRequest;
use crate::transport::Transport;
use crate::transport::spawn;
use crate::util::MutexExt;

mod handles;
mod listeners;

pub use handles::Executor;
pub use handles::Terminal;
use listeners::Listeners;

type ExitSignal = Shared<oneshot::Receiver<ExitInfo>>;

/// Observable facts about the live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInstance {
    /// Monotonic per handle; identifies this spawn among all reboots.
    pub generation: u64,
    pub pid: Option<u32>,
    pub mode: Mode,
    pub category: TaskCategory,
}

/// Result of one dispatch turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub output: String,
    pub metrics: Metrics,
    pub exchange: Exchange,
    pub session_id: Option<String>,
    pub placement: Placement,
}

#[derive(Clone)]
struct LiveProcess {
    instance: ProcessInstance,
    transport: Arc<Transport>,
    output: broadcast::Sender<OutputEvent>,
    exited: ExitSignal,
}

enum ProcessState {
    Unbooted,
    Live(LiveProcess),
}

struct Inner {
    model: ModelConfig,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    state: Mutex<ProcessState>,
    series: Mutex<Option<Series>>,
    category: Mutex<TaskCategory>,
    generations: AtomicU64,
    listeners: Listeners,
}

impl Inner {
    fn live(&self) -> Option<LiveProcess> {
        match &*self.state.lock_unchecked() {
            ProcessState::Live(live) => Some(live.clone()),
            ProcessState::Unbooted => None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(
            &*self.state.lock_unchecked(),
            ProcessState::Live(live) if live.instance.generation == generation
        )
    }

    fn forward_data(&self, generation: u64, chunk: &[u8]) {
        if self.is_current(generation) {
            self.listeners.emit_data(chunk);
        }
    }

    /// Clears the state only if `generation` is still the stored process; a
    /// late notification from a superseded process is dropped.
    fn observe_exit(&self, generation: u64, info: ExitInfo) {
        let honored = {
            let mut state = self.state.lock_unchecked();
            match &*state {
                ProcessState::Live(live) if live.instance.generation == generation => {
                    *state = ProcessState::Unbooted;
                    true
                }
                _ => false,
            }
        };
        if honored {
            info!(generation, code = info.code, "model process exited");
            self.listeners.emit_exit(info);
        } else {
            debug!(generation, "ignoring exit of superseded model process");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let ProcessState::Live(live) = &*self.state.lock_unchecked() {
            live.transport.kill();
        }
    }
}

pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                model,
                cwd: None,
                env: BTreeMap::new(),
                state: Mutex::new(ProcessState::Unbooted),
                series: Mutex::new(None),
                category: Mutex::new(TaskCategory::default()),
                generations: AtomicU64::new(0),
                listeners: Listeners::default(),
            }),
        }
    }

    /// Routes `model_id` through `config` and builds an unbooted handle.
    pub fn from_config(config: &Config, model_id: &str) -> Result<Self> {
        Ok(Self::new(config.route(model_id)?.clone()))
    }

    /// Working directory for spawned processes. Process options take effect
    /// only before the first boot; later calls are ignored with a warning.
    pub fn with_cwd(self, cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        self.configure("cwd", |inner| inner.cwd = Some(cwd))
    }

    pub fn with_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.configure("env", |inner| {
            inner.env.insert(key, value);
        })
    }

    /// Spawned processes hold a weak reference, so exclusive access means no
    /// process has been spawned from this handle.
    fn configure(mut self, option: &'static str, apply: impl FnOnce(&mut Inner)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => apply(inner),
            None => warn!(
                option,
                "ignoring process option on a handle that has already spawned"
            ),
        }
        self
    }

    /// Seeds the handle with a record saved from an earlier handle, so the
    /// next spawn resumes its session.
    pub fn with_series(self, series: Series) -> Self {
        *self.inner.series.lock_unchecked() = Some(series);
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.inner.model
    }

    /// The durable record. Only completed turns modify it.
    pub fn series(&self) -> Option<Series> {
        self.inner.series.lock_unchecked().clone()
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(self)
    }

    pub fn terminal(&self) -> Terminal<'_> {
        Terminal::new(self)
    }

    /// Runs one read-only turn.
    pub async fn ask(&self, prompt: &str) -> Result<TurnOutcome> {
        self.dispatch(prompt, TaskCategory::ReadOnly).await
    }

    /// Runs one turn with write and execute tools enabled.
    pub async fn act(&self, prompt: &str) -> Result<TurnOutcome> {
        self.dispatch(prompt, TaskCategory::Escalated).await
    }

    fn instance(&self) -> Option<ProcessInstance> {
        self.inner.live().map(|live| live.instance)
    }

    fn kill(&self) {
        if let Some(live) = self.inner.live() {
            info!(generation = live.instance.generation, "killing model process");
            live.transport.kill();
        }
    }

    async fn boot(&self, mode: Mode) -> Result<()> {
        if let Some(previous) = self.inner.live() {
            info!(
                generation = previous.instance.generation,
                "terminating model process before reboot"
            );
            previous.transport.kill();
            if previous.exited.await.is_err() {
                warn!(
                    generation = previous.instance.generation,
                    "exit watcher dropped without reporting"
                );
            }
        }

        let category = *self.inner.category.lock_unchecked();
        let prior_session = self.series().and_then(|series| series.id);
        let model = &self.inner.model;
        let args = match mode {
            Mode::Dispatch => dispatch_args(model, category, prior_session.as_deref()),
            Mode::Interact => interact_args(model, prior_session.as_deref()),
        };
        let spawned = spawn(
            mode,
            SpawnRequest {
                program: model.binary.clone(),
                args,
                cwd: self.inner.cwd.clone(),
                env: self.inner.env.clone(),
            },
        )?;

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let instance = ProcessInstance {
            generation,
            pid: spawned.pid,
            mode: spawned.transport.mode(),
            category,
        };
        info!(
            generation,
            pid = spawned.pid,
            ?mode,
            ?category,
            resume = prior_session.as_deref(),
            "spawned model process"
        );

        let (exited_tx, exited_rx) = oneshot::channel();
        *self.inner.state.lock_unchecked() = ProcessState::Live(LiveProcess {
            instance,
            transport: Arc::new(spawned.transport),
            output: spawned.output,
            exited: exited_rx.shared(),
        });

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(forward_output(
            Weak::clone(&weak),
            generation,
            spawned.first_output,
        ));
        tokio::spawn(watch_exit(weak, generation, spawned.exit, exited_tx));
        Ok(())
    }

    async fn dispatch(&self, prompt: &str, category: TaskCategory) -> Result<TurnOutcome> {
        let mut live = self
            .inner
            .live()
            .ok_or(ExecutionStateError::NoLiveProcess)?;
        if live.instance.mode == Mode::Interact {
            return Err(ExecutionStateError::WrongMode.into());
        }
        *self.inner.category.lock_unchecked() = category;
        if live.instance.category != category {
            info!(
                from = ?live.instance.category,
                to = ?category,
                "respawning model process for task category"
            );
            self.boot(Mode::Dispatch).await?;
            live = self
                .inner
                .live()
                .ok_or(ExecutionStateError::NoLiveProcess)?;
        }

        let session_id = self.series().and_then(|series| series.id);
        let line = InputEnvelope::user(prompt, session_id).to_line()?;
        // Subscribe before writing so the reply cannot race past the decoder.
        let output = live.output.subscribe();
        live.transport.write(line.as_bytes()).await?;
        let decoded = decode_turn(output).await?;

        let turn = finalize(&decoded, prompt, &self.inner.model.rates);
        let placement = {
            let mut series = self.inner.series.lock_unchecked();
            let (next, placement) = reconcile(
                series.as_ref(),
                turn.exchange.clone(),
                decoded.session_id.as_deref(),
                decoded.compacted,
            );
            *series = Some(next);
            placement
        };

        Ok(TurnOutcome {
            output: turn.output,
            metrics: turn.metrics,
            exchange: turn.exchange,
            session_id: decoded.session_id,
            placement,
        })
    }
}

async fn forward_output(
    inner: Weak<Inner>,
    generation: u64,
    mut output: broadcast::Receiver<OutputEvent>,
) {
    loop {
        match output.recv().await {
            Ok(OutputEvent::Data(chunk)) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.forward_data(generation, &chunk);
            }
            Ok(OutputEvent::Closed) | Ok(OutputEvent::Fault(_)) => break,
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(generation, skipped, "data listeners fell behind the output stream");
            }
        }
    }
}

async fn watch_exit(
    inner: Weak<Inner>,
    generation: u64,
    exit: oneshot::Receiver<ExitInfo>,
    exited: oneshot::Sender<ExitInfo>,
) {
    let info = exit.await.unwrap_or_default();
    if let Some(inner) = inner.upgrade() {
        inner.observe_exit(generation, info);
    }
    let _ = exited.send(info);
}
