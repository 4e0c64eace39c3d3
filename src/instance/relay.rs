use std::{
    collections::VecDeque,
    path::PathBuf,
    process::ExitStatus,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{
        SupervisorConfig,
        stream::{InstanceEvent, LogLine, StreamSource},
    },
    parser::is_ready,
    utils::write_json_atomic,
};

use super::{InstanceMeta, InstanceState, OutputSubscription};

pub const META_DIR: &str = ".craftvisor";
pub const META_FILE: &str = "instance.json";

const LINE_CHANNEL: usize = 1024;

/// Bounded, oldest-first line history of one instance.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_lines: usize,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    pub fn push(&mut self, line: LogLine) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub fn snapshot(&self) -> VecDeque<LogLine> {
        self.lines.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }
}

/// Mutable state of an instance. Guarded by `Shared::runtime`.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub meta: InstanceMeta,
    pub logs: LogBuffer,
    /// Fences off relays of earlier runs.
    pub run_id: u64,
    pub pid: Option<u32>,
    /// Online per the liveness probe, with no child attached to us.
    pub detached: bool,
}

/// State shared between the public handle and the relay worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub name: String,
    pub dir: PathBuf,
    pub config: Arc<SupervisorConfig>,
    pub runtime: Mutex<Runtime>,
    pub events: broadcast::Sender<InstanceEvent>,
    /// Bumped on every state change; metrics cache entries are keyed on it.
    pub generation: AtomicU64,
}

impl Shared {
    pub fn new(mut meta: InstanceMeta, dir: PathBuf, config: Arc<SupervisorConfig>) -> Self {
        let mut logs = LogBuffer::new(config.log_max_lines);
        for text in std::mem::take(&mut meta.logs) {
            logs.push(LogLine::stdout(text));
        }

        let (events, _) = broadcast::channel(config.subscriber_queue.max(16));

        Self {
            name: meta.name.clone(),
            dir,
            config,
            runtime: Mutex::new(Runtime {
                meta,
                logs,
                run_id: 0,
                pid: None,
                detached: false,
            }),
            events,
            generation: AtomicU64::new(0),
        }
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_DIR).join(META_FILE)
    }

    pub async fn persist(&self, rt: &Runtime) -> std::io::Result<()> {
        let mut record = rt.meta.clone();
        record.logs = rt.logs.texts();
        write_json_atomic(&self.meta_path(), &record).await
    }

    /// Applies a transition, keeps `started_at` consistent and persists.
    pub async fn transition(&self, rt: &mut Runtime, new: InstanceState) {
        let old = rt.meta.state;
        rt.meta.state = new;
        rt.meta.started_at = match new {
            InstanceState::Online if old == InstanceState::Online => {
                rt.meta.started_at.or_else(|| Some(Utc::now()))
            }
            InstanceState::Starting | InstanceState::Online => Some(Utc::now()),
            InstanceState::Stopping | InstanceState::Offline => None,
        };
        if new == InstanceState::Offline {
            rt.pid = None;
            rt.detached = false;
        }

        if old != new {
            self.generation.fetch_add(1, Ordering::SeqCst);
            info!(instance = %self.name, %old, %new, "state transition");
            let _ = self.events.send(InstanceEvent::state_change(old, new));
        }

        if let Err(err) = self.persist(rt).await {
            error!(instance = %self.name, error = %err, "failed to persist instance metadata");
        }
    }

    /// Appends to the buffer and fans out, in one step under the runtime lock.
    pub fn publish(&self, rt: &mut Runtime, line: LogLine) {
        rt.logs.push(line.clone());
        let _ = self.events.send(InstanceEvent::line(line));
    }

    /// Backlog snapshot and live receiver taken atomically.
    pub async fn subscribe_output(&self) -> OutputSubscription {
        let rt = self.runtime.lock().await;
        let backlog = rt.logs.snapshot();
        let live = self.events.subscribe();
        drop(rt);
        OutputSubscription::new(backlog, live)
    }

    async fn on_line(&self, run_id: u64, line: LogLine) {
        let mut rt = self.runtime.lock().await;
        if rt.run_id != run_id {
            debug!(instance = %self.name, run_id, "dropping line from a stale run");
            return;
        }

        let ready = rt.meta.state == InstanceState::Starting
            && is_ready(&line, &self.config.ready_sentinel);
        self.publish(&mut rt, line);

        if ready {
            self.transition(&mut rt, InstanceState::Online).await;
        }
    }

    async fn on_exit(&self, run_id: u64, exit: Option<ExitStatus>) {
        let mut rt = self.runtime.lock().await;
        if rt.run_id != run_id {
            return;
        }

        let status = exit
            .map(|s| s.to_string())
            .unwrap_or_else(|| "exit status unknown".to_string());

        match rt.meta.state {
            InstanceState::Starting | InstanceState::Online => {
                warn!(instance = %self.name, %status, "server output closed unexpectedly; treating as crash");
                self.publish(
                    &mut rt,
                    LogLine::supervisor(format!("Server process exited unexpectedly ({status})")),
                );
                self.transition(&mut rt, InstanceState::Offline).await;
            }
            InstanceState::Stopping => {
                info!(instance = %self.name, %status, "server process exited");
                self.publish(&mut rt, LogLine::supervisor(format!("Server stopped ({status})")));
                self.transition(&mut rt, InstanceState::Offline).await;
            }
            InstanceState::Offline => {
                rt.pid = None;
            }
        }
    }
}

/// Drains a run's stdout/stderr on a dedicated task and owns the child.
pub(crate) struct OutputRelay;

impl OutputRelay {
    /// `kill` forces termination; the task ends once both streams hit EOF
    /// and the child has been reaped.
    pub fn spawn<O, E>(
        shared: Arc<Shared>,
        run_id: u64,
        child: Option<Child>,
        stdout: O,
        stderr: E,
        kill: CancellationToken,
    ) -> JoinHandle<()>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<LogLine>(LINE_CHANNEL);
            let readers = [
                tokio::spawn(pump(stdout, StreamSource::Stdout, tx.clone())),
                tokio::spawn(pump(stderr, StreamSource::Stderr, tx)),
            ];

            let mut child = child;
            let mut killed = false;

            loop {
                tokio::select! {
                    maybe_line = rx.recv() => match maybe_line {
                        Some(line) => shared.on_line(run_id, line).await,
                        None => break,
                    },
                    _ = kill.cancelled(), if !killed => {
                        killed = true;
                        if let Some(child) = child.as_mut() {
                            terminate(child, &shared.name);
                        }
                    }
                }
            }

            for reader in readers {
                if let Err(err) = reader.await {
                    warn!(instance = %shared.name, error = %err, "output reader task failed");
                }
            }

            let exit = match child.as_mut() {
                Some(child) => reap(child, &kill, killed, &shared.name).await,
                None => None,
            };

            shared.on_exit(run_id, exit).await;
        })
    }
}

async fn pump<R>(reader: R, source: StreamSource, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(LogLine::new(text, source)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(?source, error = %err, "output stream unreadable; closing reader");
                break;
            }
        }
    }
}

async fn reap(
    child: &mut Child,
    kill: &CancellationToken,
    killed: bool,
    name: &str,
) -> Option<ExitStatus> {
    if !killed {
        tokio::select! {
            status = child.wait() => return log_wait(status, name),
            _ = kill.cancelled() => {}
        }
        terminate(child, name);
    }
    log_wait(child.wait().await, name)
}

fn log_wait(status: std::io::Result<ExitStatus>, name: &str) -> Option<ExitStatus> {
    match status {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(instance = name, error = %err, "failed to reap server process");
            None
        }
    }
}

/// SIGKILL to the child's process group (set up at spawn), then to the child.
fn terminate(child: &mut Child, name: &str) {
    if let Some(pid) = child.id() {
        kill_group(pid, name);
    }

    if let Err(err) = child.start_kill() {
        debug!(instance = name, error = %err, "child kill failed (already exited?)");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32, name: &str) {
    let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if rc != 0 {
        debug!(instance = name, pid, "process group kill failed; falling back to child kill");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32, _name: &str) {}
