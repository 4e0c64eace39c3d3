use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    io::AsyncWriteExt,
    process::{self, ChildStdin},
    sync::{Mutex, broadcast::error::RecvError},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{
        SupervisorConfig,
        stream::{EventPayload, InstanceEvent, LogLine},
    },
    error::ServerError,
    parser::{PlayerList, parse_player_list},
    utils::probe,
};

use super::{
    InstanceMeta, InstanceState, InstanceStatus, Metrics, OutputSink, OutputSubscription,
    SinkSubscription,
    metrics::sample_usage,
    relay::{OutputRelay, Shared},
};

/// The child we launched, as seen from the control side.
#[derive(Debug)]
struct RunningProcess {
    run_id: u64,
    stdin: Option<ChildStdin>,
    kill: CancellationToken,
    relay: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    Graceful,
    Kill,
}

/// Lifecycle control of one server process.
///
/// Control operations (`start`, `stop`, `kill`, `restart`, `send_command`)
/// are serialized per instance. Output handling runs on the relay task and
/// only ever contends for the short runtime lock.
#[derive(Debug)]
pub struct InstanceHandle {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<RunningProcess>>,
    /// Parent of every sink subscription handed out.
    monitors: CancellationToken,
}

impl InstanceHandle {
    pub fn new(meta: InstanceMeta, dir: PathBuf, config: Arc<SupervisorConfig>) -> Self {
        Self {
            shared: Arc::new(Shared::new(meta, dir, config)),
            lifecycle: Mutex::new(None),
            monitors: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Changes whenever the state does; used to invalidate cached metrics.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Current record, without the log history.
    pub async fn meta(&self) -> InstanceMeta {
        self.shared.runtime.lock().await.meta.clone()
    }

    pub async fn state(&self) -> InstanceState {
        self.shared.runtime.lock().await.meta.state
    }

    pub async fn status(&self) -> InstanceStatus {
        if self.is_detached().await {
            self.reconcile().await;
        }

        let rt = self.shared.runtime.lock().await;
        let uptime = match (rt.meta.state.is_live(), rt.meta.started_at) {
            (true, Some(since)) => (Utc::now() - since).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };

        InstanceStatus {
            state: rt.meta.state,
            started_at: rt.meta.started_at,
            uptime,
        }
    }

    /// Starting or Online.
    pub async fn is_running(&self) -> bool {
        self.state().await.is_live()
    }

    /// Online per the liveness probe, but not a child of this process.
    pub async fn is_detached(&self) -> bool {
        self.shared.runtime.lock().await.detached
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared.runtime.lock().await.pid
    }

    pub async fn logs(&self) -> Vec<LogLine> {
        self.shared.runtime.lock().await.logs.snapshot().into()
    }

    pub async fn persist(&self) -> Result<(), ServerError> {
        let rt = self.shared.runtime.lock().await;
        self.shared
            .persist(&rt)
            .await
            .map_err(|err| ServerError::FileIO(err.to_string()))
    }

    /// Re-derives the state of a record read from disk.
    ///
    /// The port probe is authoritative: a listener means the server outlived
    /// a previous supervisor and is treated as Online but detached; no
    /// listener means Offline, whatever the record said.
    pub async fn reconcile(&self) {
        let port = self.shared.runtime.lock().await.meta.port;
        let alive = probe(port, self.shared.config.probe_timeout).await;

        let mut rt = self.shared.runtime.lock().await;
        let recorded = rt.meta.state;

        if alive {
            if recorded != InstanceState::Online || !rt.detached {
                warn!(instance = %self.shared.name, port, %recorded, "server is reachable without a supervised process; marking online (detached)");
            }
            rt.detached = true;
            rt.pid = None;
            self.shared.transition(&mut rt, InstanceState::Online).await;
        } else if recorded != InstanceState::Offline {
            info!(instance = %self.shared.name, port, %recorded, "server not reachable; marking offline");
            self.shared.transition(&mut rt, InstanceState::Offline).await;
        }
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        let mut slot = self.lifecycle.lock().await;
        self.start_locked(&mut slot).await
    }

    /// Graceful stop. A no-op on an Offline instance.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut slot = self.lifecycle.lock().await;
        self.stop_locked(&mut slot, StopMode::Graceful).await
    }

    pub async fn kill(&self) -> Result<(), ServerError> {
        let mut slot = self.lifecycle.lock().await;
        self.stop_locked(&mut slot, StopMode::Kill).await
    }

    pub async fn restart(&self) -> Result<(), ServerError> {
        let mut slot = self.lifecycle.lock().await;
        self.stop_locked(&mut slot, StopMode::Graceful).await?;
        self.start_locked(&mut slot).await
    }

    /// Writes one line to the server console. Dropped when no process is attached.
    pub async fn send_command<S: Into<String>>(&self, cmd: S) {
        let mut slot = self.lifecycle.lock().await;
        let Some(process) = slot.as_mut() else {
            debug!(instance = %self.shared.name, "no process attached; command dropped");
            return;
        };
        if process.relay.is_finished() {
            debug!(instance = %self.shared.name, "process has exited; command dropped");
            return;
        }
        if let Some(stdin) = process.stdin.as_mut() {
            let mut command = cmd.into();
            if !command.ends_with('\n') {
                command.push('\n');
            }
            write_line(stdin, &command, &self.shared.name).await;
        }
    }

    /// Resolves once the instance reaches Online.
    ///
    /// `EarlyCrash` when the process exits first, `Timeout` past `limit`.
    pub async fn wait_until_online(&self, limit: Duration) -> Result<(), ServerError> {
        let mut rx = self.shared.events.subscribe();
        {
            let rt = self.shared.runtime.lock().await;
            match rt.meta.state {
                InstanceState::Online => return Ok(()),
                // a run already came and went
                InstanceState::Offline if rt.run_id > 0 => return Err(ServerError::EarlyCrash),
                InstanceState::Offline | InstanceState::Stopping => {
                    return Err(ServerError::NotRunning);
                }
                InstanceState::Starting => {}
            }
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(InstanceEvent {
                        payload: EventPayload::StateChange { new, .. },
                        ..
                    }) => match new {
                        InstanceState::Online => return Ok(()),
                        InstanceState::Offline => return Err(ServerError::EarlyCrash),
                        InstanceState::Stopping => return Err(ServerError::NotRunning),
                        InstanceState::Starting => continue,
                    },
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => match self.state().await {
                        InstanceState::Online => return Ok(()),
                        InstanceState::Offline => return Err(ServerError::EarlyCrash),
                        _ => continue,
                    },
                    Err(RecvError::Closed) => return Err(ServerError::NotRunning),
                }
            }
        };

        timeout(limit, wait)
            .await
            .map_err(|_| ServerError::Timeout)?
    }

    /// Issues `list` and parses the reply.
    pub async fn players(&self) -> Result<BTreeSet<String>, ServerError> {
        Ok(self.player_list().await?.players)
    }

    async fn player_list(&self) -> Result<PlayerList, ServerError> {
        {
            let rt = self.shared.runtime.lock().await;
            if rt.meta.state != InstanceState::Online || rt.detached {
                return Err(ServerError::NotRunning);
            }
        }

        let mut rx = self.shared.events.subscribe();
        self.send_command("list").await;

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(InstanceEvent {
                        payload: EventPayload::Line { line },
                        ..
                    }) => {
                        if let Some(list) = parse_player_list(&line) {
                            return Ok(list);
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(ServerError::NotRunning),
                }
            }
        };

        timeout(self.shared.config.player_query_timeout, wait)
            .await
            .map_err(|_| ServerError::Timeout)?
    }

    /// Best-effort usage figures; zeroed fields for anything unavailable.
    pub async fn metrics(&self) -> Metrics {
        let status = self.status().await;
        if status.state != InstanceState::Online {
            return Metrics::default();
        }

        let usage = match self.pid().await {
            Some(pid) => {
                let cfg = &self.shared.config;
                sample_usage(pid, cfg.sample_window, cfg.sample_timeout).await
            }
            None => Default::default(),
        };

        // names may follow on a later line
        let player_count = match self.player_list().await {
            Ok(list) => (list.online as usize).max(list.players.len()),
            Err(err) => {
                debug!(instance = %self.shared.name, error = %err, "player count unavailable");
                0
            }
        };

        Metrics {
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb(),
            player_count,
            uptime: status.uptime,
        }
    }

    /// Buffered history, then live lines.
    pub async fn subscribe_output(&self) -> OutputSubscription {
        self.shared.subscribe_output().await
    }

    /// Raw event feed: state changes and lines, live only.
    pub fn subscribe_events(&self) -> BroadcastStream<InstanceEvent> {
        BroadcastStream::new(self.shared.events.subscribe())
    }

    pub async fn subscribe_sink<S: OutputSink>(&self, sink: S) -> SinkSubscription {
        SinkSubscription::spawn(
            self.subscribe_output().await,
            sink,
            self.monitors.child_token(),
        )
    }

    /// Ends every sink subscription of this instance.
    pub fn close_monitors(&self) {
        self.monitors.cancel();
    }

    async fn start_locked(&self, slot: &mut Option<RunningProcess>) -> Result<(), ServerError> {
        let (min_mb, max_mb, artifact) = {
            let rt = self.shared.runtime.lock().await;
            if rt.meta.state != InstanceState::Offline {
                return Err(ServerError::AlreadyRunning);
            }
            (
                rt.meta.min_memory_mb,
                rt.meta.max_memory_mb,
                rt.meta.artifact_path.clone(),
            )
        };

        if let Some(stale) = slot.take() {
            self.discard(stale).await;
        }

        let java = &self.shared.config.java_path;
        let args = launch_args(min_mb, max_mb, &artifact);
        let mut command = self.build_start_command(java, &args);

        let mut child = command.spawn().map_err(|err| {
            error!(instance = %self.shared.name, java = %java.display(), error = %err, "failed to spawn server process");
            ServerError::ProcessSpawnFailed(format!("{}: {err}", java.display()))
        })?;

        let (stdout, stderr, stdin) =
            match (child.stdout.take(), child.stderr.take(), child.stdin.take()) {
                (Some(stdout), Some(stderr), Some(stdin)) => (stdout, stderr, stdin),
                missing => {
                    let _ = child.start_kill();
                    return Err(match missing {
                        (None, _, _) => ServerError::NoStdoutPipe,
                        (_, None, _) => ServerError::NoStderrPipe,
                        _ => ServerError::NoStdinPipe,
                    });
                }
            };

        let kill = CancellationToken::new();
        let mut rt = self.shared.runtime.lock().await;
        rt.run_id += 1;
        let run_id = rt.run_id;
        rt.pid = child.id();
        rt.detached = false;

        let launch = format!(
            "Started server with command: {} {}",
            java.display(),
            args.join(" ")
        );
        self.shared.publish(&mut rt, LogLine::supervisor(launch));
        self.shared.transition(&mut rt, InstanceState::Starting).await;

        let relay = OutputRelay::spawn(
            self.shared.clone(),
            run_id,
            Some(child),
            stdout,
            stderr,
            kill.clone(),
        );
        info!(instance = %self.shared.name, pid = ?rt.pid, run_id, "server process started");
        drop(rt);

        *slot = Some(RunningProcess {
            run_id,
            stdin: Some(stdin),
            kill,
            relay,
        });
        Ok(())
    }

    fn build_start_command(&self, java: &Path, args: &[String]) -> process::Command {
        let mut command = process::Command::new(java);
        command
            .args(args)
            .current_dir(&self.shared.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);
        command
    }

    async fn stop_locked(
        &self,
        slot: &mut Option<RunningProcess>,
        mode: StopMode,
    ) -> Result<(), ServerError> {
        let (state, detached) = {
            let rt = self.shared.runtime.lock().await;
            (rt.meta.state, rt.detached)
        };

        if state == InstanceState::Offline {
            if let Some(stale) = slot.take() {
                self.discard(stale).await;
            }
            return match mode {
                StopMode::Graceful => Ok(()),
                StopMode::Kill => Err(ServerError::NotRunning),
            };
        }

        let Some(mut process) = slot.take() else {
            if detached {
                warn!(instance = %self.shared.name, "server was not started by this supervisor; cannot stop it");
                return Err(ServerError::NotRunning);
            }
            self.force_offline("no process attached").await;
            return Ok(());
        };

        {
            let mut rt = self.shared.runtime.lock().await;
            if rt.meta.state.is_live() {
                self.shared.transition(&mut rt, InstanceState::Stopping).await;
            }
        }

        match mode {
            StopMode::Graceful => {
                if let Some(mut stdin) = process.stdin.take() {
                    write_line(&mut stdin, "stop\n", &self.shared.name).await;
                }
            }
            StopMode::Kill => {
                info!(instance = %self.shared.name, "killing server process");
                process.stdin = None;
                process.kill.cancel();
            }
        }

        self.join_relay(&mut process).await;
        self.force_offline("relay did not finalize the run").await;
        debug!(instance = %self.shared.name, run_id = process.run_id, "run finished");
        Ok(())
    }

    /// Waits out the relay, escalating to a kill after `stop_timeout`.
    async fn join_relay(&self, process: &mut RunningProcess) {
        let cfg = &self.shared.config;

        if timeout(cfg.stop_timeout, &mut process.relay).await.is_ok() {
            return;
        }

        warn!(
            instance = %self.shared.name,
            timeout_ms = cfg.stop_timeout.as_millis() as u64,
            "server did not stop in time; killing it"
        );
        process.kill.cancel();

        if timeout(cfg.kill_grace, &mut process.relay).await.is_err() {
            error!(instance = %self.shared.name, "output relay still running after kill; abandoning it");
            process.relay.abort();
        }
    }

    async fn discard(&self, mut stale: RunningProcess) {
        if stale.relay.is_finished() {
            return;
        }
        stale.kill.cancel();
        if timeout(self.shared.config.kill_grace, &mut stale.relay).await.is_err() {
            stale.relay.abort();
        }
    }

    async fn force_offline(&self, reason: &str) {
        let mut rt = self.shared.runtime.lock().await;
        if rt.meta.state != InstanceState::Offline {
            warn!(instance = %self.shared.name, reason, "forcing instance offline");
            self.shared.transition(&mut rt, InstanceState::Offline).await;
        }
    }
}

fn launch_args(min_mb: u32, max_mb: u32, artifact: &Path) -> Vec<String> {
    vec![
        format!("-Xmx{max_mb}M"),
        format!("-Xms{min_mb}M"),
        "-jar".to_string(),
        artifact.display().to_string(),
        "nogui".to_string(),
    ]
}

async fn write_line(stdin: &mut ChildStdin, line: &str, name: &str) -> bool {
    let written = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;

    match written {
        Ok(()) => true,
        Err(err) => {
            debug!(instance = name, error = %err, "console input closed");
            false
        }
    }
}
