use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowsmith_core::config::RunnerConfig;
use flowsmith_core::error::RunnerError;
use flowsmith_core::traits::{Environment, SecretResolver};
use flowsmith_core::{
    Credential, ExecutionResult, FlowsmithError, OutputStream, RunEvent, RunState, TargetForm,
    WrittenArtifact,
};

use crate::conflicts::ConflictChecker;
use crate::decode::{degradation, DecodedLine, LossyLinesCodec};
use crate::run_log::RunLog;

/// How long to keep reading output after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes written artifacts in an [`Environment`].
#[derive(Clone)]
pub struct Runner {
    environment: Arc<dyn Environment>,
    secrets: Arc<dyn SecretResolver>,
    config: RunnerConfig,
    conflicts: Option<Arc<ConflictChecker>>,
}

/// A run in progress.
pub struct RunHandle {
    /// Progress events. Closed once the run has finished.
    pub events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancellationToken,
    task: JoinHandle<ExecutionResult>,
    program: String,
}

impl RunHandle {
    /// Stop the run. The child process, if any, is killed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> ExecutionResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => ExecutionResult {
                state: RunState::Failed,
                exit_code: None,
                error: Some(RunnerError::Launch {
                    program: self.program,
                    message: format!("run task aborted: {}", e),
                }),
                tail: Vec::new(),
                degradations: Vec::new(),
                elapsed_ms: 0,
                log_path: None,
            },
        }
    }
}

impl Runner {
    pub fn new(
        environment: Arc<dyn Environment>,
        secrets: Arc<dyn SecretResolver>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            environment,
            secrets,
            config,
            conflicts: None,
        }
    }

    /// Check the environment for clashing packages once requirements are
    /// installed, before the artifact starts.
    pub fn with_conflict_checker(mut self, checker: ConflictChecker) -> Self {
        self.conflicts = Some(Arc::new(checker));
        self
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    /// Start executing `artifact` on its own task.
    pub fn start(&self, artifact: &WrittenArtifact) -> RunHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let run = Run {
            environment: self.environment.clone(),
            secrets: self.secrets.clone(),
            config: self.config.clone(),
            conflicts: self.conflicts.clone(),
            artifact: artifact.clone(),
            cancel: cancel.clone(),
            events: tx,
            state: RunState::Pending,
            tail: Tail::new(self.config.tail_lines),
            log: None,
            degraded: [0, 0],
            started: Instant::now(),
        };
        let task = tokio::spawn(run.execute());
        RunHandle {
            events,
            cancel,
            task,
            program: self.environment.interpreter().to_string(),
        }
    }

    /// Execute `artifact` and wait for the result, discarding progress events.
    pub async fn run(&self, artifact: &WrittenArtifact) -> ExecutionResult {
        self.start(artifact).wait().await
    }
}

/// Last `capacity` output lines.
struct Tail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Tail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

enum Outcome {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}

struct Run {
    environment: Arc<dyn Environment>,
    secrets: Arc<dyn SecretResolver>,
    config: RunnerConfig,
    conflicts: Option<Arc<ConflictChecker>>,
    artifact: WrittenArtifact,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<RunEvent>,
    state: RunState,
    tail: Tail,
    log: Option<RunLog>,
    // stdout, stderr
    degraded: [usize; 2],
    started: Instant,
}

impl Run {
    fn emit(&self, event: RunEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn transition(&mut self, next: RunState) {
        if let Err(e) = self.state.advance(next) {
            warn!(error = %e, "Ignoring run state change");
            return;
        }
        info!(artifact = %self.artifact.path.display(), state = %next, "Run state changed");
        self.emit(RunEvent::State(next));
    }

    fn finish(mut self, state: RunState, exit_code: Option<i32>, error: Option<RunnerError>) -> ExecutionResult {
        self.transition(state);
        let degradations = [OutputStream::Stdout, OutputStream::Stderr]
            .into_iter()
            .zip(self.degraded)
            .filter_map(|(stream, chunks)| degradation(stream, chunks))
            .collect();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if let Some(e) = &error {
            warn!(artifact = %self.artifact.path.display(), error = %e, elapsed_ms, "Run did not succeed");
        }
        let log_path = self.log.take().and_then(|mut log| {
            if let Some(e) = &error {
                if let Err(err) = log.note("error", &e.to_string()) {
                    warn!(error = %err, "Could not write run log");
                }
            }
            match log.close(self.state, exit_code, elapsed_ms) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Could not write run log");
                    None
                }
            }
        });
        ExecutionResult {
            state: self.state,
            exit_code,
            error,
            tail: self.tail.to_vec(),
            degradations,
            elapsed_ms,
            log_path,
        }
    }

    fn open_log(&mut self) {
        if !self.config.run_log {
            return;
        }
        let path = RunLog::path_for(&self.artifact);
        match RunLog::create(path) {
            Ok(log) => self.log = Some(log),
            Err(e) => warn!(error = %e, "Could not create run log, continuing without it"),
        }
    }

    fn write_log(&mut self, write: impl FnOnce(&mut RunLog) -> std::io::Result<()>) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(e) = write(log) {
            warn!(error = %e, "Could not write run log, continuing without it");
            self.log = None;
        }
    }

    fn fail(self, error: RunnerError) -> ExecutionResult {
        self.finish(RunState::Failed, None, Some(error))
    }

    fn record(&mut self, stream: OutputStream, line: DecodedLine) {
        if line.degraded {
            let slot = match stream {
                OutputStream::Stdout => 0,
                OutputStream::Stderr => 1,
            };
            if self.degraded[slot] == 0 {
                warn!(%stream, "Undecodable output replaced");
            }
            self.degraded[slot] += 1;
            self.emit(RunEvent::Degraded { stream });
        }
        self.write_log(|log| log.output(stream, &line.text));
        self.tail.push(line.text.clone());
        self.emit(RunEvent::Output {
            stream,
            line: line.text,
        });
    }

    async fn execute(mut self) -> ExecutionResult {
        self.emit(RunEvent::State(RunState::Pending));
        self.transition(RunState::Preparing);
        self.open_log();

        if let Err(e) = self.prepare().await {
            return self.fail(e);
        }
        if self.cancel.is_cancelled() {
            return self.fail(RunnerError::Cancelled);
        }

        self.transition(RunState::Executing);
        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => return self.fail(e),
        };

        let (line_tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, OutputStream::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, OutputStream::Stderr, line_tx.clone());
        }
        drop(line_tx);

        let deadline = self.config.timeout_secs.map(Duration::from_secs);
        let timeout = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        let outcome = loop {
            tokio::select! {
                Some((stream, line)) = lines.recv() => self.record(stream, line),
                status = child.wait() => match status {
                    Ok(status) => break Outcome::Exited(status),
                    Err(e) => {
                        let program = self.environment.interpreter().to_string();
                        return self.fail(RunnerError::Launch {
                            program,
                            message: e.to_string(),
                        });
                    }
                },
                _ = self.cancel.cancelled() => break Outcome::Cancelled,
                _ = &mut timeout => break Outcome::TimedOut,
            }
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill artifact process");
            }
        }

        // Pick up whatever was written before exit.
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some((stream, line)) = lines.recv().await {
                self.record(stream, line);
            }
        })
        .await;
        if drained.is_err() {
            debug!("Output still open after exit, stopped reading");
        }

        match outcome {
            Outcome::Cancelled => self.fail(RunnerError::Cancelled),
            Outcome::TimedOut => {
                warn!(timeout_secs = ?self.config.timeout_secs, "Run timed out");
                self.fail(RunnerError::Cancelled)
            }
            Outcome::Exited(status) => self.complete(status),
        }
    }

    async fn prepare(&mut self) -> Result<(), RunnerError> {
        self.install().await?;
        self.report_conflicts().await;
        Ok(())
    }

    async fn report_conflicts(&mut self) {
        let Some(checker) = self.conflicts.clone() else {
            return;
        };
        let snapshot = tokio::select! {
            snapshot = self.environment.snapshot() => snapshot,
            _ = self.cancel.cancelled() => return,
        };
        match snapshot {
            Ok(snapshot) => {
                for warning in checker.check(&snapshot).warnings {
                    let message = warning.to_string();
                    self.write_log(|log| log.note("conflict", &message));
                    self.emit(RunEvent::Conflict { message });
                }
            }
            Err(e) => warn!(error = %e, "Could not inspect environment for conflicts"),
        }
    }

    async fn install(&mut self) -> Result<(), RunnerError> {
        if !self.config.install_requirements || self.artifact.requirements.is_empty() {
            return Ok(());
        }
        let packages = self.artifact.requirements.clone();
        let installed = tokio::select! {
            result = self.environment.install(packages.clone()) => result,
            _ = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
        };
        match installed {
            Ok(report) => {
                debug!(count = report.installed.len(), "Requirements installed");
            }
            Err(FlowsmithError::Runner(e)) => return Err(e),
            Err(e) => {
                return Err(RunnerError::InstallFailure {
                    packages,
                    message: e.to_string(),
                })
            }
        }
        if let Err(e) = self.environment.reload().await {
            warn!(error = %e, "Could not reload environment after install");
        }
        Ok(())
    }

    fn spawn(&self) -> Result<Child, RunnerError> {
        let program = self.environment.interpreter();
        let mut cmd = Command::new(program);
        if self.artifact.form == TargetForm::Notebook {
            cmd.args(&self.config.notebook_args);
        }
        cmd.arg(&self.artifact.path)
            .current_dir(self.artifact.dir())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for var in &self.artifact.credential_env {
            let credential = Credential::Env { var: var.clone() };
            match self.secrets.resolve(&credential) {
                Some(value) => {
                    cmd.env(var, value);
                }
                None => debug!(%var, "Credential not resolved, left to the environment"),
            }
        }

        debug!(program, path = %self.artifact.path.display(), "Spawning artifact");
        cmd.spawn().map_err(|e| RunnerError::Launch {
            program: program.to_string(),
            message: e.to_string(),
        })
    }

    fn complete(self, status: ExitStatus) -> ExecutionResult {
        if status.success() {
            return self.finish(RunState::Succeeded, Some(0), None);
        }
        let tail = self.tail.to_vec();
        match status.code() {
            Some(exit_code) => self.finish(
                RunState::Failed,
                Some(exit_code),
                Some(RunnerError::ExecutionFailure { exit_code, tail }),
            ),
            None => {
                let signal = exit_signal(&status);
                self.finish(
                    RunState::Crashed,
                    None,
                    Some(RunnerError::ExecutionCrash { signal, tail }),
                )
            }
        }
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, DecodedLine)>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, LossyLinesCodec::new());
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(line) => {
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%stream, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
