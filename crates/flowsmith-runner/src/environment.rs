use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use flowsmith_core::config::{BusyPolicy, RunnerConfig};
use flowsmith_core::error::RunnerError;
use flowsmith_core::traits::Environment;
use flowsmith_core::{EnvironmentSnapshot, InstallReport, Result};

/// An interpreter on this machine, driven through its package manager.
pub struct ProcessEnvironment {
    interpreter: String,
    pip_args: Vec<String>,
    list_args: Vec<String>,
    busy_policy: BusyPolicy,
    // Held for the duration of an install. Tokio's mutex is fair, so waiters
    // are served in arrival order.
    install_lock: Mutex<()>,
    cached: RwLock<Option<EnvironmentSnapshot>>,
}

impl ProcessEnvironment {
    pub fn new(interpreter: impl Into<String>) -> Self {
        let defaults = RunnerConfig::default();
        Self {
            interpreter: interpreter.into(),
            pip_args: defaults.pip_args,
            list_args: defaults.list_args,
            busy_policy: defaults.busy_policy,
            install_lock: Mutex::new(()),
            cached: RwLock::new(None),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.python.clone())
            .with_pip_args(config.pip_args.clone())
            .with_list_args(config.list_args.clone())
            .with_busy_policy(config.busy_policy)
    }

    pub fn with_pip_args(mut self, args: Vec<String>) -> Self {
        self.pip_args = args;
        self
    }

    pub fn with_list_args(mut self, args: Vec<String>) -> Self {
        self.list_args = args;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        match self.busy_policy {
            BusyPolicy::Queue => {
                if self.is_busy() {
                    debug!(interpreter = %self.interpreter, "Install queued behind a running one");
                }
                Ok(self.install_lock.lock().await)
            }
            BusyPolicy::Reject => self
                .install_lock
                .try_lock()
                .map_err(|_| RunnerError::Busy(self.interpreter.clone()).into()),
        }
    }

    async fn run_install(&self, packages: Vec<String>) -> Result<InstallReport> {
        if packages.is_empty() {
            return Ok(InstallReport::default());
        }
        let _guard = self.acquire().await?;
        info!(interpreter = %self.interpreter, packages = ?packages, "Installing packages");

        // A dropped install (cancelled run) must not leave the package
        // manager running once the lock is released.
        let output = Command::new(&self.interpreter)
            .args(&self.pip_args)
            .args(&packages)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::Launch {
                program: self.interpreter.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        if !output.status.success() {
            let detail = stderr.trim();
            let message = match output.status.code() {
                Some(code) if detail.is_empty() => format!("Exit code {}", code),
                Some(code) => format!("Exit code {}: {}", code, detail),
                None if detail.is_empty() => "terminated by signal".to_string(),
                None => detail.to_string(),
            };
            warn!(interpreter = %self.interpreter, %message, "Install failed");
            return Err(RunnerError::InstallFailure { packages, message }.into());
        }

        // The next snapshot has to see what was just installed.
        *self.cached.write().await = None;
        info!(interpreter = %self.interpreter, count = packages.len(), "Packages installed");
        Ok(InstallReport {
            installed: packages,
            output: combined,
        })
    }

    async fn list(&self) -> Result<EnvironmentSnapshot> {
        let output = Command::new(&self.interpreter)
            .args(&self.list_args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| RunnerError::Launch {
                program: self.interpreter.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RunnerError::Launch {
                program: self.interpreter.clone(),
                message: format!(
                    "package listing failed (exit code {}): {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
            .into());
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let snapshot = match EnvironmentSnapshot::from_pip_json(&text) {
            Ok(snapshot) => snapshot,
            // `pip freeze` style output
            Err(_) => EnvironmentSnapshot::from_freeze(&text),
        };
        debug!(interpreter = %self.interpreter, packages = snapshot.len(), "Environment listed");
        Ok(snapshot)
    }
}

impl Environment for ProcessEnvironment {
    fn interpreter(&self) -> &str {
        &self.interpreter
    }

    fn install(&self, packages: Vec<String>) -> BoxFuture<'_, Result<InstallReport>> {
        Box::pin(self.run_install(packages))
    }

    fn reload(&self) -> BoxFuture<'_, Result<EnvironmentSnapshot>> {
        Box::pin(async move {
            let snapshot = self.list().await?;
            *self.cached.write().await = Some(snapshot.clone());
            Ok(snapshot)
        })
    }

    fn snapshot(&self) -> BoxFuture<'_, Result<EnvironmentSnapshot>> {
        Box::pin(async move {
            if let Some(snapshot) = self.cached.read().await.as_ref() {
                return Ok(snapshot.clone());
            }
            self.reload().await
        })
    }

    fn is_busy(&self) -> bool {
        self.install_lock.try_lock().is_err()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use flowsmith_core::FlowsmithError;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_install_passes_packages() {
        let env = ProcessEnvironment::new("sh").with_pip_args(args(&["-c", "echo \"got $*\"", "pip"]));
        let report = env.install(args(&["ag2[openai]", "pandas"])).await.unwrap();
        assert_eq!(report.installed, vec!["ag2[openai]", "pandas"]);
        assert!(report.output.contains("got ag2[openai] pandas"));
    }

    #[tokio::test]
    async fn test_install_failure_carries_stderr() {
        let env = ProcessEnvironment::new("sh")
            .with_pip_args(args(&["-c", "echo 'no such package' >&2; exit 2", "pip"]));
        let err = env.install(args(&["nope"])).await.unwrap_err();
        match err {
            FlowsmithError::Runner(RunnerError::InstallFailure { packages, message }) => {
                assert_eq!(packages, vec!["nope"]);
                assert!(message.contains("Exit code 2"));
                assert!(message.contains("no such package"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_error() {
        let env = ProcessEnvironment::new("/nonexistent/flowsmith-python");
        let err = env.install(args(&["ag2"])).await.unwrap_err();
        assert!(matches!(err, FlowsmithError::Runner(RunnerError::Launch { .. })));
    }

    #[tokio::test]
    async fn test_reload_sees_new_packages() {
        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("list.json");
        std::fs::write(&listing, r#"[{"name": "ag2", "version": "0.7.3"}]"#).unwrap();
        let cat = format!("cat '{}'", listing.display());
        let env = ProcessEnvironment::new("sh").with_list_args(args(&["-c", &cat]));

        let first = env.snapshot().await.unwrap();
        assert_eq!(first.version("ag2"), Some("0.7.3"));

        std::fs::write(
            &listing,
            r#"[{"name": "ag2", "version": "0.7.3"}, {"name": "pandas", "version": "2.2.0"}]"#,
        )
        .unwrap();
        // Cached until reloaded.
        assert!(!env.snapshot().await.unwrap().contains("pandas"));
        let reloaded = env.reload().await.unwrap();
        assert!(reloaded.contains("pandas"));
        assert!(env.snapshot().await.unwrap().contains("pandas"));
    }

    #[tokio::test]
    async fn test_freeze_listing_is_accepted() {
        let env = ProcessEnvironment::new("sh")
            .with_list_args(args(&["-c", "printf 'ag2==0.7.3\\npyautogen==0.7.3\\n'"]));
        let snapshot = env.reload().await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_reject_policy_fails_fast_when_busy() {
        let env = Arc::new(
            ProcessEnvironment::new("sh")
                .with_pip_args(args(&["-c", "sleep 1", "pip"]))
                .with_busy_policy(BusyPolicy::Reject),
        );
        let first = {
            let env = env.clone();
            tokio::spawn(async move { env.install(args(&["a"])).await })
        };
        for _ in 0..100 {
            if env.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(env.is_busy());

        let err = env.install(args(&["b"])).await.unwrap_err();
        assert!(matches!(err, FlowsmithError::Runner(RunnerError::Busy(_))));
        first.await.unwrap().unwrap();
        assert!(!env.is_busy());
    }

    #[tokio::test]
    async fn test_queue_policy_serializes_installs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = format!(
            "echo start $1 >> '{0}'; sleep 0.2; echo end $1 >> '{0}'",
            log.display()
        );
        let env = Arc::new(ProcessEnvironment::new("sh").with_pip_args(args(&["-c", &script, "pip"])));

        let tasks: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|pkg| {
                let env = env.clone();
                tokio::spawn(async move { env.install(args(&[pkg])).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let lines: Vec<String> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(lines.len(), 6);
        for pair in lines.chunks(2) {
            let pkg = pair[0].strip_prefix("start ").unwrap();
            assert_eq!(pair[1], format!("end {}", pkg));
        }
    }
}
