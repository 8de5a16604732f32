use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, Result, RunnerError};

/// Shape of a generated artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetForm {
    #[default]
    Script,
    Notebook,
}

impl TargetForm {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Script => "py",
            Self::Notebook => "ipynb",
        }
    }
}

impl FromStr for TargetForm {
    type Err = GenerationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" | "py" => Ok(Self::Script),
            "notebook" | "ipynb" => Ok(Self::Notebook),
            other => Err(GenerationError::UnsupportedTarget(other.to_string())),
        }
    }
}

impl std::fmt::Display for TargetForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Notebook => write!(f, "notebook"),
        }
    }
}

/// Output of the code generator, not yet on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub form: TargetForm,
    pub file_name: String,
    pub contents: String,
    pub secrets_file_name: String,
    pub secrets: String,
    /// Packages the program imports, sorted.
    pub requirements: Vec<String>,
    /// Environment variables credential references point at, sorted.
    pub credential_env: Vec<String>,
}

/// An artifact pair persisted to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub form: TargetForm,
    pub path: PathBuf,
    pub secrets_path: PathBuf,
    pub requirements: Vec<String>,
    pub credential_env: Vec<String>,
}

impl WrittenArtifact {
    pub fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Normalize a package name the way pip compares them (PEP 503).
pub fn normalize_package_name(name: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let re = SEPARATORS.get_or_init(|| Regex::new(r"[-_.]+").unwrap());
    re.replace_all(name.trim(), "-").to_ascii_lowercase()
}

/// Installed packages of an environment at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    packages: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
}

impl EnvironmentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, version: &str) -> Self {
        self.insert(name, version);
        self
    }

    pub fn insert(&mut self, name: &str, version: &str) {
        self.packages
            .insert(normalize_package_name(name), version.trim().to_string());
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.packages
            .get(&normalize_package_name(name))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(&normalize_package_name(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Packages by normalized name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packages.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the output of `pip list --format=json`.
    pub fn from_pip_json(text: &str) -> Result<Self> {
        let entries: Vec<PipListEntry> = serde_json::from_str(text)?;
        let mut snapshot = Self::new();
        for entry in entries {
            snapshot.insert(&entry.name, &entry.version);
        }
        Ok(snapshot)
    }

    /// Parse the output of `pip freeze`.
    ///
    /// Editable installs and comments are skipped; direct references
    /// (`name @ url`) are recorded without a version.
    pub fn from_freeze(text: &str) -> Self {
        let mut snapshot = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
                continue;
            }
            if let Some((name, version)) = line.split_once("==") {
                snapshot.insert(name, version);
            } else if let Some((name, _)) = line.split_once(" @ ") {
                snapshot.insert(name, "");
            }
        }
        snapshot
    }
}

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Preparing,
    Executing,
    Succeeded,
    Failed,
    Crashed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Crashed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Pending, Preparing) => true,
            (Preparing, Executing) => true,
            (Executing, Succeeded | Crashed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: RunState) -> std::result::Result<(), RunnerError> {
        if !self.can_transition_to(next) {
            return Err(RunnerError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Incremental progress of a run, delivered while it executes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    State(RunState),
    Output { stream: OutputStream, line: String },
    /// A chunk could not be decoded and was replaced.
    Degraded { stream: OutputStream },
    /// Installed packages clash. Reported before the artifact starts.
    Conflict { message: String },
}

/// Outcome of a dependency installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub output: String,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub state: RunState,
    pub exit_code: Option<i32>,
    /// Why the run did not succeed.
    pub error: Option<RunnerError>,
    /// Last captured output lines, oldest first.
    pub tail: Vec<String>,
    /// Absorbed decode problems, one entry per affected stream.
    pub degradations: Vec<RunnerError>,
    pub elapsed_ms: u64,
    /// Transcript written beside the artifact, when kept.
    pub log_path: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.error, Some(RunnerError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_form_parse() {
        assert_eq!("script".parse::<TargetForm>().unwrap(), TargetForm::Script);
        assert_eq!("IPYNB".parse::<TargetForm>().unwrap(), TargetForm::Notebook);
        assert!(matches!(
            "html".parse::<TargetForm>(),
            Err(GenerationError::UnsupportedTarget(t)) if t == "html"
        ));
    }

    #[test]
    fn test_normalize_package_name() {
        assert_eq!(normalize_package_name("PyAutoGen"), "pyautogen");
        assert_eq!(normalize_package_name("autogen_agentchat"), "autogen-agentchat");
        assert_eq!(normalize_package_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_package_name("a--_b"), "a-b");
    }

    #[test]
    fn test_snapshot_from_pip_json() {
        let json = r#"[{"name": "ag2", "version": "0.7.3"}, {"name": "PyAutoGen", "version": "0.2.35"}]"#;
        let snap = EnvironmentSnapshot::from_pip_json(json).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.version("pyautogen"), Some("0.2.35"));
        assert!(snap.contains("AG2"));
    }

    #[test]
    fn test_snapshot_from_freeze() {
        let text = "# comment\nag2==0.7.3\n-e git+https://x/y#egg=z\nlocal_pkg @ file:///tmp/pkg\n\n";
        let snap = EnvironmentSnapshot::from_freeze(text);
        assert_eq!(snap.version("ag2"), Some("0.7.3"));
        assert_eq!(snap.version("local-pkg"), Some(""));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_run_state_transitions() {
        let mut state = RunState::Pending;
        state.advance(RunState::Preparing).unwrap();
        state.advance(RunState::Executing).unwrap();
        state.advance(RunState::Succeeded).unwrap();
        assert!(state.is_terminal());
        assert!(state.advance(RunState::Failed).is_err());

        let mut early = RunState::Pending;
        assert!(early.advance(RunState::Executing).is_err());
        early.advance(RunState::Failed).unwrap();
    }
}
