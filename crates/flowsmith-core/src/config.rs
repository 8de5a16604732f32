use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowsmithError, Result};
use crate::types::TargetForm;

/// Top-level flowsmith configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Extra package conflict rules on top of the built-in table.
    #[serde(default)]
    pub conflicts: Vec<ConflictRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Directory artifacts are written to (`~/` is expanded).
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub target: TargetForm,
    /// Package providing the agent runtime the generated code imports.
    #[serde(default = "default_runtime_package")]
    pub runtime_package: String,
    /// Response cache seed passed to every model config.
    #[serde(default)]
    pub cache_seed: Option<u32>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            target: TargetForm::default(),
            runtime_package: default_runtime_package(),
            cache_seed: None,
        }
    }
}

fn default_output_dir() -> String {
    "./build".to_string()
}

fn default_runtime_package() -> String {
    "ag2".to_string()
}

/// What to do when an install is requested while another is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait in line behind the running install.
    #[default]
    Queue,
    /// Fail immediately.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interpreter used for installs and execution.
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_install_requirements")]
    pub install_requirements: bool,
    /// Wall-clock limit for the executing phase. Unlimited when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Output lines kept for failure reports.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    /// Arguments before the package list when installing.
    #[serde(default = "default_pip_args")]
    pub pip_args: Vec<String>,
    /// Arguments that list installed packages as JSON.
    #[serde(default = "default_list_args")]
    pub list_args: Vec<String>,
    /// Arguments before the notebook path when executing a notebook.
    #[serde(default = "default_notebook_args")]
    pub notebook_args: Vec<String>,
    /// Keep a transcript of each run beside the artifact.
    #[serde(default = "default_run_log")]
    pub run_log: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            install_requirements: default_install_requirements(),
            timeout_secs: None,
            tail_lines: default_tail_lines(),
            busy_policy: BusyPolicy::default(),
            pip_args: default_pip_args(),
            list_args: default_list_args(),
            notebook_args: default_notebook_args(),
            run_log: default_run_log(),
        }
    }
}

fn default_python() -> String {
    if cfg!(windows) { "python" } else { "python3" }.to_string()
}

fn default_install_requirements() -> bool { true }

fn default_tail_lines() -> usize { 20 }

fn default_run_log() -> bool { true }

fn default_pip_args() -> Vec<String> {
    ["-m", "pip", "install", "--quiet"].iter().map(|s| s.to_string()).collect()
}

fn default_list_args() -> Vec<String> {
    ["-m", "pip", "list", "--format=json"].iter().map(|s| s.to_string()).collect()
}

fn default_notebook_args() -> Vec<String> {
    ["-m", "jupyter", "execute"].iter().map(|s| s.to_string()).collect()
}

/// A conflict rule declared in configuration.
///
/// `first` and `second` are requirement strings such as `pyautogen<0.3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    pub first: String,
    pub second: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowsmithError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowsmithError::Config(e.to_string()))
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the artifact output directory (expand ~).
    pub fn output_dir(&self) -> PathBuf {
        let dir = &self.compiler.output_dir;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// The user's home directory, from `$HOME`.
pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
