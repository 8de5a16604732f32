//! Flags installed package pairs known to clash.
//!
//! The report is advisory. Nothing here stops a run.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use flowsmith_core::config::ConflictRuleConfig;
use flowsmith_core::{normalize_package_name, EnvironmentSnapshot, FlowsmithError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl BoundOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

/// Release segments of a version (`0.2.35` -> `[0, 2, 35]`).
///
/// Pre-release and local tags are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_start_matches(['v', 'V']);
        let text = text.split_once('!').map_or(text, |(_, rest)| rest);
        let mut parts = Vec::new();
        for segment in text.split('.') {
            let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            parts.push(digits.parse().ok()?);
            if digits.len() != segment.len() {
                break;
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts))
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A package name plus an optional version bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMatcher {
    pub name: String,
    pub bound: Option<(BoundOp, Version)>,
    raw: String,
}

impl PackageMatcher {
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_package_name(name),
            bound: None,
            raw: name.trim().to_string(),
        }
    }

    /// Parse `name`, `name<1.0`, `name>=0.2` and so on.
    pub fn parse(text: &str) -> Result<Self> {
        static REQUIREMENT: OnceLock<Regex> = OnceLock::new();
        let re = REQUIREMENT.get_or_init(|| {
            Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:(<=|>=|==|<|>)\s*(\S+))?\s*$").unwrap()
        });
        let caps = re
            .captures(text)
            .ok_or_else(|| FlowsmithError::Config(format!("invalid package requirement: {}", text)))?;

        let mut matcher = Self::new(&caps[1]);
        matcher.raw = text.trim().to_string();
        if let (Some(op), Some(version)) = (caps.get(2), caps.get(3)) {
            let op = match op.as_str() {
                "<" => BoundOp::Lt,
                "<=" => BoundOp::Le,
                "==" => BoundOp::Eq,
                ">=" => BoundOp::Ge,
                _ => BoundOp::Gt,
            };
            let version = Version::parse(version.as_str()).ok_or_else(|| {
                FlowsmithError::Config(format!("invalid version in requirement: {}", text))
            })?;
            matcher.bound = Some((op, version));
        }
        Ok(matcher)
    }

    /// Installed version when the snapshot satisfies this matcher.
    pub fn matches<'s>(&self, snapshot: &'s EnvironmentSnapshot) -> Option<&'s str> {
        let installed = snapshot.version(&self.name)?;
        let Some((op, bound)) = &self.bound else {
            return Some(installed);
        };
        let version = Version::parse(installed)?;
        let ok = match op {
            BoundOp::Lt => version < *bound,
            BoundOp::Le => version <= *bound,
            BoundOp::Eq => version == *bound,
            BoundOp::Ge => version >= *bound,
            BoundOp::Gt => version > *bound,
        };
        ok.then_some(installed)
    }
}

impl fmt::Display for PackageMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bound {
            Some(_) if !self.raw.is_empty() => write!(f, "{}", self.raw),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Two packages that must not be installed together.
#[derive(Debug, Clone)]
pub struct ConflictRule {
    pub first: PackageMatcher,
    pub second: PackageMatcher,
    /// Import namespace both packages claim.
    pub namespace: String,
    pub remediation: String,
}

impl ConflictRule {
    pub fn from_config(config: &ConflictRuleConfig) -> Result<Self> {
        let first = PackageMatcher::parse(&config.first)?;
        let second = PackageMatcher::parse(&config.second)?;
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| first.name.replace('-', "_"));
        let remediation = config
            .remediation
            .clone()
            .unwrap_or_else(|| format!("uninstall either {} or {}", first.name, second.name));
        Ok(Self {
            first,
            second,
            namespace,
            remediation,
        })
    }
}

/// One detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictWarning {
    /// `name==version` of the first package as installed.
    pub first: String,
    pub second: String,
    pub namespace: String,
    pub remediation: String,
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflicts with {} (both provide '{}'): {}",
            self.first, self.second, self.namespace, self.remediation
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub warnings: Vec<ConflictWarning>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Rule table plus the check over an environment snapshot.
#[derive(Debug, Clone)]
pub struct ConflictChecker {
    rules: Vec<ConflictRule>,
}

impl ConflictChecker {
    /// Checker with the built-in rules only.
    pub fn builtin() -> Self {
        let rule = |first: PackageMatcher, second: &str, remediation: &str| ConflictRule {
            first,
            second: PackageMatcher::new(second),
            namespace: "autogen".into(),
            remediation: remediation.into(),
        };
        let legacy = PackageMatcher {
            name: "pyautogen".into(),
            bound: Some((BoundOp::Lt, Version(vec![0, 3]))),
            raw: "pyautogen<0.3".into(),
        };
        Self {
            rules: vec![
                rule(
                    PackageMatcher::new("ag2"),
                    "pyautogen",
                    "uninstall pyautogen; ag2 already provides the autogen package",
                ),
                rule(
                    PackageMatcher::new("autogen"),
                    "pyautogen",
                    "keep only one of autogen and pyautogen installed",
                ),
                rule(
                    legacy,
                    "autogen-agentchat",
                    "upgrade pyautogen or uninstall autogen-agentchat",
                ),
            ],
        }
    }

    /// Built-in rules plus the ones declared in configuration.
    pub fn with_config(extra: &[ConflictRuleConfig]) -> Result<Self> {
        let mut checker = Self::builtin();
        for rule in extra {
            checker.rules.push(ConflictRule::from_config(rule)?);
        }
        Ok(checker)
    }

    pub fn add_rule(&mut self, rule: ConflictRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ConflictRule] {
        &self.rules
    }

    pub fn check(&self, snapshot: &EnvironmentSnapshot) -> ConflictReport {
        let mut report = ConflictReport::default();
        for rule in &self.rules {
            let (Some(a), Some(b)) = (rule.first.matches(snapshot), rule.second.matches(snapshot)) else {
                continue;
            };
            let warning = ConflictWarning {
                first: format!("{}=={}", rule.first.name, a),
                second: format!("{}=={}", rule.second.name, b),
                namespace: rule.namespace.clone(),
                remediation: rule.remediation.clone(),
            };
            warn!(
                first = %warning.first,
                second = %warning.second,
                namespace = %warning.namespace,
                "Package conflict detected"
            );
            report.warnings.push(warning);
        }
        report
    }
}

impl Default for ConflictChecker {
    fn default() -> Self {
        Self::builtin()
    }
}
