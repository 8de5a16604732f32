//! Dependency installation, conflict checks and execution of generated
//! artifacts.

pub mod conflicts;
pub mod decode;
pub mod environment;
pub mod run_log;
pub mod runner;

pub use conflicts::{ConflictChecker, ConflictReport, ConflictRule, ConflictWarning, PackageMatcher};
pub use environment::ProcessEnvironment;
pub use runner::{RunHandle, Runner};
