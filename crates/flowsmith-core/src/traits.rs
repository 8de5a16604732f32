use futures::future::BoxFuture;

use crate::error::Result;
use crate::flow::Credential;
use crate::types::{EnvironmentSnapshot, InstallReport};

/// Turns credential references into values.
///
/// Resolved values are written only to the secrets file and to the child
/// environment of a run, never into generated source.
pub trait SecretResolver: Send + Sync {
    /// The secret behind `credential`, or `None` when it cannot be resolved
    /// at compile time.
    fn resolve(&self, credential: &Credential) -> Option<String>;
}

/// The Python installation artifacts run in.
pub trait Environment: Send + Sync + 'static {
    /// Program used to install packages and execute artifacts.
    fn interpreter(&self) -> &str;

    /// Install packages. Concurrent calls are serialized.
    fn install(&self, packages: Vec<String>) -> BoxFuture<'_, Result<InstallReport>>;

    /// Re-list installed packages so later runs see new installs.
    fn reload(&self) -> BoxFuture<'_, Result<EnvironmentSnapshot>>;

    /// Last known set of installed packages.
    fn snapshot(&self) -> BoxFuture<'_, Result<EnvironmentSnapshot>>;

    /// Whether an install is in progress.
    fn is_busy(&self) -> bool {
        false
    }
}
