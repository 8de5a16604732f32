use std::collections::HashMap;

use crate::flow::Credential;
use crate::traits::SecretResolver;

/// Resolves inline credentials directly and `Env` credentials from the
/// process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, credential: &Credential) -> Option<String> {
        match credential {
            Credential::Inline { value } => Some(value.clone()).filter(|v| !v.is_empty()),
            Credential::Env { var } => std::env::var(var).ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Resolves `Env` credentials from an explicit map.
///
/// Inline credentials resolve to their value. Useful when the secret store
/// is not the process environment.
#[derive(Debug, Clone, Default)]
pub struct MapSecretResolver {
    values: HashMap<String, String>,
}

impl MapSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(var.into(), value.into());
        self
    }
}

impl SecretResolver for MapSecretResolver {
    fn resolve(&self, credential: &Credential) -> Option<String> {
        match credential {
            Credential::Inline { value } => Some(value.clone()).filter(|v| !v.is_empty()),
            Credential::Env { var } => self.values.get(var).cloned(),
        }
    }
}

/// Resolves nothing; every `Env` credential is left to run time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecrets;

impl SecretResolver for NoSecrets {
    fn resolve(&self, credential: &Credential) -> Option<String> {
        match credential {
            Credential::Inline { value } => Some(value.clone()).filter(|v| !v.is_empty()),
            Credential::Env { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_resolver() {
        let resolver = MapSecretResolver::new().with("OPENAI_API_KEY", "sk-test");
        let env = Credential::Env { var: "OPENAI_API_KEY".into() };
        let missing = Credential::Env { var: "OTHER".into() };
        assert_eq!(resolver.resolve(&env).as_deref(), Some("sk-test"));
        assert_eq!(resolver.resolve(&missing), None);
    }

    #[test]
    fn test_inline_always_resolves() {
        let inline = Credential::Inline { value: "abc".into() };
        assert_eq!(NoSecrets.resolve(&inline).as_deref(), Some("abc"));
        assert_eq!(EnvSecretResolver.resolve(&inline).as_deref(), Some("abc"));
        let empty = Credential::Inline { value: String::new() };
        assert_eq!(NoSecrets.resolve(&empty), None);
    }

    #[test]
    fn test_env_resolver_reads_process_env() {
        std::env::set_var("TEST_FLOWSMITH_SECRET", "from-env");
        let cred = Credential::Env { var: "TEST_FLOWSMITH_SECRET".into() };
        assert_eq!(EnvSecretResolver.resolve(&cred).as_deref(), Some("from-env"));
        std::env::remove_var("TEST_FLOWSMITH_SECRET");
    }
}
