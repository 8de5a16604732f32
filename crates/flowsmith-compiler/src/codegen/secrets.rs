//! The companion module holding model API keys and tool secrets.

use flowsmith_core::error::GenerationError;
use flowsmith_core::traits::SecretResolver;
use flowsmith_core::{Credential, EntityId, Flow};

use super::literal::OpaqueLiteral;
use super::program::{secrets_getter, tool_secrets_setter};

/// Rendered secrets module plus what went into it.
#[derive(Debug, Clone)]
pub struct SecretsFile {
    pub contents: String,
    /// Values resolved at compile time, per model or tool; must never reach
    /// the program source.
    pub resolved: Vec<(EntityId, String)>,
    /// Environment variables credentials point at, sorted and unique.
    pub env_vars: Vec<String>,
}

#[derive(Default)]
struct Collected {
    resolved: Vec<(EntityId, String)>,
    env_vars: Vec<String>,
    uses_env: bool,
}

impl Collected {
    /// Python expression for a credential's value.
    fn value(
        &mut self,
        entity: &EntityId,
        field: &str,
        credential: &Credential,
        resolver: &dyn SecretResolver,
    ) -> Result<String, GenerationError> {
        if let Credential::Env { var } = credential {
            self.env_vars.push(var.clone());
        }
        match (resolver.resolve(credential), credential) {
            (Some(secret), _) => {
                let rendered = OpaqueLiteral::string(&secret).render();
                self.resolved.push((entity.clone(), secret));
                rendered
            }
            (None, Credential::Env { var }) => {
                self.uses_env = true;
                OpaqueLiteral::string(var)
                    .render()
                    .map(|v| format!("os.environ.get({}, \"\")", v))
            }
            (None, Credential::Inline { .. }) => Ok("\"\"".to_string()),
        }
        .map_err(|reason| GenerationError::Embedding {
            entity: entity.clone(),
            field: field.to_string(),
            reason,
        })
    }
}

fn key(entity: &EntityId, field: &str, text: &str) -> Result<String, GenerationError> {
    OpaqueLiteral::string(text)
        .render()
        .map_err(|reason| GenerationError::Embedding {
            entity: entity.clone(),
            field: field.to_string(),
            reason,
        })
}

pub fn render(
    flow: &Flow,
    slug: &str,
    resolver: &dyn SecretResolver,
) -> Result<SecretsFile, GenerationError> {
    let mut collected = Collected::default();

    let mut model_entries = Vec::new();
    for model in &flow.models {
        let Some(credential) = &model.credential else {
            continue;
        };
        let value = collected.value(&model.id, "credential", credential, resolver)?;
        let key = key(&model.id, "id", model.id.as_str())?;
        model_entries.push(format!("    {}: {},", key, value));
    }

    let mut tool_entries = Vec::new();
    for tool in &flow.tools {
        for (var, credential) in &tool.secrets {
            let value = collected.value(&tool.id, "secrets", credential, resolver)?;
            let key = key(&tool.id, "secrets", var)?;
            tool_entries.push(format!("    {}: {},", key, value));
        }
    }

    let Collected {
        resolved,
        mut env_vars,
        uses_env,
    } = collected;
    env_vars.sort();
    env_vars.dedup();

    let mut out = String::new();
    out.push_str(&format!(
        "\"\"\"API keys for the models of {}.\n\nKeep this file out of version control.\n\"\"\"\n\n",
        doc_safe(&flow.name)
    ));
    if uses_env || !tool_entries.is_empty() {
        out.push_str("import os\n\n");
    }
    push_table(&mut out, "_MODEL_API_KEYS", &model_entries);
    if !tool_entries.is_empty() {
        out.push('\n');
        push_table(&mut out, "_TOOL_SECRETS", &tool_entries);
    }
    out.push_str(&format!(
        "\n\ndef {}(model_id):\n    \"\"\"Get the API key of a model by its id.\"\"\"\n    return _MODEL_API_KEYS.get(model_id, \"\")\n",
        secrets_getter(slug)
    ));
    if !tool_entries.is_empty() {
        out.push_str(&format!(
            "\n\ndef {}():\n    \"\"\"Export the environment variables the tools read.\"\"\"\n    for name, value in _TOOL_SECRETS.items():\n        if value:\n            os.environ[name] = value\n",
            tool_secrets_setter(slug)
        ));
    }

    Ok(SecretsFile {
        contents: out,
        resolved,
        env_vars,
    })
}

fn push_table(out: &mut String, name: &str, entries: &[String]) {
    if entries.is_empty() {
        out.push_str(&format!("{} = {{}}\n", name));
        return;
    }
    out.push_str(&format!("{} = {{\n", name));
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out.push_str("}\n");
}

fn doc_safe(text: &str) -> String {
    text.replace('\\', "/").replace('"', "'").replace(['\n', '\r', '\0'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsmith_core::secrets::{MapSecretResolver, NoSecrets};
    use flowsmith_core::{Model, ProviderKind, Tool};

    fn flow() -> Flow {
        let mut flow = Flow::new("Keys");
        let mut inline = Model::new("gpt-4o", ProviderKind::OpenAi);
        inline.credential = Some(Credential::Inline { value: "sk-inline-123".into() });
        let mut env = Model::new("claude", ProviderKind::Anthropic);
        env.credential = Some(Credential::Env { var: "ANTHROPIC_API_KEY".into() });
        let keyless = Model::new("llama3", ProviderKind::Ollama);
        flow.models = vec![inline, env, keyless];
        flow
    }

    #[test]
    fn test_unresolved_env_becomes_lookup() {
        let flow = flow();
        let file = render(&flow, "keys", &NoSecrets).unwrap();
        assert!(file.contents.contains("import os"));
        assert!(file.contents.contains("os.environ.get(\"ANTHROPIC_API_KEY\", \"\")"));
        assert!(file.contents.contains("\"sk-inline-123\""));
        assert!(file.contents.contains("def get_keys_model_api_key(model_id):"));
        assert_eq!(file.resolved, vec![(flow.models[0].id.clone(), "sk-inline-123".to_string())]);
        assert_eq!(file.env_vars, vec!["ANTHROPIC_API_KEY"]);
        assert!(!file.contents.contains(flow.models[2].id.as_str()));
    }

    #[test]
    fn test_tool_secrets_get_a_setter() {
        let mut flow = Flow::new("Keys");
        flow.tools.push(
            Tool::new("search", "def search(q):\n    return q\n")
                .with_secret("SEARCH_TOKEN", Credential::Env { var: "MY_SEARCH_TOKEN".into() })
                .with_secret("SEARCH_REGION", Credential::Inline { value: "eu-west".into() }),
        );
        let file = render(&flow, "keys", &NoSecrets).unwrap();
        assert!(file.contents.contains("import os"));
        assert!(file.contents.contains("_MODEL_API_KEYS = {}"));
        assert!(file
            .contents
            .contains("_TOOL_SECRETS = {\n    \"SEARCH_REGION\": \"eu-west\",\n    \"SEARCH_TOKEN\": os.environ.get(\"MY_SEARCH_TOKEN\", \"\"),\n}"));
        assert!(file.contents.contains("def set_keys_tool_secrets():"));
        assert!(file.contents.contains("os.environ[name] = value"));
        assert_eq!(file.env_vars, vec!["MY_SEARCH_TOKEN"]);
        assert_eq!(file.resolved, vec![(flow.tools[0].id.clone(), "eu-west".to_string())]);
    }

    #[test]
    fn test_no_tool_secrets_no_setter() {
        let file = render(&flow(), "keys", &NoSecrets).unwrap();
        assert!(!file.contents.contains("_TOOL_SECRETS"));
        assert!(!file.contents.contains("set_keys_tool_secrets"));
    }

    #[test]
    fn test_resolved_env_is_embedded() {
        let flow = flow();
        let resolver = MapSecretResolver::new().with("ANTHROPIC_API_KEY", "sk-ant-456");
        let file = render(&flow, "keys", &resolver).unwrap();
        assert!(!file.contents.contains("import os"));
        assert!(file.contents.contains("\"sk-ant-456\""));
        assert_eq!(file.resolved.len(), 2);
    }
}
