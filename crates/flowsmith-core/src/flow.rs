//! Flow model: the validated workflow graph handed to the compiler.
//!
//! These types are plain data, stored as JSON. The validator, sequencer and
//! code generator only read them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowsmithError, Result};
use crate::id::EntityId;

/// Root of a multi-agent workflow description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra packages the generated program needs.
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub chats: Vec<Chat>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: String::new(),
            tags: vec![],
            requirements: vec![],
            models: vec![],
            tools: vec![],
            agents: vec![],
            chats: vec![],
        }
    }

    /// Read a flow from its JSON form.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowsmithError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn agent(&self, id: &EntityId) -> Option<&Agent> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn model(&self, id: &EntityId) -> Option<&Model> {
        self.models.iter().find(|m| &m.id == id)
    }

    pub fn tool(&self, id: &EntityId) -> Option<&Tool> {
        self.tools.iter().find(|t| &t.id == id)
    }

    pub fn chat(&self, id: &EntityId) -> Option<&Chat> {
        self.chats.iter().find(|c| &c.id == id)
    }

    /// Whether some tool in the flow defines a function called `name`.
    pub fn defines_function(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name || t.defines(name))
    }

    /// Chats nested under the given group manager, in declaration order.
    pub fn group_chats<'a>(&'a self, manager: &'a EntityId) -> impl Iterator<Item = &'a Chat> {
        self.chats
            .iter()
            .filter(move |c| c.group.as_ref() == Some(manager))
    }
}

/// Provider behind a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Azure,
    Anthropic,
    Gemini,
    Groq,
    Together,
    Mistral,
    Nim,
    Deepseek,
    Ollama,
    Other,
}

impl ProviderKind {
    /// Endpoint used when a model does not set one.
    ///
    /// Azure deployments and custom endpoints have no usable default.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Together => Some("https://api.together.xyz/v1"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::Nim => Some("https://integrate.api.nvidia.com/v1"),
            Self::Deepseek => Some("https://api.deepseek.com/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Azure | Self::Other => None,
        }
    }

    /// Value of `api_type` in the generated model config.
    pub fn api_type(self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Gemini => "google",
            Self::Groq => "groq",
            Self::Together => "together",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
            Self::OpenAi | Self::Nim | Self::Deepseek | Self::Other => "openai",
        }
    }

    /// Runtime package extra that provides the client for this provider.
    pub fn package_extra(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Together => "together",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
            Self::OpenAi
            | Self::Azure
            | Self::Nim
            | Self::Deepseek
            | Self::Other => "openai",
        }
    }
}

/// Where a model's API key comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Key stored in the flow itself.
    Inline { value: String },
    /// Key read from an environment variable.
    Env { var: String },
}

/// A model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: EntityId,
    /// Model name as the provider knows it (e.g. `gpt-4o`).
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Model {
    pub fn new(name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            provider,
            base_url: None,
            credential: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    /// The explicit base URL, or the provider default.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.provider.default_base_url())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// A function registered with the agents that bind it.
    #[default]
    Custom,
    /// Module-level helper code, emitted but never registered.
    Shared,
}

/// A callable unit backed by opaque source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: EntityId,
    /// Function name, also the name the agents call it by.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ToolKind,
    pub source: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Environment variables the tool reads, exported before it is defined.
    #[serde(default)]
    pub secrets: BTreeMap<String, Credential>,
}

impl Tool {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: String::new(),
            kind: ToolKind::Custom,
            source: source.into(),
            requirements: vec![],
            secrets: BTreeMap::new(),
        }
    }

    pub fn with_secret(mut self, var: impl Into<String>, credential: Credential) -> Self {
        self.secrets.insert(var.into(), credential);
        self
    }

    /// Whether the source text contains a definition of `name`.
    pub fn defines(&self, name: &str) -> bool {
        defines_function(&self.source, name)
    }
}

/// Textual check for `def name(` (or `async def name(`) in a code body.
pub fn defines_function(source: &str, name: &str) -> bool {
    let needle = format!("def {}(", name);
    source.lines().any(|line| {
        let line = line.trim_start();
        let line = line.strip_prefix("async ").unwrap_or(line);
        line.starts_with(&needle)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanInputMode {
    Always,
    Terminate,
    #[default]
    Never,
}

impl HumanInputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::Terminate => "TERMINATE",
            Self::Never => "NEVER",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerSelection {
    #[default]
    Auto,
    RoundRobin,
    Random,
    Manual,
}

impl SpeakerSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTask {
    #[default]
    Default,
    Qa,
    Code,
}

impl RetrievalTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Qa => "qa",
            Self::Code => "code",
        }
    }
}

/// Closed set of agent roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRole {
    UserProxy,
    Assistant,
    GroupManager {
        #[serde(default)]
        max_round: Option<u32>,
        #[serde(default)]
        speaker_selection: SpeakerSelection,
    },
    RetrievalProxy {
        /// Documents or directories the agent retrieves from.
        #[serde(default)]
        docs_path: Vec<String>,
        #[serde(default)]
        collection: Option<String>,
        #[serde(default)]
        task: RetrievalTask,
    },
    Reasoning {
        #[serde(default)]
        max_depth: Option<u32>,
        #[serde(default)]
        beam_size: Option<u32>,
    },
}

impl AgentRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserProxy => "user proxy",
            Self::Assistant => "assistant",
            Self::GroupManager { .. } => "group manager",
            Self::RetrievalProxy { .. } => "retrieval proxy",
            Self::Reasoning { .. } => "reasoning",
        }
    }

    pub fn is_group_manager(&self) -> bool {
        matches!(self, Self::GroupManager { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordCriterion {
    #[default]
    Contains,
    Exact,
    EndsWith,
}

/// When an agent stops replying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Termination {
    #[default]
    None,
    Keyword {
        keyword: String,
        #[serde(default)]
        criterion: KeywordCriterion,
    },
    Function {
        name: String,
        /// Inline definition; when absent a tool must define the function.
        #[serde(default)]
        source: Option<String>,
    },
}

impl Termination {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A tool bound to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool: EntityId,
    /// Agent that executes calls; the binding agent when absent.
    #[serde(default)]
    pub executor: Option<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub role: AgentRole,
    #[serde(default)]
    pub model: Option<EntityId>,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub termination: Termination,
    #[serde(default)]
    pub human_input: HumanInputMode,
    #[serde(default)]
    pub max_consecutive_auto_reply: Option<u32>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: String::new(),
            role,
            model: None,
            tools: vec![],
            system_message: None,
            termination: Termination::None,
            human_input: HumanInputMode::Never,
            max_consecutive_auto_reply: None,
        }
    }

    pub fn with_model(mut self, model: &EntityId) -> Self {
        self.model = Some(model.clone());
        self
    }

    pub fn with_tool(mut self, tool: &EntityId, executor: Option<&EntityId>) -> Self {
        self.tools.push(ToolBinding {
            tool: tool.clone(),
            executor: executor.cloned(),
        });
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }
}

/// Opening of a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessages {
    /// The first message starts the chat; the rest follow in order.
    Sequence {
        #[serde(default)]
        messages: Vec<String>,
    },
    /// A function producing the first message at run time.
    Generator { function: String },
}

impl Default for ChatMessages {
    fn default() -> Self {
        Self::Sequence { messages: vec![] }
    }
}

/// Name of the retrieval agent's built-in message generator.
pub const RETRIEVAL_MESSAGE_GENERATOR: &str = "message_generator";

/// When a chat edge is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCondition {
    #[default]
    Always,
    /// Decided at run time by calling `function(results)`.
    OnCondition { function: String },
    /// Run as a nested chat of the source whenever `trigger` messages it.
    NestedTrigger { trigger: EntityId },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    #[default]
    LastMessage,
    ReflectionWithLlm,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPolicy {
    #[serde(default)]
    pub method: SummaryMethod,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// A directed conversation edge between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub source: EntityId,
    pub target: EntityId,
    #[serde(default)]
    pub messages: ChatMessages,
    #[serde(default)]
    pub condition: ChatCondition,
    #[serde(default)]
    pub summary: SummaryPolicy,
    /// Position among top-level chats; `None` keeps the chat off the top level.
    #[serde(default)]
    pub sequence: Option<u32>,
    /// Group manager this chat belongs to.
    #[serde(default)]
    pub group: Option<EntityId>,
    #[serde(default)]
    pub prerequisites: Vec<EntityId>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub clear_history: bool,
    #[serde(default)]
    pub silent: bool,
    /// Append the summary of the latest finished chat to the opening message.
    #[serde(default)]
    pub use_carryover: bool,
}

impl Chat {
    pub fn new(source: &EntityId, target: &EntityId) -> Self {
        Self {
            id: EntityId::new(),
            name: String::new(),
            source: source.clone(),
            target: target.clone(),
            messages: ChatMessages::default(),
            condition: ChatCondition::Always,
            summary: SummaryPolicy::default(),
            sequence: None,
            group: None,
            prerequisites: vec![],
            max_turns: None,
            clear_history: false,
            silent: false,
            use_carryover: false,
        }
    }

    pub fn with_carryover(mut self) -> Self {
        self.use_carryover = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        match &mut self.messages {
            ChatMessages::Sequence { messages } => messages.push(message.into()),
            ChatMessages::Generator { .. } => {
                self.messages = ChatMessages::Sequence {
                    messages: vec![message.into()],
                }
            }
        }
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn in_group(mut self, manager: &EntityId) -> Self {
        self.group = Some(manager.clone());
        self
    }

    pub fn with_condition(mut self, condition: ChatCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn after(mut self, chat: &EntityId) -> Self {
        self.prerequisites.push(chat.clone());
        self
    }

    /// Key the chat graph is indexed by.
    pub fn edge_key(&self) -> (EntityId, EntityId, ChatCondition) {
        (self.source.clone(), self.target.clone(), self.condition.clone())
    }
}
