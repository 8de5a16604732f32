//! Form-independent program: the ordered section stream both renderers share.

use std::collections::BTreeSet;

use tracing::debug;

use flowsmith_core::config::CompilerConfig;
use flowsmith_core::error::GenerationError;
use flowsmith_core::{
    Agent, AgentRole, Chat, ChatMessages, EntityId, Flow, KeywordCriterion, SummaryMethod,
    Termination, ToolKind, RETRIEVAL_MESSAGE_GENERATOR,
};

use super::imports::ImportSet;
use super::literal::{self, OpaqueLiteral};
use super::names::{sanitize, NameRegistry};
use crate::sequencer::{Branch, ExecutionPlan, GroupPlan, Invocation, NestedRegistration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Imports,
    Models,
    Tools,
    Agent,
    Registrations,
    RunSetup,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Entity the section constructs or invokes, if any.
    pub entity: Option<EntityId>,
    pub lines: Vec<String>,
}

impl Section {
    fn new(kind: SectionKind, entity: Option<&EntityId>) -> Self {
        Self {
            kind,
            entity: entity.cloned(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn extend(&mut self, lines: Vec<String>) {
        self.lines.extend(lines);
    }

    fn blank(&mut self) {
        self.lines.push(String::new());
    }
}

/// A flow lowered to Python statements.
#[derive(Debug, Clone)]
pub struct Program {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub flow_id: EntityId,
    /// Packages the program imports, sorted.
    pub requirements: Vec<String>,
    pub sections: Vec<Section>,
}

impl Program {
    /// Non-empty sections of one kind.
    pub fn sections(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections
            .iter()
            .filter(move |s| s.kind == kind && !s.lines.is_empty())
    }

    pub fn secrets_module(&self) -> String {
        secrets_module(&self.slug)
    }
}

pub fn secrets_module(slug: &str) -> String {
    format!("{}_api_keys", slug)
}

pub fn secrets_getter(slug: &str) -> String {
    format!("get_{}_model_api_key", slug)
}

pub fn tool_secrets_setter(slug: &str) -> String {
    format!("set_{}_tool_secrets", slug)
}

/// Name of the generated helper returning the latest chat summary.
const CARRYOVER_HELPER: &str = "last_carryover";

/// Stable module name of a flow.
pub fn flow_slug(flow: &Flow) -> String {
    sanitize(&flow.name, "flow")
}

fn rank(role: &AgentRole) -> u8 {
    match role {
        AgentRole::Assistant | AgentRole::Reasoning { .. } => 0,
        AgentRole::UserProxy | AgentRole::RetrievalProxy { .. } => 1,
        AgentRole::GroupManager { .. } => 2,
    }
}

/// Agents in construction order: LLM participants, proxies, group managers.
pub fn construction_order(flow: &Flow) -> Vec<&Agent> {
    let mut agents: Vec<&Agent> = flow.agents.iter().collect();
    agents.sort_by_key(|a| rank(&a.role));
    agents
}

/// Packages the generated program needs.
pub fn requirements(flow: &Flow, runtime_package: &str) -> Vec<String> {
    let mut extras: BTreeSet<&str> = flow
        .models
        .iter()
        .map(|m| m.provider.package_extra())
        .collect();
    if flow
        .agents
        .iter()
        .any(|a| matches!(a.role, AgentRole::RetrievalProxy { .. }))
    {
        extras.insert("retrievechat");
    }
    let runtime = if extras.is_empty() {
        runtime_package.to_string()
    } else {
        format!(
            "{}[{}]",
            runtime_package,
            extras.into_iter().collect::<Vec<_>>().join(",")
        )
    };

    let mut all: BTreeSet<String> = BTreeSet::new();
    all.insert(runtime);
    for req in flow
        .requirements
        .iter()
        .chain(flow.tools.iter().flat_map(|t| t.requirements.iter()))
    {
        let req = req.trim();
        if !req.is_empty() {
            all.insert(req.to_string());
        }
    }
    all.into_iter().collect()
}

pub fn build(
    flow: &Flow,
    plan: &ExecutionPlan,
    config: &CompilerConfig,
) -> Result<Program, GenerationError> {
    let mut builder = Builder::new(flow, plan, config);
    builder.assign_names();

    let models = builder.models()?;
    let tools = builder.tools()?;
    let agents = builder.agents()?;
    let registrations = builder.registrations()?;
    let chats = builder.chats()?;

    let mut imports = Section::new(SectionKind::Imports, None);
    imports.extend(builder.imports.render());

    let mut setup = Section::new(SectionKind::RunSetup, None);
    if builder.uses_carryover() {
        setup.extend(lines(CARRYOVER_SOURCE));
        setup.blank();
    }
    setup.push("results = []");

    let mut sections = vec![imports, models, tools];
    sections.extend(agents);
    sections.push(registrations);
    sections.push(setup);
    sections.extend(chats);

    debug!(
        flow_id = %flow.id,
        sections = sections.len(),
        "Program built"
    );
    Ok(Program {
        slug: builder.slug,
        title: flow.name.clone(),
        description: flow.description.clone(),
        flow_id: flow.id.clone(),
        requirements: requirements(flow, &config.runtime_package),
        sections,
    })
}

struct Builder<'a> {
    flow: &'a Flow,
    plan: &'a ExecutionPlan,
    config: &'a CompilerConfig,
    slug: String,
    names: NameRegistry,
    group_vars: Vec<(EntityId, String)>,
    imports: ImportSet,
}

impl<'a> Builder<'a> {
    fn new(flow: &'a Flow, plan: &'a ExecutionPlan, config: &'a CompilerConfig) -> Self {
        Self {
            flow,
            plan,
            config,
            slug: flow_slug(flow),
            names: NameRegistry::new(),
            group_vars: Vec::new(),
            imports: ImportSet::new(),
        }
    }

    fn uses_carryover(&self) -> bool {
        self.plan
            .invocations
            .iter()
            .filter_map(|i| self.flow.chat(&i.chat))
            .any(|c| c.use_carryover)
    }

    fn assign_names(&mut self) {
        for tool in &self.flow.tools {
            self.names.reserve(&tool.id, &tool.name);
        }
        for model in &self.flow.models {
            self.names.assign(&model.id, &model.name, "model", "_llm_config");
        }
        for agent in &self.flow.agents {
            let name = self.names.assign(&agent.id, &agent.name, "agent", "");
            if agent.role.is_group_manager() {
                let var = self.names.derive(&format!("{}_group_chat", name));
                self.group_vars.push((agent.id.clone(), var));
            }
        }
    }

    fn name(&self, id: &EntityId) -> Result<&str, GenerationError> {
        self.names
            .get(id)
            .ok_or_else(|| GenerationError::UnknownEntity(id.clone()))
    }

    fn agent(&self, id: &EntityId) -> Result<&'a Agent, GenerationError> {
        self.flow
            .agent(id)
            .ok_or_else(|| GenerationError::UnknownEntity(id.clone()))
    }

    fn chat(&self, id: &EntityId) -> Result<&'a Chat, GenerationError> {
        self.flow
            .chat(id)
            .ok_or_else(|| GenerationError::UnknownEntity(id.clone()))
    }

    fn group_var(&self, manager: &EntityId) -> Result<&str, GenerationError> {
        self.group_vars
            .iter()
            .find(|(id, _)| id == manager)
            .map(|(_, var)| var.as_str())
            .ok_or_else(|| GenerationError::UnknownEntity(manager.clone()))
    }

    fn lit(
        &self,
        entity: &EntityId,
        field: &str,
        literal: OpaqueLiteral<'_>,
    ) -> Result<String, GenerationError> {
        literal.render().map_err(|reason| GenerationError::Embedding {
            entity: entity.clone(),
            field: field.to_string(),
            reason,
        })
    }

    fn float(&self, entity: &EntityId, field: &str, value: f32) -> Result<String, GenerationError> {
        literal::float(value).map_err(|reason| GenerationError::Embedding {
            entity: entity.clone(),
            field: field.to_string(),
            reason,
        })
    }

    fn models(&mut self) -> Result<Section, GenerationError> {
        let mut section = Section::new(SectionKind::Models, None);
        let getter = secrets_getter(&self.slug);
        for model in &self.flow.models {
            let mut entry: Vec<(String, String)> = vec![
                ("model".into(), self.lit(&model.id, "name", OpaqueLiteral::string(&model.name))?),
                ("api_type".into(), quote_plain(model.provider.api_type())),
            ];
            if let Some(url) = model.base_url() {
                entry.push(("base_url".into(), self.lit(&model.id, "base_url", OpaqueLiteral::string(url))?));
            }
            if model.credential.is_some() {
                self.imports.add(&secrets_module(&self.slug), &getter);
                entry.push((
                    "api_key".into(),
                    format!("{}({})", getter, quote_plain(model.id.as_str())),
                ));
            }

            let mut config: Vec<(String, String)> = vec![(
                "config_list".into(),
                format!("[\n{}\n]", indent(&dict(entry), 1)),
            )];
            config.push((
                "cache_seed".into(),
                self.config
                    .cache_seed
                    .map_or_else(|| "None".to_string(), |s| s.to_string()),
            ));
            if let Some(t) = model.temperature {
                config.push(("temperature".into(), self.float(&model.id, "temperature", t)?));
            }
            if let Some(p) = model.top_p {
                config.push(("top_p".into(), self.float(&model.id, "top_p", p)?));
            }
            if let Some(n) = model.max_tokens {
                config.push(("max_tokens".into(), n.to_string()));
            }

            if !section.lines.is_empty() {
                section.blank();
            }
            let var = self.name(&model.id)?.to_string();
            section.extend(lines(&format!("{} = {}", var, dict(config))));
        }
        Ok(section)
    }

    fn tools(&mut self) -> Result<Section, GenerationError> {
        let mut section = Section::new(SectionKind::Tools, None);
        let mut emitted: Vec<&str> = Vec::new();

        if self.flow.tools.iter().any(|t| !t.secrets.is_empty()) {
            let setter = tool_secrets_setter(&self.slug);
            self.imports.add(&secrets_module(&self.slug), &setter);
            section.push(format!("{}()", setter));
        }

        for tool in &self.flow.tools {
            let body = self.lit(&tool.id, "source", OpaqueLiteral::code(&tool.source))?;
            if !section.lines.is_empty() {
                section.blank();
                section.blank();
            }
            section.extend(lines(body.trim_end_matches('\n')));
            emitted.push(&tool.name);
        }

        for agent in &self.flow.agents {
            if let Termination::Function { name, source: Some(source) } = &agent.termination {
                if emitted.contains(&name.as_str()) {
                    continue;
                }
                let body = self.lit(&agent.id, "termination", OpaqueLiteral::code(source))?;
                if !section.lines.is_empty() {
                    section.blank();
                    section.blank();
                }
                section.extend(lines(body.trim_end_matches('\n')));
                emitted.push(name);
            }
        }

        let registers = self.flow.agents.iter().any(|a| {
            a.tools.iter().any(|b| {
                self.flow
                    .tool(&b.tool)
                    .is_some_and(|t| t.kind == ToolKind::Custom)
            })
        });
        if registers {
            self.imports.add("autogen", "register_function");
        }
        Ok(section)
    }

    fn agents(&mut self) -> Result<Vec<Section>, GenerationError> {
        let mut sections = Vec::new();
        for agent in construction_order(self.flow) {
            let mut section = Section::new(SectionKind::Agent, Some(&agent.id));
            let var = self.name(&agent.id)?.to_string();
            let mut args = vec![format!("name={}", self.lit(&agent.id, "name", OpaqueLiteral::string(&agent.name))?)];
            if !agent.description.trim().is_empty() {
                args.push(format!(
                    "description={}",
                    self.lit(&agent.id, "description", OpaqueLiteral::string(&agent.description))?
                ));
            }

            let class = match &agent.role {
                AgentRole::UserProxy => {
                    self.imports.add("autogen", "UserProxyAgent");
                    self.common_args(agent, &mut args)?;
                    args.push("code_execution_config=False".into());
                    "UserProxyAgent"
                }
                AgentRole::Assistant => {
                    self.imports.add("autogen", "AssistantAgent");
                    self.system_message(agent, &mut args)?;
                    self.common_args(agent, &mut args)?;
                    "AssistantAgent"
                }
                AgentRole::Reasoning { max_depth, beam_size } => {
                    self.imports.add("autogen.agents.experimental", "ReasoningAgent");
                    self.system_message(agent, &mut args)?;
                    self.common_args(agent, &mut args)?;
                    let mut reason: Vec<(String, String)> = Vec::new();
                    if let Some(depth) = max_depth {
                        reason.push(("max_depth".into(), depth.to_string()));
                    }
                    if let Some(beam) = beam_size {
                        reason.push(("beam_size".into(), beam.to_string()));
                    }
                    if !reason.is_empty() {
                        args.push(format!("reason_config={}", dict(reason)));
                    }
                    "ReasoningAgent"
                }
                AgentRole::RetrievalProxy { docs_path, collection, task } => {
                    self.imports.add(
                        "autogen.agentchat.contrib.retrieve_user_proxy_agent",
                        "RetrieveUserProxyAgent",
                    );
                    self.common_args(agent, &mut args)?;
                    args.push("code_execution_config=False".into());
                    let mut paths = Vec::new();
                    for path in docs_path.iter().filter(|p| !p.trim().is_empty()) {
                        paths.push(self.lit(&agent.id, "docs_path", OpaqueLiteral::path(path))?);
                    }
                    let mut retrieve: Vec<(String, String)> = vec![
                        ("task".into(), quote_plain(task.as_str())),
                        ("docs_path".into(), format!("[{}]", paths.join(", "))),
                    ];
                    if let Some(name) = collection {
                        retrieve.push((
                            "collection_name".into(),
                            self.lit(&agent.id, "collection", OpaqueLiteral::string(name))?,
                        ));
                    }
                    args.push(format!("retrieve_config={}", dict(retrieve)));
                    "RetrieveUserProxyAgent"
                }
                AgentRole::GroupManager { max_round, speaker_selection } => {
                    self.imports.add("autogen", "GroupChat");
                    self.imports.add("autogen", "GroupChatManager");
                    let group_var = self.group_var(&agent.id)?.to_string();
                    let group = self.plan.group(&agent.id);
                    section.extend(self.group_chat(&group_var, group, *max_round, speaker_selection.as_str())?);
                    section.blank();
                    args.push(format!("groupchat={}", group_var));
                    self.common_args(agent, &mut args)?;
                    "GroupChatManager"
                }
            };

            section.extend(lines(&call(&format!("{} = {}", var, class), &args)));
            sections.push(section);
        }
        Ok(sections)
    }

    fn system_message(&self, agent: &Agent, args: &mut Vec<String>) -> Result<(), GenerationError> {
        if let Some(msg) = agent.system_message.as_deref().filter(|m| !m.trim().is_empty()) {
            args.push(format!(
                "system_message={}",
                self.lit(&agent.id, "system_message", OpaqueLiteral::string(msg))?
            ));
        }
        Ok(())
    }

    fn common_args(&self, agent: &Agent, args: &mut Vec<String>) -> Result<(), GenerationError> {
        args.push(format!("human_input_mode={}", quote_plain(agent.human_input.as_str())));
        if let Some(n) = agent.max_consecutive_auto_reply {
            args.push(format!("max_consecutive_auto_reply={}", n));
        }
        if let Some(expr) = self.termination(agent)? {
            args.push(format!("is_termination_msg={}", expr));
        }
        let llm = match &agent.model {
            Some(model) => self.name(model)?.to_string(),
            None => "False".to_string(),
        };
        args.push(format!("llm_config={}", llm));
        Ok(())
    }

    fn termination(&self, agent: &Agent) -> Result<Option<String>, GenerationError> {
        let content = "str(x.get(\"content\") or \"\")";
        Ok(match &agent.termination {
            Termination::None => None,
            Termination::Keyword { keyword, criterion } => {
                let kw = self.lit(&agent.id, "termination", OpaqueLiteral::string(keyword))?;
                let test = match criterion {
                    KeywordCriterion::Contains => format!("{} in {}", kw, content),
                    KeywordCriterion::Exact => format!("{}.strip() == {}", content, kw),
                    KeywordCriterion::EndsWith => format!("{}.rstrip().endswith({})", content, kw),
                };
                Some(format!("lambda x: isinstance(x, dict) and {}", test))
            }
            Termination::Function { name, .. } => Some(name.clone()),
        })
    }

    fn group_chat(
        &self,
        var: &str,
        group: Option<&GroupPlan>,
        max_round: Option<u32>,
        selection: &str,
    ) -> Result<Vec<String>, GenerationError> {
        let mut members = Vec::new();
        let mut transitions: Vec<(String, String)> = Vec::new();
        if let Some(group) = group {
            for member in &group.members {
                members.push(self.name(member)?.to_string());
            }
            for member in &group.members {
                let targets: Vec<&str> = group
                    .transitions
                    .iter()
                    .filter(|(from, _)| from == member)
                    .map(|(_, to)| self.name(to))
                    .collect::<Result<_, _>>()?;
                if !targets.is_empty() {
                    transitions.push((self.name(member)?.to_string(), format!("[{}]", targets.join(", "))));
                }
            }
        }

        let mut args = vec![
            format!("agents=[{}]", members.join(", ")),
            "messages=[]".to_string(),
        ];
        if let Some(n) = max_round {
            args.push(format!("max_round={}", n));
        }
        args.push(format!("speaker_selection_method={}", quote_plain(selection)));
        if !transitions.is_empty() {
            args.push(format!(
                "allowed_or_disallowed_speaker_transitions={}",
                dict_raw(transitions)
            ));
            args.push("speaker_transitions_type=\"allowed\"".to_string());
        }
        Ok(lines(&call(&format!("{} = GroupChat", var), &args)))
    }

    fn registrations(&self) -> Result<Section, GenerationError> {
        let mut section = Section::new(SectionKind::Registrations, None);
        for agent in &self.flow.agents {
            for binding in &agent.tools {
                let tool = self
                    .flow
                    .tool(&binding.tool)
                    .ok_or_else(|| GenerationError::UnknownEntity(binding.tool.clone()))?;
                if tool.kind == ToolKind::Shared {
                    continue;
                }
                let executor = binding.executor.as_ref().unwrap_or(&agent.id);
                let mut args = vec![
                    tool.name.clone(),
                    format!("caller={}", self.name(&agent.id)?),
                    format!("executor={}", self.name(executor)?),
                    format!("name={}", quote_plain(&tool.name)),
                ];
                if !tool.description.trim().is_empty() {
                    args.push(format!(
                        "description={}",
                        self.lit(&tool.id, "description", OpaqueLiteral::string(&tool.description))?
                    ));
                }
                section.extend(lines(&call("register_function", &args)));
            }
        }

        for registration in &self.plan.nested {
            section.extend(self.nested(registration)?);
        }
        Ok(section)
    }

    fn nested(&self, registration: &NestedRegistration) -> Result<Vec<String>, GenerationError> {
        let mut queue = Vec::new();
        for chat_id in &registration.chats {
            let chat = self.chat(chat_id)?;
            let mut entry: Vec<(String, String)> = vec![("recipient".into(), self.name(&chat.target)?.to_string())];
            if let Some(message) = self.opening(chat)? {
                entry.push(("message".into(), message));
            }
            entry.extend(self.summary(chat)?);
            if let Some(turns) = chat.max_turns {
                entry.push(("max_turns".into(), turns.to_string()));
            }
            queue.push(dict(entry));
        }
        let args = vec![
            list_block(&queue),
            format!("trigger=[{}]", self.name(&registration.trigger)?),
        ];
        Ok(lines(&call(
            &format!("{}.register_nested_chats", self.name(&registration.agent)?),
            &args,
        )))
    }

    /// The `message` argument that opens a chat.
    fn opening(&self, chat: &Chat) -> Result<Option<String>, GenerationError> {
        Ok(match &chat.messages {
            ChatMessages::Sequence { messages } => match messages.first() {
                Some(first) => Some(self.lit(&chat.id, "message", OpaqueLiteral::string(first))?),
                None => None,
            },
            ChatMessages::Generator { function } => {
                let source = self.agent(&chat.source)?;
                if function == RETRIEVAL_MESSAGE_GENERATOR
                    && matches!(source.role, AgentRole::RetrievalProxy { .. })
                {
                    Some(format!("{}.{}", self.name(&source.id)?, function))
                } else {
                    Some(function.clone())
                }
            }
        })
    }

    fn summary(&self, chat: &Chat) -> Result<Vec<(String, String)>, GenerationError> {
        let mut out = Vec::new();
        match chat.summary.method {
            SummaryMethod::LastMessage => out.push(("summary_method".into(), quote_plain("last_msg"))),
            SummaryMethod::ReflectionWithLlm => {
                out.push(("summary_method".into(), quote_plain("reflection_with_llm")));
                if let Some(prompt) = chat.summary.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
                    let prompt = self.lit(&chat.id, "summary prompt", OpaqueLiteral::string(prompt))?;
                    out.push(("summary_args".into(), dict(vec![("summary_prompt".into(), prompt)])));
                }
            }
            SummaryMethod::None => out.push(("summary_method".into(), "None".into())),
        }
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<Section>, GenerationError> {
        let mut sections = Vec::new();
        for invocation in &self.plan.invocations {
            let mut section = Section::new(SectionKind::Chat, Some(&invocation.chat));
            let body = self.invocation(invocation)?;
            match &invocation.branch {
                Branch::Always => section.extend(body),
                Branch::Runtime { function } => {
                    section.push(format!("if {}(results):", function));
                    section.extend(body.into_iter().map(|l| indent_line(&l, 1)).collect());
                }
            }
            sections.push(section);
        }
        Ok(sections)
    }

    fn invocation(&self, invocation: &Invocation) -> Result<Vec<String>, GenerationError> {
        let chat = self.chat(&invocation.chat)?;
        let source = self.name(&invocation.source)?.to_string();
        let target = self.name(&invocation.target)?.to_string();

        let mut args = vec![target.clone()];
        let carryover = format!("{}(results)", CARRYOVER_HELPER);
        match (self.opening(chat)?, &chat.messages) {
            (Some(message), ChatMessages::Generator { .. }) if chat.use_carryover => {
                args.push(format!("message={}", message));
                args.push(format!("carryover={}", carryover));
            }
            (Some(message), _) if chat.use_carryover => {
                args.push(format!("message={} + {}", message, carryover));
            }
            (None, _) if chat.use_carryover => args.push(format!("message={}", carryover)),
            (Some(message), _) => args.push(format!("message={}", message)),
            (None, _) => {}
        }
        for (key, value) in self.summary(chat)? {
            args.push(format!("{}={}", key, value));
        }
        if let Some(turns) = chat.max_turns {
            args.push(format!("max_turns={}", turns));
        }
        if chat.clear_history {
            args.push("clear_history=True".into());
        }
        if chat.silent {
            args.push("silent=True".into());
        }

        let start = call(&format!("{}.initiate_chat", source), &args);
        let mut out = lines(&format!("results.append(\n{}\n)", indent(&start, 1)));

        if let ChatMessages::Sequence { messages } = &chat.messages {
            for follow_up in messages.iter().skip(1) {
                let msg = self.lit(&chat.id, "message", OpaqueLiteral::string(follow_up))?;
                out.push(format!("{}.send({}, {}, request_reply=True)", source, msg, target));
            }
        }
        Ok(out)
    }
}

const CARRYOVER_SOURCE: &str = r#"def last_carryover(results):
    """Summary of the latest finished chat, or an empty string."""
    for result in reversed(results):
        summary = getattr(result, "summary", "")
        if isinstance(summary, str) and summary:
            return summary
    return """#;

fn quote_plain(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn indent_line(line: &str, depth: usize) -> String {
    if line.is_empty() {
        String::new()
    } else {
        format!("{}{}", "    ".repeat(depth), line)
    }
}

fn indent(text: &str, depth: usize) -> String {
    text.lines()
        .map(|l| indent_line(l, depth))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `callee(\n    arg,\n)`; arguments may span several lines.
fn call(callee: &str, args: &[String]) -> String {
    if args.is_empty() {
        return format!("{}()", callee);
    }
    let mut out = format!("{}(\n", callee);
    for arg in args {
        out.push_str(&indent(arg, 1));
        out.push_str(",\n");
    }
    out.push(')');
    out
}

/// Dict literal with string keys.
fn dict(entries: Vec<(String, String)>) -> String {
    dict_raw(entries.into_iter().map(|(k, v)| (quote_plain(&k), v)).collect())
}

/// Dict literal with keys emitted as given.
fn dict_raw(entries: Vec<(String, String)>) -> String {
    if entries.is_empty() {
        return "{}".to_string();
    }
    let mut out = String::from("{\n");
    for (key, value) in entries {
        out.push_str(&indent(&format!("{}: {}", key, value), 1));
        out.push_str(",\n");
    }
    out.push('}');
    out
}

fn list_block(items: &[String]) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let mut out = String::from("[\n");
    for item in items {
        out.push_str(&indent(item, 1));
        out.push_str(",\n");
    }
    out.push(']');
    out
}
