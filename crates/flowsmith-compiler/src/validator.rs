//! Structural checks on a flow before it is compiled.

use std::collections::HashSet;

use tracing::debug;

use flowsmith_core::error::{ValidationReport, ViolationKind};
use flowsmith_core::{
    defines_function, AgentRole, Chat, ChatCondition, ChatMessages, EntityId, Flow, SpeakerSelection,
    Termination, ToolKind, RETRIEVAL_MESSAGE_GENERATOR,
};

use crate::codegen::names::is_identifier;
use crate::sequencer::ChatGraph;

/// Check a flow. Violations are reported in check order, then entity order.
pub fn validate(flow: &Flow) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_ids(flow, &mut report);
    check_duplicates(flow, &mut report);
    check_references(flow, &mut report);
    check_roles(flow, &mut report);
    check_fields(flow, &mut report);
    check_functions(flow, &mut report);
    check_self_loops(flow, &mut report);
    check_cycles(flow, &mut report);
    debug!(
        flow_id = %flow.id,
        violations = report.violations.len(),
        "Flow validated"
    );
    report
}

fn all_ids(flow: &Flow) -> Vec<(&EntityId, &'static str)> {
    let mut ids = vec![(&flow.id, "flow")];
    ids.extend(flow.models.iter().map(|m| (&m.id, "model")));
    ids.extend(flow.tools.iter().map(|t| (&t.id, "tool")));
    ids.extend(flow.agents.iter().map(|a| (&a.id, "agent")));
    ids.extend(flow.chats.iter().map(|c| (&c.id, "chat")));
    ids
}

fn check_ids(flow: &Flow, report: &mut ValidationReport) {
    for (id, kind) in all_ids(flow) {
        if !id.is_canonical() {
            report.push(
                id,
                ViolationKind::MalformedId,
                format!("{} id '{}' is not a unique id", kind, id),
            );
        }
    }
}

fn check_duplicates(flow: &Flow, report: &mut ValidationReport) {
    let mut seen: HashSet<&EntityId> = HashSet::new();
    let mut reported: HashSet<&EntityId> = HashSet::new();
    for (id, kind) in all_ids(flow) {
        if !seen.insert(id) && reported.insert(id) {
            report.push(
                id,
                ViolationKind::DuplicateId,
                format!("{} id is used by more than one entity", kind),
            );
        }
    }
}

fn check_references(flow: &Flow, report: &mut ValidationReport) {
    for agent in &flow.agents {
        if let Some(model) = &agent.model {
            if flow.model(model).is_none() {
                report.push(&agent.id, ViolationKind::MissingReference, format!("model {} not found", model));
            }
        }
        for binding in &agent.tools {
            if flow.tool(&binding.tool).is_none() {
                report.push(
                    &agent.id,
                    ViolationKind::MissingReference,
                    format!("tool {} not found", binding.tool),
                );
            }
            if let Some(executor) = &binding.executor {
                if flow.agent(executor).is_none() {
                    report.push(
                        &agent.id,
                        ViolationKind::MissingReference,
                        format!("executor agent {} not found", executor),
                    );
                }
            }
        }
    }

    for chat in &flow.chats {
        for (what, agent) in [("source", &chat.source), ("target", &chat.target)] {
            if flow.agent(agent).is_none() {
                report.push(
                    &chat.id,
                    ViolationKind::MissingReference,
                    format!("{} agent {} not found", what, agent),
                );
            }
        }
        if let Some(manager) = &chat.group {
            if flow.agent(manager).is_none() {
                report.push(
                    &chat.id,
                    ViolationKind::MissingReference,
                    format!("group manager {} not found", manager),
                );
            }
        }
        if let ChatCondition::NestedTrigger { trigger } = &chat.condition {
            if flow.agent(trigger).is_none() {
                report.push(
                    &chat.id,
                    ViolationKind::MissingReference,
                    format!("nested chat trigger {} not found", trigger),
                );
            }
        }
        for pre in &chat.prerequisites {
            if flow.chat(pre).is_none() {
                report.push(
                    &chat.id,
                    ViolationKind::MissingReference,
                    format!("prerequisite chat {} not found", pre),
                );
            }
        }
    }
}

fn check_roles(flow: &Flow, report: &mut ValidationReport) {
    for chat in &flow.chats {
        let Some(manager) = chat.group.as_ref().and_then(|id| flow.agent(id)) else {
            continue;
        };
        if !manager.role.is_group_manager() {
            report.push(
                &chat.id,
                ViolationKind::WrongRole,
                format!(
                    "group {} is a {}, not a group manager",
                    manager.name,
                    manager.role.label()
                ),
            );
        }
    }
}

fn check_fields(flow: &Flow, report: &mut ValidationReport) {
    if flow.name.trim().is_empty() {
        report.push(&flow.id, ViolationKind::MissingField, "flow name is empty");
    }

    for model in &flow.models {
        if model.name.trim().is_empty() {
            report.push(&model.id, ViolationKind::MissingField, "model name is empty");
        }
        if model.base_url().is_none() {
            report.push(
                &model.id,
                ViolationKind::MissingField,
                format!("{:?} models need an explicit base_url", model.provider),
            );
        }
    }

    for tool in &flow.tools {
        if !is_identifier(&tool.name) {
            report.push(
                &tool.id,
                ViolationKind::MissingField,
                format!("tool name '{}' is not a valid function name", tool.name),
            );
        } else if tool.kind == ToolKind::Custom && !tool.defines(&tool.name) {
            report.push(
                &tool.id,
                ViolationKind::MissingField,
                format!("tool source does not define 'def {}('", tool.name),
            );
        }
    }

    for agent in &flow.agents {
        if agent.name.trim().is_empty() {
            report.push(&agent.id, ViolationKind::MissingField, "agent name is empty");
        }
        match &agent.role {
            AgentRole::UserProxy | AgentRole::Assistant => {}
            AgentRole::RetrievalProxy { docs_path, .. } => {
                if docs_path.iter().all(|p| p.trim().is_empty()) {
                    report.push(
                        &agent.id,
                        ViolationKind::MissingField,
                        "retrieval proxy needs at least one docs_path",
                    );
                }
            }
            AgentRole::Reasoning { .. } => {
                if agent.model.is_none() {
                    report.push(&agent.id, ViolationKind::MissingField, "reasoning agent needs a model");
                }
            }
            AgentRole::GroupManager {
                speaker_selection, ..
            } => {
                if *speaker_selection == SpeakerSelection::Auto && agent.model.is_none() {
                    report.push(
                        &agent.id,
                        ViolationKind::MissingField,
                        "automatic speaker selection needs a model",
                    );
                }
                if flow.group_chats(&agent.id).next().is_none() {
                    report.push(
                        &agent.id,
                        ViolationKind::MissingField,
                        "group manager has no member chats",
                    );
                }
            }
        }
    }
}

fn check_functions(flow: &Flow, report: &mut ValidationReport) {
    for agent in &flow.agents {
        if let Termination::Function { name, source } = &agent.termination {
            let reachable = match source {
                Some(src) => defines_function(src, name),
                None => flow.defines_function(name),
            };
            if !reachable {
                report.push(
                    &agent.id,
                    ViolationKind::UnreachableFunction,
                    format!("termination function '{}' is not defined", name),
                );
            }
        }
    }

    for chat in &flow.chats {
        if let ChatCondition::OnCondition { function } = &chat.condition {
            if !flow.defines_function(function) {
                report.push(
                    &chat.id,
                    ViolationKind::UnreachableFunction,
                    format!("condition function '{}' is not defined", function),
                );
            }
        }
        if let ChatMessages::Generator { function } = &chat.messages {
            let builtin = function == RETRIEVAL_MESSAGE_GENERATOR
                && flow
                    .agent(&chat.source)
                    .is_some_and(|a| matches!(a.role, AgentRole::RetrievalProxy { .. }));
            if !builtin && !flow.defines_function(function) {
                report.push(
                    &chat.id,
                    ViolationKind::UnreachableFunction,
                    format!("message function '{}' is not defined", function),
                );
            }
        }
    }
}

fn terminates(flow: &Flow, agent: &EntityId) -> bool {
    flow.agent(agent).is_some_and(|a| !a.termination.is_none())
}

fn check_self_loops(flow: &Flow, report: &mut ValidationReport) {
    for chat in &flow.chats {
        if chat.source == chat.target
            && chat.condition == ChatCondition::Always
            && chat.max_turns.is_none()
            && !terminates(flow, &chat.source)
        {
            report.push(
                &chat.id,
                ViolationKind::SelfLoop,
                "agent chats with itself without termination or max_turns",
            );
        }
    }
}

/// Chats inside a group with a round limit are bounded by the group.
fn bounded_by_group(flow: &Flow, manager: Option<&EntityId>) -> bool {
    manager
        .and_then(|m| flow.agent(m))
        .is_some_and(|a| matches!(a.role, AgentRole::GroupManager { max_round: Some(_), .. }))
}

fn check_cycles(flow: &Flow, report: &mut ValidationReport) {
    let graph = ChatGraph::new(flow);
    let in_cycle_graph =
        |c: &Chat| c.condition == ChatCondition::Always && !bounded_by_group(flow, c.group.as_ref());
    let cycles = graph.cycles(in_cycle_graph);
    for agents in cycles {
        let members: HashSet<&EntityId> = agents.iter().collect();
        let agent_terminates = agents.iter().any(|a| terminates(flow, a));
        // Only a turn limit on one of the cycle's own edges bounds it.
        let chat_bounded = flow.chats.iter().any(|c| {
            in_cycle_graph(c)
                && c.source != c.target
                && members.contains(&c.source)
                && members.contains(&c.target)
                && c.max_turns.is_some()
        });
        if agent_terminates || chat_bounded {
            continue;
        }
        let names: Vec<&str> = agents
            .iter()
            .map(|a| flow.agent(a).map_or(a.as_str(), |agent| agent.name.as_str()))
            .collect();
        report.push(
            &agents[0],
            ViolationKind::UnterminatedCycle,
            format!(
                "agents {} chat in a cycle with no termination or max_turns",
                names.join(" -> ")
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsmith_core::{Agent, Chat, Model, ProviderKind, Tool};

    fn base_flow() -> (Flow, EntityId, EntityId) {
        let mut flow = Flow::new("demo");
        let model = Model::new("gpt-4o", ProviderKind::OpenAi);
        let a = Agent::new("user", AgentRole::UserProxy);
        let b = Agent::new("assistant", AgentRole::Assistant).with_model(&model.id);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        flow.models.push(model);
        flow.agents.push(a);
        flow.agents.push(b);
        (flow, a_id, b_id)
    }

    #[test]
    fn test_clean_flow_passes() {
        let (mut flow, a, b) = base_flow();
        flow.agents[1].termination = Termination::Keyword {
            keyword: "TERMINATE".into(),
            criterion: Default::default(),
        };
        flow.chats.push(Chat::new(&a, &b).with_message("hi"));
        let report = validate(&flow);
        assert!(report.is_ok(), "{}", report);
    }

    #[test]
    fn test_malformed_and_duplicate_ids() {
        let (mut flow, a, _) = base_flow();
        flow.agents[0].id = EntityId::from("wa-1");
        flow.models[0].id = a.clone();
        flow.agents[1].model = Some(a.clone());
        let report = validate(&flow);
        assert_eq!(report.violations[0].kind, ViolationKind::MalformedId);
        assert_eq!(report.violations[0].entity, EntityId::from("wa-1"));
        assert_eq!(report.of_kind(ViolationKind::DuplicateId).count(), 0);

        let (mut flow, a, _) = base_flow();
        flow.models[0].id = a.clone();
        flow.agents[1].model = Some(a.clone());
        let report = validate(&flow);
        let dup: Vec<_> = report.of_kind(ViolationKind::DuplicateId).collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].entity, a);
    }

    #[test]
    fn test_missing_references() {
        let (mut flow, a, _) = base_flow();
        let ghost = EntityId::new();
        flow.chats.push(Chat::new(&a, &ghost).with_message("hi"));
        flow.agents[0].tools.push(flowsmith_core::ToolBinding {
            tool: EntityId::new(),
            executor: None,
        });
        let report = validate(&flow);
        assert_eq!(report.of_kind(ViolationKind::MissingReference).count(), 2);
    }

    #[test]
    fn test_group_must_name_manager() {
        let (mut flow, a, b) = base_flow();
        flow.chats.push(Chat::new(&a, &b).in_group(&b).with_max_turns(2));
        let report = validate(&flow);
        let wrong: Vec<_> = report.of_kind(ViolationKind::WrongRole).collect();
        assert_eq!(wrong.len(), 1);
        assert!(wrong[0].cause.contains("assistant"));
    }

    #[test]
    fn test_missing_fields_per_variant() {
        let (mut flow, _, _) = base_flow();
        let rag = Agent::new("rag", AgentRole::RetrievalProxy {
            docs_path: vec![],
            collection: None,
            task: Default::default(),
        });
        let thinker = Agent::new("thinker", AgentRole::Reasoning { max_depth: None, beam_size: None });
        let manager = Agent::new("manager", AgentRole::GroupManager {
            max_round: None,
            speaker_selection: SpeakerSelection::Auto,
        });
        flow.agents.extend([rag, thinker, manager]);
        flow.models.push(Model::new("deployment", ProviderKind::Azure));
        flow.tools.push(Tool::new("fetch-page", "def fetch_page():\n    pass\n"));
        flow.tools.push(Tool::new("lookup", "def look_up():\n    pass\n"));

        let report = validate(&flow);
        let causes: Vec<&str> = report
            .of_kind(ViolationKind::MissingField)
            .map(|v| v.cause.as_str())
            .collect();
        assert_eq!(causes.len(), 7, "{:?}", causes);
        assert!(causes.iter().any(|c| c.contains("base_url")));
        assert!(causes.iter().any(|c| c.contains("not a valid function name")));
        assert!(causes.iter().any(|c| c.contains("def lookup(")));
        assert!(causes.iter().any(|c| c.contains("docs_path")));
        assert!(causes.iter().any(|c| c.contains("reasoning agent")));
        assert!(causes.iter().any(|c| c.contains("speaker selection")));
        assert!(causes.iter().any(|c| c.contains("no member chats")));
    }

    #[test]
    fn test_unreachable_functions() {
        let (mut flow, a, b) = base_flow();
        flow.agents[0].termination = Termination::Function { name: "is_done".into(), source: None };
        flow.chats.push(
            Chat::new(&a, &b)
                .with_condition(ChatCondition::OnCondition { function: "go_on".into() })
                .with_sequence(0),
        );
        let report = validate(&flow);
        assert_eq!(report.of_kind(ViolationKind::UnreachableFunction).count(), 2);

        flow.tools.push(Tool::new(
            "helpers",
            "def helpers():\n    pass\n\ndef is_done(msg):\n    return True\n\ndef go_on(results):\n    return True\n",
        ));
        assert_eq!(validate(&flow).of_kind(ViolationKind::UnreachableFunction).count(), 0);
    }

    #[test]
    fn test_retrieval_generator_is_builtin() {
        let (mut flow, _, b) = base_flow();
        let rag = Agent::new("rag", AgentRole::RetrievalProxy {
            docs_path: vec!["docs".into()],
            collection: None,
            task: Default::default(),
        });
        let mut chat = Chat::new(&rag.id, &b).with_max_turns(1);
        chat.messages = ChatMessages::Generator { function: RETRIEVAL_MESSAGE_GENERATOR.into() };
        flow.agents.push(rag);
        flow.chats.push(chat);
        assert!(validate(&flow).is_ok(), "{}", validate(&flow));
    }

    #[test]
    fn test_self_loop() {
        let (mut flow, a, _) = base_flow();
        flow.chats.push(Chat::new(&a, &a).with_message("again"));
        let report = validate(&flow);
        assert_eq!(report.of_kind(ViolationKind::SelfLoop).count(), 1);
        assert_eq!(report.of_kind(ViolationKind::UnterminatedCycle).count(), 0);
    }

    #[test]
    fn test_unterminated_cycle() {
        let (mut flow, a, b) = base_flow();
        flow.chats.push(Chat::new(&a, &b).with_message("ping").with_sequence(0));
        flow.chats.push(Chat::new(&b, &a).with_message("pong").with_sequence(1));
        let report = validate(&flow);
        let cycles: Vec<_> = report.of_kind(ViolationKind::UnterminatedCycle).collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].cause.contains("user"));

        flow.chats[1].max_turns = Some(3);
        assert!(validate(&flow).is_ok());
    }

    #[test]
    fn test_cycle_bound_must_be_on_a_cycle_edge() {
        let (mut flow, a, b) = base_flow();
        flow.chats.push(Chat::new(&a, &b).with_message("ping").with_sequence(0));
        flow.chats.push(Chat::new(&b, &a).with_message("pong").with_sequence(1));
        // Between the same agents, but outside the cycle: runtime-decided.
        flow.chats.push(
            Chat::new(&a, &b)
                .with_message("maybe")
                .with_sequence(2)
                .with_condition(ChatCondition::OnCondition { function: "go_on".into() })
                .with_max_turns(2),
        );
        let report = validate(&flow);
        assert_eq!(report.of_kind(ViolationKind::UnterminatedCycle).count(), 1);

        flow.chats[0].max_turns = Some(2);
        assert_eq!(validate(&flow).of_kind(ViolationKind::UnterminatedCycle).count(), 0);
    }
}
