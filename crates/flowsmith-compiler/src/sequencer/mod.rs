//! Turns the chat graph of a validated flow into an execution plan.
//!
//! Chats fall into exactly one of three buckets, checked in this order:
//! nested chats (registered on an agent, run when the trigger messages it),
//! group chats (speaker transitions inside a group manager), and top-level
//! chats (run one after another by the program's entry point). Group
//! membership wins over a declared sequence index.

pub mod graph;

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use flowsmith_core::error::SequencingError;
use flowsmith_core::{Chat, ChatCondition, EntityId, Flow};

pub use graph::{ChatGraph, EdgeKey};

/// How a top-level chat is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    /// Always started once its predecessors ran.
    Always,
    /// Started when `function(results)` returns a truthy value.
    Runtime { function: String },
}

/// Sub-plan of a group manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub manager: EntityId,
    /// Participating agents in first-appearance order.
    pub members: Vec<EntityId>,
    /// Allowed speaker transitions, first-appearance order.
    pub transitions: Vec<(EntityId, EntityId)>,
    pub chats: Vec<EntityId>,
}

/// Nested chats an agent runs when `trigger` messages it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedRegistration {
    pub agent: EntityId,
    pub trigger: EntityId,
    pub chats: Vec<EntityId>,
}

/// One top-level chat invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub chat: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    pub branch: Branch,
    /// Present when the target is a group manager.
    pub group: Option<GroupPlan>,
}

/// Ordered plan for a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub invocations: Vec<Invocation>,
    pub groups: Vec<GroupPlan>,
    pub nested: Vec<NestedRegistration>,
}

impl ExecutionPlan {
    pub fn group(&self, manager: &EntityId) -> Option<&GroupPlan> {
        self.groups.iter().find(|g| &g.manager == manager)
    }
}

fn order_key(chat: &Chat) -> (u32, EntityId) {
    (chat.sequence.unwrap_or(u32::MAX), chat.id.clone())
}

/// Build the execution plan of a validated flow.
pub fn plan(flow: &Flow) -> Result<ExecutionPlan, SequencingError> {
    let graph = ChatGraph::new(flow);
    debug!(chats = flow.chats.len(), edges = graph.len(), "Sequencing flow");

    let mut nested: Vec<&Chat> = Vec::new();
    let mut grouped: Vec<(EntityId, Vec<&Chat>)> = Vec::new();
    let mut top: Vec<&Chat> = Vec::new();
    let mut loose: Vec<&Chat> = Vec::new();

    for chat in &flow.chats {
        match (&chat.condition, &chat.group, chat.sequence) {
            (ChatCondition::NestedTrigger { .. }, _, _) => nested.push(chat),
            (_, Some(manager), _) => match grouped.iter_mut().find(|(m, _)| m == manager) {
                Some((_, chats)) => chats.push(chat),
                None => grouped.push((manager.clone(), vec![chat])),
            },
            (_, None, Some(_)) => top.push(chat),
            (_, None, None) => loose.push(chat),
        }
    }

    if top.is_empty() && loose.len() == 1 {
        debug!(chat_id = %loose[0].id, "Promoting single chat to top level");
        top.append(&mut loose);
    }
    if top.is_empty() {
        return Err(SequencingError::EmptyPlan);
    }
    if !loose.is_empty() {
        let ids: Vec<&str> = loose.iter().map(|c| c.id.as_str()).collect();
        warn!(
            chat_ids = %ids.join(", "),
            "Chats have no sequence index, skipping"
        );
    }

    let nested = nested_registrations(nested);
    let groups: Vec<GroupPlan> = grouped
        .into_iter()
        .map(|(manager, chats)| group_plan(manager, chats))
        .collect();
    let ordered = order_top_level(top)?;

    let invocations: Vec<Invocation> = ordered
        .into_iter()
        .map(|chat| Invocation {
            chat: chat.id.clone(),
            source: chat.source.clone(),
            target: chat.target.clone(),
            branch: match &chat.condition {
                ChatCondition::OnCondition { function } => Branch::Runtime {
                    function: function.clone(),
                },
                _ => Branch::Always,
            },
            group: groups.iter().find(|g| g.manager == chat.target).cloned(),
        })
        .collect();

    for group in &groups {
        let started = invocations.iter().any(|i| i.target == group.manager)
            || nested.iter().any(|n| {
                n.chats
                    .iter()
                    .filter_map(|id| flow.chat(id))
                    .any(|c| c.target == group.manager)
            });
        if !started {
            return Err(SequencingError::UnreachableGroup {
                manager: group.manager.clone(),
                chat: group.chats[0].clone(),
            });
        }
    }

    debug!(
        invocations = invocations.len(),
        groups = groups.len(),
        nested = nested.len(),
        "Execution plan ready"
    );
    Ok(ExecutionPlan {
        invocations,
        groups,
        nested,
    })
}

fn nested_registrations(chats: Vec<&Chat>) -> Vec<NestedRegistration> {
    let mut buckets: Vec<(EntityId, EntityId, Vec<&Chat>)> = Vec::new();
    for chat in chats {
        let ChatCondition::NestedTrigger { trigger } = &chat.condition else {
            continue;
        };
        match buckets
            .iter_mut()
            .find(|(agent, t, _)| agent == &chat.source && t == trigger)
        {
            Some((_, _, members)) => members.push(chat),
            None => buckets.push((chat.source.clone(), trigger.clone(), vec![chat])),
        }
    }
    buckets
        .into_iter()
        .map(|(agent, trigger, mut chats)| {
            chats.sort_by_key(|c| order_key(c));
            NestedRegistration {
                agent,
                trigger,
                chats: chats.iter().map(|c| c.id.clone()).collect(),
            }
        })
        .collect()
}

fn group_plan(manager: EntityId, mut chats: Vec<&Chat>) -> GroupPlan {
    chats.sort_by_key(|c| order_key(c));
    let mut members: Vec<EntityId> = Vec::new();
    let mut transitions: Vec<(EntityId, EntityId)> = Vec::new();
    for chat in &chats {
        for agent in [&chat.source, &chat.target] {
            if agent != &manager && !members.contains(agent) {
                members.push(agent.clone());
            }
        }
        if chat.source != manager && chat.target != manager {
            let edge = (chat.source.clone(), chat.target.clone());
            if !transitions.contains(&edge) {
                transitions.push(edge);
            }
        }
    }
    GroupPlan {
        manager,
        members,
        transitions,
        chats: chats.iter().map(|c| c.id.clone()).collect(),
    }
}

/// Order top-level chats by sequence index, then against prerequisites.
fn order_top_level(top: Vec<&Chat>) -> Result<Vec<&Chat>, SequencingError> {
    let by_id: HashMap<&EntityId, &Chat> = top.iter().map(|c| (&c.id, *c)).collect();

    let mut pending: HashMap<&EntityId, usize> = HashMap::new();
    let mut dependents: HashMap<&EntityId, Vec<&EntityId>> = HashMap::new();
    for chat in &top {
        let mut unique: BTreeSet<&EntityId> = BTreeSet::new();
        for pre in &chat.prerequisites {
            if !by_id.contains_key(pre) {
                return Err(SequencingError::UnreachablePredecessor {
                    chat: chat.id.clone(),
                    predecessor: pre.clone(),
                });
            }
            unique.insert(pre);
        }
        pending.insert(&chat.id, unique.len());
        for pre in unique {
            dependents.entry(pre).or_default().push(&chat.id);
        }
    }

    let mut ready: BTreeSet<(u32, EntityId)> = top
        .iter()
        .filter(|c| pending[&c.id] == 0)
        .map(|c| order_key(c))
        .collect();
    let mut ordered = Vec::with_capacity(top.len());

    while let Some(key) = ready.pop_first() {
        let chat = by_id[&key.1];
        ordered.push(chat);
        for dependent in dependents.get(&chat.id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(order_key(by_id[dependent]));
                }
            }
        }
    }

    if ordered.len() < top.len() {
        let mut involved: Vec<EntityId> = top
            .iter()
            .filter(|c| !ordered.iter().any(|o| o.id == c.id))
            .map(|c| c.id.clone())
            .collect();
        involved.sort();
        return Err(SequencingError::Cycle {
            chat: involved[0].clone(),
            involved,
        });
    }
    Ok(ordered)
}
