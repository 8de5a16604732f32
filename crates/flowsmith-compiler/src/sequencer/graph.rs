use std::collections::{BTreeMap, BTreeSet};

use flowsmith_core::{Chat, ChatCondition, EntityId, Flow};

/// Key a chat edge is indexed by.
pub type EdgeKey = (EntityId, EntityId, ChatCondition);

/// Chats of a flow indexed by `(source, target, condition)`.
///
/// Several chats may share a key; they keep declaration order.
#[derive(Debug)]
pub struct ChatGraph<'a> {
    edges: BTreeMap<EdgeKey, Vec<&'a Chat>>,
}

impl<'a> ChatGraph<'a> {
    pub fn new(flow: &'a Flow) -> Self {
        let mut edges: BTreeMap<EdgeKey, Vec<&'a Chat>> = BTreeMap::new();
        for chat in &flow.chats {
            edges.entry(chat.edge_key()).or_default().push(chat);
        }
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn chats(&self, key: &EdgeKey) -> &[&'a Chat] {
        self.edges.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &[&'a Chat])> {
        self.edges.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Sets of agents that can reach each other through chats accepted by
    /// `include`. Self loops are not considered; each set has two or more
    /// agents and is sorted.
    pub fn cycles(&self, include: impl Fn(&Chat) -> bool) -> Vec<Vec<EntityId>> {
        let mut adjacency: BTreeMap<&EntityId, BTreeSet<&EntityId>> = BTreeMap::new();
        for ((source, target, _), chats) in &self.edges {
            if source == target || !chats.iter().any(|c| include(c)) {
                continue;
            }
            adjacency.entry(source).or_default().insert(target);
            adjacency.entry(target).or_default();
        }

        let reach: BTreeMap<&EntityId, BTreeSet<&EntityId>> = adjacency
            .keys()
            .map(|node| (*node, reachable(&adjacency, *node)))
            .collect();

        let mut assigned: BTreeSet<&EntityId> = BTreeSet::new();
        let mut components = Vec::new();
        for node in adjacency.keys() {
            if assigned.contains(node) {
                continue;
            }
            let component: Vec<&EntityId> = adjacency
                .keys()
                .filter(|other| reach[node].contains(*other) && reach[*other].contains(node))
                .copied()
                .collect();
            assigned.extend(component.iter().copied());
            if component.len() > 1 {
                components.push(component.into_iter().cloned().collect());
            }
        }
        components
    }
}

fn reachable<'g>(
    adjacency: &BTreeMap<&'g EntityId, BTreeSet<&'g EntityId>>,
    from: &'g EntityId,
) -> BTreeSet<&'g EntityId> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if let Some(next) = adjacency.get(node) {
            for n in next {
                if seen.insert(*n) {
                    stack.push(*n);
                }
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_with(edges: &[(&str, &str)]) -> Flow {
        let mut flow = Flow::new("g");
        for (s, t) in edges {
            flow.chats.push(Chat::new(&EntityId::from(*s), &EntityId::from(*t)));
        }
        flow
    }

    #[test]
    fn test_edges_share_keys() {
        let flow = flow_with(&[("a", "b"), ("a", "b"), ("b", "a")]);
        let graph = ChatGraph::new(&flow);
        assert_eq!(graph.len(), 2);
        let key = (EntityId::from("a"), EntityId::from("b"), ChatCondition::Always);
        assert_eq!(graph.chats(&key).len(), 2);
    }

    #[test]
    fn test_cycles_found_and_self_loops_ignored() {
        let flow = flow_with(&[("a", "b"), ("b", "c"), ("c", "a"), ("d", "d"), ("c", "e")]);
        let graph = ChatGraph::new(&flow);
        let cycles = graph.cycles(|_| true);
        assert_eq!(cycles, vec![vec![EntityId::from("a"), EntityId::from("b"), EntityId::from("c")]]);
    }

    #[test]
    fn test_filter_breaks_cycle() {
        let mut flow = flow_with(&[("a", "b")]);
        flow.chats.push(
            Chat::new(&EntityId::from("b"), &EntityId::from("a")).with_condition(
                ChatCondition::OnCondition { function: "again".into() },
            ),
        );
        let graph = ChatGraph::new(&flow);
        assert_eq!(graph.cycles(|_| true).len(), 1);
        assert!(graph.cycles(|c| c.condition == ChatCondition::Always).is_empty());
    }
}
