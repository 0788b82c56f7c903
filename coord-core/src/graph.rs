//! Trigger expression DAG (C5, graph half): turns an [`ExprNode`] into a
//! flat node arena with predecessor/successor links, and evaluates it
//! against notifications (spec.md §4.4).
//!
//! Nodes are built children-first, so a plain increasing-index sweep over
//! the arena is already a valid bottom-up (postorder) propagation pass --
//! no separate topological sort is needed.

use std::cell::Cell;
use std::collections::HashMap;

use crate::expr::ExprNode;
use crate::notification::Notification;
use crate::trigger::TriggerDefinition;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Leaf,
    And,
    Or,
    Seq,
}

struct Node {
    /// The trigger name for a leaf, or the operator label (`"and"`/`"or"`/
    /// `"seq"`) for an internal node.
    name: String,
    kind: NodeKind,
    /// Predecessors in evaluation order: children must satisfy before this
    /// node can.
    children: Vec<usize>,
    satisfied: Cell<bool>,
    /// Only meaningful for `Seq`: index of the next child expected to
    /// satisfy. Monotonically increasing, per the "no reset" design note
    /// in spec.md §9.
    seq_progress: Cell<usize>,
}

/// A parsed trigger expression wired into an evaluable DAG. `satisfied` on
/// every node is monotone: once true, a node never reports false again
/// (property P3).
pub struct TriggerGraph {
    nodes: Vec<Node>,
    root: usize,
}

impl TriggerGraph {
    pub fn build(expr: &ExprNode) -> Self {
        let mut nodes = Vec::new();
        let root = build_node(expr, &mut nodes);
        TriggerGraph { nodes, root }
    }

    pub fn is_satisfied(&self) -> bool {
        self.nodes[self.root].satisfied.get()
    }

    /// The trigger names named by every leaf, for wiring/validating a plan's
    /// `triggerName -> TriggerDefinition` map at compile time.
    pub fn leaf_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Leaf)
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Fans `notification` out to every leaf currently eligible to receive
    /// it -- which, under a `seq`, excludes any child but the one currently
    /// pending (this is what makes property P4 hold) -- then propagates
    /// satisfaction upward. Returns `true` iff the root just became
    /// satisfied by this call.
    pub fn notify(&self, definitions: &HashMap<String, TriggerDefinition>, notification: &Notification) -> bool {
        if self.is_satisfied() {
            return false;
        }
        let mut eligible = Vec::new();
        self.collect_eligible(self.root, &mut eligible);
        for i in eligible {
            let node = &self.nodes[i];
            if let Some(def) = definitions.get(&node.name) {
                if def.satisfy(notification) {
                    node.satisfied.set(true);
                }
            }
        }
        for i in 0..self.nodes.len() {
            self.update_internal(i);
        }
        self.is_satisfied()
    }

    fn collect_eligible(&self, i: usize, out: &mut Vec<usize>) {
        let node = &self.nodes[i];
        if node.satisfied.get() {
            return;
        }
        match node.kind {
            NodeKind::Leaf => out.push(i),
            NodeKind::And | NodeKind::Or => {
                for &c in &node.children {
                    self.collect_eligible(c, out);
                }
            }
            NodeKind::Seq => {
                let progress = node.seq_progress.get();
                if let Some(&next) = node.children.get(progress) {
                    self.collect_eligible(next, out);
                }
            }
        }
    }

    fn update_internal(&self, i: usize) {
        let node = &self.nodes[i];
        if node.satisfied.get() || node.kind == NodeKind::Leaf {
            return;
        }
        match node.kind {
            NodeKind::And => {
                if node.children.iter().all(|&c| self.nodes[c].satisfied.get()) {
                    node.satisfied.set(true);
                }
            }
            NodeKind::Or => {
                if node.children.iter().any(|&c| self.nodes[c].satisfied.get()) {
                    node.satisfied.set(true);
                }
            }
            NodeKind::Seq => {
                let mut progress = node.seq_progress.get();
                while progress < node.children.len() && self.nodes[node.children[progress]].satisfied.get() {
                    progress += 1;
                }
                node.seq_progress.set(progress);
                if progress == node.children.len() {
                    node.satisfied.set(true);
                }
            }
            NodeKind::Leaf => unreachable!(),
        }
    }
}

fn build_node(expr: &ExprNode, nodes: &mut Vec<Node>) -> usize {
    match expr {
        ExprNode::Leaf(name) => push(nodes, name.clone(), NodeKind::Leaf, Vec::new()),
        ExprNode::And(l, r) => {
            let li = build_node(l, nodes);
            let ri = build_node(r, nodes);
            push(nodes, "and".to_string(), NodeKind::And, vec![li, ri])
        }
        ExprNode::Or(l, r) => {
            let li = build_node(l, nodes);
            let ri = build_node(r, nodes);
            push(nodes, "or".to_string(), NodeKind::Or, vec![li, ri])
        }
        ExprNode::Seq(items) => {
            let children: Vec<usize> = items.iter().map(|e| build_node(e, nodes)).collect();
            push(nodes, "seq".to_string(), NodeKind::Seq, children)
        }
    }
}

fn push(nodes: &mut Vec<Node>, name: String, kind: NodeKind, children: Vec<usize>) -> usize {
    nodes.push(Node {
        name,
        kind,
        children,
        satisfied: Cell::new(false),
        seq_progress: Cell::new(0),
    });
    nodes.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use crate::notification::{BlockingHandle, ObjectEvent};
    use crate::resource::{ObservationPoint, ObservedWhen, ResourceKey};
    use crate::trigger::ObjectPresenceTrigger;

    fn point() -> ObservationPoint {
        ObservationPoint::new(ObservedWhen::AfterApiServerRecv, "api-A")
    }

    fn create_event(key: &ResourceKey) -> Notification {
        let (h, _rx) = BlockingHandle::pair();
        Notification::ObjectCreate(
            ObjectEvent {
                resource_key: key.clone(),
                point: point(),
            },
            h,
        )
    }

    fn delete_event(key: &ResourceKey) -> Notification {
        let (h, _rx) = BlockingHandle::pair();
        Notification::ObjectDelete(
            ObjectEvent {
                resource_key: key.clone(),
                point: point(),
            },
            h,
        )
    }

    #[test]
    fn s1_seq_create_then_delete() {
        let key = ResourceKey::new("pods", "default", "y");
        let mut defs = HashMap::new();
        defs.insert(
            "c".to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new("c", key.clone(), point(), 1)),
        );
        defs.insert(
            "d".to_string(),
            TriggerDefinition::ObjectDelete(ObjectPresenceTrigger::new("d", key.clone(), point(), 1)),
        );
        let graph = TriggerGraph::build(&parse_expression("seq(c,d)").unwrap());

        assert!(!graph.notify(&defs, &create_event(&key)));
        assert!(!graph.is_satisfied());
        assert!(graph.notify(&defs, &delete_event(&key)));
        assert!(graph.is_satisfied());
    }

    #[test]
    fn p4_seq_does_not_let_later_events_skip_ahead() {
        let key = ResourceKey::new("pods", "default", "y");
        let other = ResourceKey::new("pods", "default", "z");
        let mut defs = HashMap::new();
        defs.insert(
            "c".to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new("c", key.clone(), point(), 1)),
        );
        defs.insert(
            "d".to_string(),
            TriggerDefinition::ObjectDelete(ObjectPresenceTrigger::new("d", other.clone(), point(), 1)),
        );
        let graph = TriggerGraph::build(&parse_expression("seq(c,d)").unwrap());

        // A delete on `other` arrives before `c` is satisfied; must not
        // advance `d`'s counter.
        assert!(!graph.notify(&defs, &delete_event(&other)));
        assert!(!graph.notify(&defs, &create_event(&key)));
        // Now the same delete must still be required to fire.
        assert!(graph.notify(&defs, &delete_event(&other)));
        assert!(graph.is_satisfied());
    }

    #[test]
    fn s5_and_requires_both_leaves() {
        let key_a = ResourceKey::new("pods", "default", "a");
        let key_b = ResourceKey::new("pods", "default", "b");
        let mut defs = HashMap::new();
        defs.insert(
            "a".to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new("a", key_a.clone(), point(), 1)),
        );
        defs.insert(
            "b".to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new("b", key_b.clone(), point(), 1)),
        );
        let graph = TriggerGraph::build(&parse_expression("a and b").unwrap());

        assert!(!graph.notify(&defs, &create_event(&key_a)));
        assert!(!graph.is_satisfied());
        assert!(graph.notify(&defs, &create_event(&key_b)));
        assert!(graph.is_satisfied());
    }

    #[test]
    fn p3_monotone_satisfaction() {
        let key = ResourceKey::new("pods", "default", "a");
        let mut defs = HashMap::new();
        defs.insert(
            "a".to_string(),
            TriggerDefinition::ObjectCreate(ObjectPresenceTrigger::new("a", key.clone(), point(), 1)),
        );
        let graph = TriggerGraph::build(&parse_expression("a").unwrap());
        assert!(graph.notify(&defs, &create_event(&key)));
        assert!(graph.is_satisfied());
        // Further unrelated notifications cannot unsatisfy it.
        assert!(!graph.notify(&defs, &create_event(&key)));
        assert!(graph.is_satisfied());
    }
}
