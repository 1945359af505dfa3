use crate::wasm::{Instruction, ValueType};
use std::collections::BTreeSet;
use std::fmt;

/// Handle to a node in a [`super::Graph`]
///
/// Handles stay valid (and are never reused) for the whole life of the graph, even as other nodes
/// are removed.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct NodeId(pub(crate) usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("n{}", self.0))
    }
}

/// How control leaves a node
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Always continues on to `next`
    Sequence { next: NodeId },

    /// Pops an `i32` condition left by the body and continues to `if_true` when it is non-zero
    Branch { if_true: NodeId, if_false: NodeId },

    /// The body never falls through (it returns, traps, or branches to an enclosing loop)
    Return,
}

impl NodeKind {
    /// Successors of the node, in a fixed order (`if_true` before `if_false`)
    pub fn outputs(&self) -> impl Iterator<Item = NodeId> {
        let outputs = match *self {
            NodeKind::Sequence { next } => [Some(next), None],
            NodeKind::Branch { if_true, if_false } => [Some(if_true), Some(if_false)],
            NodeKind::Return => [None, None],
        };
        outputs.into_iter().flatten()
    }

    /// Does control go from this node to `target`?
    pub fn targets(&self, target: NodeId) -> bool {
        self.outputs().any(|output| output == target)
    }

    /// Redirect every edge going to `old_target` to `new_target` instead
    pub fn retarget(&mut self, old_target: NodeId, new_target: NodeId) {
        let swap = |node: &mut NodeId| {
            if *node == old_target {
                *node = new_target;
            }
        };
        match self {
            NodeKind::Sequence { next } => swap(next),
            NodeKind::Branch { if_true, if_false } => {
                swap(if_true);
                swap(if_false);
            }
            NodeKind::Return => (),
        }
    }

    /// Replace every successor with the result of `f`
    pub fn map_outputs(&self, mut f: impl FnMut(NodeId) -> NodeId) -> NodeKind {
        match *self {
            NodeKind::Sequence { next } => NodeKind::Sequence { next: f(next) },
            NodeKind::Branch { if_true, if_false } => NodeKind::Branch {
                if_true: f(if_true),
                if_false: f(if_false),
            },
            NodeKind::Return => NodeKind::Return,
        }
    }

    /// Single letter summary, used in graph fingerprints
    pub const fn letter(&self) -> char {
        match self {
            NodeKind::Sequence { .. } => 'N',
            NodeKind::Branch { .. } => 'B',
            NodeKind::Return => 'R',
        }
    }
}

/// Basic block of the method, already translated into WASM
#[derive(Clone, Debug)]
pub struct Node {
    /// Translated code
    ///
    /// The body starts with `input_stack` on the operand stack. Sequence nodes leave
    /// `output_stack`, branch nodes leave `output_stack` with the `i32` condition on top.
    pub body: Vec<Instruction>,

    /// Stack expected when entering the node
    pub input_stack: Vec<ValueType>,

    /// Stack handed on to successors
    pub output_stack: Vec<ValueType>,

    /// Predecessors of this node
    ///
    /// This is derived from the successors of other nodes and maintained by [`super::Graph`].
    pub inputs: BTreeSet<NodeId>,

    /// Position of the node in the graph ordering (see [`super::Graph::renumber`])
    pub index: usize,

    /// Successors
    pub kind: NodeKind,
}

impl Node {
    /// Make a node with no edges
    pub fn new(
        body: Vec<Instruction>,
        input_stack: Vec<ValueType>,
        output_stack: Vec<ValueType>,
    ) -> Node {
        Node {
            body,
            input_stack,
            output_stack,
            inputs: BTreeSet::new(),
            index: 0,
            kind: NodeKind::Return,
        }
    }

    pub fn outputs(&self) -> impl Iterator<Item = NodeId> {
        self.kind.outputs()
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, NodeKind::Return)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch { .. })
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, NodeKind::Sequence { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retargeting() {
        let (a, b, c) = (NodeId(0), NodeId(1), NodeId(2));
        let mut kind = NodeKind::Branch {
            if_true: a,
            if_false: b,
        };
        kind.retarget(a, c);
        assert_eq!(
            kind,
            NodeKind::Branch {
                if_true: c,
                if_false: b
            }
        );
        assert_eq!(kind.outputs().collect::<Vec<_>>(), vec![c, b]);
        assert!(kind.targets(b));
        assert!(!kind.targets(a));
        assert_eq!(NodeKind::Return.outputs().count(), 0);
    }
}
