//! Structuring acyclic graphs with flags
//!
//! In a graph without cycles, every node runs at most once. Each node records which way it went
//! by setting flag locals, and every node is guarded by an `if` testing the flags of the edges
//! coming into it. Nodes are nested inside the lowest common ancestor of their predecessors, which
//! guarantees that all of the predecessors have already run (or been skipped) by the time the
//! guard is tested.
//!
//! Values passed along edges are parked in stack slot locals, since sibling nodes in the nesting
//! can't pass values to each other on the operand stack.

use super::{Error, MethodContext};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::wasm::{Instruction, LocalId, NumericOp};
use std::collections::{HashMap, VecDeque};

/// How execution gets into the tree
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// The graph entry runs first and finds its inputs on the operand stack
    OnStack,

    /// The graph entry runs first and loads its inputs from the stack slot locals
    Unconditional,

    /// Nothing runs unless its flag in the extra inputs was set before the tree started
    FlagsOnly,
}

/// Flags a node sets to tell its successors which way it went
enum NodeFlags {
    Sequence(LocalId),
    Branch { if_true: LocalId, if_false: LocalId },
    Return,
}

/// Code of one node, waiting to be placed inside its parent in the nesting tree
struct Placed {
    /// Position of the node in the topological order
    idx: usize,

    /// Instructions computing whether the node should run (empty if it always runs)
    guard: Vec<Instruction>,

    code: Vec<Instruction>,
}

/// Topological order of the graph, or `None` if it has a cycle
///
/// The entry comes first if nothing leads into it. Other ties are broken by the current order of
/// the nodes.
pub fn topological_order(graph: &Graph) -> Option<Vec<NodeId>> {
    let mut pending_inputs: HashMap<NodeId, usize> = graph
        .iter()
        .map(|(node_id, node)| (node_id, node.inputs.len()))
        .collect();
    let position: HashMap<NodeId, usize> = graph
        .ids()
        .iter()
        .enumerate()
        .map(|(idx, node_id)| (*node_id, idx))
        .collect();

    let entry = graph.entry();
    let mut ready: VecDeque<NodeId> = graph
        .ids()
        .iter()
        .copied()
        .filter(|node_id| *node_id != entry && pending_inputs[node_id] == 0)
        .collect();
    if pending_inputs.get(&entry) == Some(&0) {
        ready.push_front(entry);
    }

    let mut order = Vec::with_capacity(graph.len());
    while let Some(node_id) = ready.pop_front() {
        order.push(node_id);
        let mut newly_ready = vec![];
        for output in graph[node_id].outputs() {
            if let Some(pending) = pending_inputs.get_mut(&output) {
                *pending -= 1;
                if *pending == 0 {
                    newly_ready.push(output);
                }
            }
        }
        newly_ready.sort_by_key(|node_id| position[node_id]);
        ready.extend(newly_ready);
    }

    if order.len() == graph.len() {
        Some(order)
    } else {
        None
    }
}

/// Structure an acyclic graph into a single body, or return `None` if the graph has a cycle
///
/// Nodes in `extra_inputs` also run if their flag local was set before the body started (those
/// flags are the responsibility of the caller). The produced body starts with the entry input
/// stack on the operand stack for [`TreeEntry::OnStack`] and with an empty stack otherwise. It
/// never falls through.
pub fn solve_linear_tree(
    graph: &Graph,
    extra_inputs: &HashMap<NodeId, LocalId>,
    tree_entry: TreeEntry,
    ctx: &mut MethodContext<'_>,
) -> Result<Option<Vec<Instruction>>, Error> {
    let order = match topological_order(graph) {
        Some(order) => order,
        None => return Ok(None),
    };
    let entry = graph.entry();
    let entry_runs_first = tree_entry != TreeEntry::FlagsOnly;
    if entry_runs_first && order.first() != Some(&entry) {
        return Ok(None);
    }
    log::trace!(
        "solving {} acyclic nodes ({} with extra inputs)",
        order.len(),
        extra_inputs.len()
    );

    // Flag locals for every node that has successors
    let mut flags: HashMap<NodeId, NodeFlags> = HashMap::new();
    for node_id in &order {
        let node = &graph[*node_id];
        let node_flags = match node.kind {
            NodeKind::Sequence { .. } => {
                NodeFlags::Sequence(ctx.fresh_flag(&format!("n{}", node.index)))
            }
            NodeKind::Branch { .. } => NodeFlags::Branch {
                if_true: ctx.fresh_flag(&format!("n{}T", node.index)),
                if_false: ctx.fresh_flag(&format!("n{}F", node.index)),
            },
            NodeKind::Return => NodeFlags::Return,
        };
        flags.insert(*node_id, node_flags);
    }

    // Nesting tree over positions in `order`, with a virtual root at `order.len()`
    let root = order.len();
    let position: HashMap<NodeId, usize> = order
        .iter()
        .enumerate()
        .map(|(idx, node_id)| (*node_id, idx))
        .collect();
    let mut parent: Vec<usize> = vec![root; root + 1];
    let mut depth: Vec<usize> = vec![0; root + 1];
    let mut children: Vec<Vec<Placed>> = (0..=root).map(|_| vec![]).collect();

    for (idx, node_id) in order.iter().enumerate() {
        let node = &graph[*node_id];
        let unconditional = entry_runs_first && idx == 0;

        // Flags that trigger this node, and the positions of the nodes that set them
        let mut triggers: Vec<LocalId> = vec![];
        let mut anchors: Vec<usize> = vec![];
        for input in &node.inputs {
            match (&flags[input], graph[*input].kind) {
                (NodeFlags::Sequence(flag), _) => triggers.push(*flag),
                (
                    NodeFlags::Branch { if_true, if_false },
                    NodeKind::Branch {
                        if_true: true_target,
                        if_false: false_target,
                    },
                ) => {
                    if true_target == *node_id {
                        triggers.push(*if_true);
                    }
                    if false_target == *node_id {
                        triggers.push(*if_false);
                    }
                }
                _ => (),
            }
            anchors.push(position[input]);
        }
        if let Some(extra) = extra_inputs.get(node_id) {
            triggers.push(*extra);
            anchors.push(root);
        }

        if unconditional {
            anchors = vec![root];
        } else if triggers.is_empty() {
            log::trace!("skipping node {}, which nothing leads to", node.index);
            continue;
        }
        let anchor = common_ancestor(&parent, &depth, &anchors, root);
        parent[idx] = anchor;
        depth[idx] = depth[anchor] + 1;

        // Code of the node itself: load inputs, run, set flags, park outputs
        let mut code = vec![];
        code.extend(ctx.comment(|| format!("node {}", node.index)));
        if !(unconditional && tree_entry == TreeEntry::OnStack) {
            code.extend(ctx.load_stack(&node.input_stack));
        }
        code.extend(node.body.iter().cloned());
        match &flags[node_id] {
            NodeFlags::Sequence(flag) => {
                code.push(Instruction::I32Const(1));
                code.push(Instruction::LocalSet(*flag));
            }
            NodeFlags::Branch { if_true, if_false } => {
                code.push(Instruction::LocalSet(*if_true));
                code.push(Instruction::LocalGet(*if_true));
                code.push(Instruction::Numeric(NumericOp::I32Eqz));
                code.push(Instruction::LocalSet(*if_false));
            }
            NodeFlags::Return => (),
        }
        if !node.is_return() {
            code.extend(ctx.store_stack(&node.output_stack));
        }

        // Once everything else has had its chance to return, the last node must be the one
        // reached, so it needs no guard
        let is_last = idx + 1 == order.len() && anchor == root;
        let mut guard = vec![];
        if !unconditional && !is_last {
            for (trigger_idx, trigger) in triggers.iter().enumerate() {
                guard.push(Instruction::LocalGet(*trigger));
                if trigger_idx > 0 {
                    guard.push(Instruction::Numeric(NumericOp::I32Or));
                }
            }
        }
        children[anchor].push(Placed { idx, guard, code });
    }

    // Flags start out unset
    let mut body = vec![];
    for node_id in &order {
        let flag_locals = match &flags[node_id] {
            NodeFlags::Sequence(flag) => vec![*flag],
            NodeFlags::Branch { if_true, if_false } => vec![*if_true, *if_false],
            NodeFlags::Return => vec![],
        };
        for flag in flag_locals {
            body.push(Instruction::I32Const(0));
            body.push(Instruction::LocalSet(flag));
        }
    }
    body.extend(assemble(root, &mut children));
    body.push(Instruction::Unreachable);
    Ok(Some(body))
}

/// Lowest common ancestor in the nesting tree
fn common_ancestor(parent: &[usize], depth: &[usize], nodes: &[usize], root: usize) -> usize {
    let mut nodes = nodes.iter().copied();
    let mut ancestor = match nodes.next() {
        Some(first) => first,
        None => return root,
    };
    for mut other in nodes {
        while depth[ancestor] > depth[other] {
            ancestor = parent[ancestor];
        }
        while depth[other] > depth[ancestor] {
            other = parent[other];
        }
        while ancestor != other {
            ancestor = parent[ancestor];
            other = parent[other];
        }
    }
    ancestor
}

/// Place the code of every node, followed by the nodes nested under it
fn assemble(idx: usize, children: &mut Vec<Vec<Placed>>) -> Vec<Instruction> {
    let mut body = vec![];
    for placed in std::mem::take(&mut children[idx]) {
        let mut code = placed.code;
        code.extend(assemble(placed.idx, children));
        if placed.guard.is_empty() {
            body.extend(code);
        } else {
            body.extend(placed.guard);
            body.push(Instruction::If {
                params: vec![],
                results: vec![],
                then_body: code,
                else_body: vec![],
            });
        }
    }
    body
}
