//! Turning a method graph into a single structured body
//!
//! Strategies are tried from the most to the least readable output:
//!
//!   1. the [`reduce`]r rewrites small shapes until nothing matches anymore
//!   2. acyclic graphs are solved with [`solve_linear_tree`]
//!   3. an acyclic prefix of the graph gets extracted (then back to 1.)
//!   4. the nodes that can't reach any cycle get extracted and solved separately
//!   5. the graph gets split at a node that separates it into two regions
//!   6. everything else becomes a `loop` around a `switch` on the next node
//!
//! The last strategy always succeeds, so structuring only fails on malformed input.

mod big_loop;
mod context;
mod diagnostics;
mod dispatch;
mod errors;
mod extract_end;
mod extract_start;
mod linear_tree;
mod reducer;
mod settings;
mod split;

pub use context::*;
pub use diagnostics::*;
pub use errors::*;
pub use linear_tree::{solve_linear_tree, topological_order, TreeEntry};
pub use reducer::{is_solved, reduce};
pub use settings::*;

use crate::graph::{Graph, Node, NodeId, NodeKind};
use crate::wasm::{falls_through, negate_condition, Instruction, LocalId, LoopLabel};
use std::collections::HashMap;

/// Structure the control flow of a method
///
/// The result is a single node which returns (or traps) and whose body has been verified against
/// the input stack of the graph entry.
pub fn structure(mut graph: Graph, ctx: &mut MethodContext<'_>) -> Result<Node, Error> {
    if graph.is_empty() {
        return Err(Error::EmptyGraph);
    }
    log::debug!("structuring {} ({} nodes)", ctx.signature, graph.len());
    normalize(&mut graph, ctx)?;
    let node = solve(graph, ctx)?;
    ctx.check_solved(&node)?;
    Ok(node)
}

/// Get the graph into a consistent state and check that it is well formed
fn normalize(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<(), Error> {
    graph.recalculate_inputs();
    if let Err(message) = graph.check_links() {
        return Err(ctx.violation(graph, message));
    }

    // Unreachable nodes are normal (eg. exception handlers that got discarded)
    let removed = graph.remove_unreachable();
    if !removed.is_empty() {
        log::warn!(
            "dropped {} unreachable nodes from {}",
            removed.len(),
            ctx.signature
        );
    }

    // Return nodes whose code just ends still need to return
    let ids = graph.ids().to_vec();
    for node_id in ids {
        let node = &mut graph[node_id];
        if node.is_return() && falls_through(&node.body) {
            node.body.push(Instruction::Return);
        }
    }

    graph.renumber();
    ctx.check_graph(graph)
}

/// Solve a graph (or a region of a graph) down to a single returning node
fn solve(mut graph: Graph, ctx: &mut MethodContext<'_>) -> Result<Node, Error> {
    loop {
        if reduce(&mut graph, ctx)? {
            let entry = graph.entry();
            return Ok(graph.remove_node(entry));
        }
        graph.renumber();
        log::debug!("reducer is stuck with {} nodes", graph.len());

        let entry = graph.entry();
        if let Some(body) = solve_linear_tree(&graph, &HashMap::new(), TreeEntry::OnStack, ctx)? {
            log::debug!("solved {} nodes as a linear tree", graph.len());
            return Ok(returning_node(body, &graph[entry]));
        }

        if extract_start::extract_start_nodes(&mut graph, ctx)? {
            ctx.check_step(&graph, "extract start nodes")?;
            continue;
        }

        if let Some(node) = extract_end::extract_end_nodes(&mut graph, ctx)? {
            return Ok(node);
        }

        if big_loop::extract_big_loop(&mut graph, ctx)? {
            ctx.check_step(&graph, "extract big loop")?;
            continue;
        }

        if let Some(node) = split::split_regions(&mut graph, ctx)? {
            return Ok(node);
        }

        return dispatch::flat_dispatch(&mut graph, ctx);
    }
}

/// Node with the given body, taking the input of some existing node
fn returning_node(body: Vec<Instruction>, like: &Node) -> Node {
    Node::new(body, like.input_stack.clone(), vec![])
}

/// Loop which runs `once` the first time around and `otherwise` after a branch back
///
/// ```text
/// i32.const 1
/// local.set $first
/// loop $L
///   local.get $first
///   if
///     i32.const 0
///     local.set $first
///     <once>
///   else
///     <otherwise>
///   end
/// end
/// ```
///
/// This is how code jumps forward: `once` parks whatever state it needs in locals and does
/// `br $L`, which lands in `otherwise`.
fn one_shot_loop(
    label: LoopLabel,
    first: LocalId,
    once: Vec<Instruction>,
    otherwise: Vec<Instruction>,
) -> Vec<Instruction> {
    let mut then_body = vec![Instruction::I32Const(0), Instruction::LocalSet(first)];
    then_body.extend(once);
    vec![
        Instruction::I32Const(1),
        Instruction::LocalSet(first),
        Instruction::Loop {
            label,
            params: vec![],
            results: vec![],
            body: vec![
                Instruction::LocalGet(first),
                Instruction::If {
                    params: vec![],
                    results: vec![],
                    then_body,
                    else_body: otherwise,
                },
            ],
        },
    ]
}

/// Replace the edges of a node going to `leaving` nodes with inline code from `jump`
///
/// The jump code finds the output stack of the node on the operand stack and must not fall
/// through. A node left with no edges becomes a return node.
fn inline_exits(
    graph: &mut Graph,
    node_id: NodeId,
    leaving: impl Fn(NodeId) -> bool,
    mut jump: impl FnMut(NodeId) -> Vec<Instruction>,
) {
    let output_stack = graph[node_id].output_stack.clone();
    let kind = graph[node_id].kind;
    match kind {
        NodeKind::Sequence { next } if leaving(next) => {
            graph[node_id].body.extend(jump(next));
            graph.set_kind(node_id, NodeKind::Return);
        }
        NodeKind::Branch { if_true, if_false } if leaving(if_true) && leaving(if_false) => {
            let then_body = jump(if_true);
            let else_body = jump(if_false);
            graph[node_id].body.push(Instruction::If {
                params: output_stack,
                results: vec![],
                then_body,
                else_body,
            });
            graph.set_kind(node_id, NodeKind::Return);
        }
        NodeKind::Branch { if_true, if_false } if leaving(if_true) || leaving(if_false) => {
            let (exit, stay) = if leaving(if_true) {
                (if_true, if_false)
            } else {
                negate_condition(&mut graph[node_id].body);
                (if_false, if_true)
            };
            let then_body = jump(exit);
            graph[node_id].body.push(Instruction::If {
                params: output_stack.clone(),
                results: output_stack,
                then_body,
                else_body: vec![],
            });
            graph.set_kind(node_id, NodeKind::Sequence { next: stay });
        }
        _ => (),
    }
}
