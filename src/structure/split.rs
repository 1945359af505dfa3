use super::{one_shot_loop, solve, Error, MethodContext};
use crate::graph::{Graph, Node, NodeId};
use crate::wasm::Instruction;
use std::collections::HashSet;

/// Split the graph in two at a separator node and solve both halves on their own
///
/// The front region is everything reachable from the separator. It must not contain the entry,
/// and the rest of the graph (the back region) may only enter it through the separator. Control
/// then passes from back to front exactly once, so the halves can be laid out one after the
/// other:
///
/// ```text
/// loop $L
///   local.get $firstRun
///   if
///     i32.const 0
///     local.set $firstRun
///     <back region, with edges into the separator replaced by `br $L`>
///   end
/// end
/// <front region>
/// ```
///
/// The most balanced split wins, so that both halves shrink as much as possible.
pub fn split_regions(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<Option<Node>, Error> {
    let (separator, front) = match find_separator(graph) {
        Some(found) => found,
        None => return Ok(None),
    };
    log::debug!(
        "splitting {} nodes at node {} ({} in front)",
        graph.len(),
        graph[separator].index,
        front.len()
    );

    let label = ctx.fresh_label();
    let first_run = ctx.fresh_flag("firstRun");
    let separator_stack = graph[separator].input_stack.clone();

    // Back region nodes leave through a return node that jumps past the loop
    let mut exit_body = vec![];
    exit_body.extend(ctx.comment(|| "leave back region".to_string()));
    exit_body.extend(ctx.store_stack(&separator_stack));
    exit_body.push(Instruction::Br(label));
    let exit = graph.add_node(Node::new(exit_body, separator_stack.clone(), vec![]));
    let in_front: HashSet<NodeId> = front.iter().copied().collect();
    let back_inputs: Vec<NodeId> = graph[separator]
        .inputs
        .iter()
        .copied()
        .filter(|input| !in_front.contains(input))
        .collect();
    for input in back_inputs {
        graph.redirect_edge(input, separator, exit);
    }

    let front_graph = match graph.split_off(&front, separator) {
        Ok(front_graph) => front_graph,
        Err(message) => return Err(ctx.violation(graph, message)),
    };
    let entry_stack = graph[graph.entry()].input_stack.clone();
    ctx.enter_loop(label);
    let back = solve(std::mem::take(graph), ctx);
    ctx.leave_loop(label);
    let back = back?;
    let front = solve(front_graph, ctx)?;

    let mut once = ctx.load_stack(&entry_stack);
    once.extend(back.body);
    once.push(Instruction::Unreachable);

    let mut body = ctx.store_stack(&entry_stack);
    body.extend(one_shot_loop(label, first_run, once, vec![]));
    body.extend(ctx.load_stack(&separator_stack));
    body.extend(front.body);
    Ok(Some(Node::new(body, entry_stack, vec![])))
}

/// Best separator and the front region it leads into
fn find_separator(graph: &Graph) -> Option<(NodeId, Vec<NodeId>)> {
    let entry = graph.entry();
    let total = graph.len();
    let mut best: Option<(usize, NodeId, Vec<NodeId>)> = None;
    for separator in graph.ids().iter().copied() {
        if separator == entry || graph[separator].is_return() {
            continue;
        }
        let front = graph.reachable_from(separator, None);
        if front.len() < 2 || front.contains(&entry) {
            continue;
        }
        let in_front: HashSet<NodeId> = front.iter().copied().collect();
        let closed = front.iter().all(|node_id| {
            *node_id == separator
                || graph[*node_id]
                    .inputs
                    .iter()
                    .all(|input| in_front.contains(input))
        });
        if !closed {
            continue;
        }
        let balance = front.len().min(total - front.len());
        if best.as_ref().map_or(true, |(best, _, _)| balance > *best) {
            best = Some((balance, separator, front));
        }
    }
    best.map(|(_, separator, front)| (separator, front))
}
