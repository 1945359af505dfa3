use super::{inline_exits, one_shot_loop, solve_linear_tree, Error, MethodContext, TreeEntry};
use crate::graph::{Graph, Node, NodeId, NodeKind};
use crate::wasm::Instruction;
use std::collections::{HashMap, HashSet};

/// Pull an acyclic prefix of the graph out into a single node
///
/// The prefix is everything the entry reaches without going through some node `middle`. It must
/// have no cycles and nothing outside of it may lead back in. The prefix gets solved as a linear
/// tree and replaced by a new entry node leading to `middle`. Of all the candidates, the largest
/// prefix wins.
///
/// Returns whether the graph changed.
pub fn extract_start_nodes(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let entry = graph.entry();
    let total = graph.len();
    let mut best: Option<(NodeId, Vec<NodeId>)> = None;
    for middle in graph.ids().iter().copied() {
        if middle == entry {
            continue;
        }
        let prefix = graph.reachable_from(entry, Some(middle));
        if prefix.len() < 2 || prefix.len() + 1 >= total {
            continue;
        }
        if best.as_ref().map_or(false, |(_, best)| best.len() >= prefix.len()) {
            continue;
        }
        if is_closed_dag(graph, &prefix) {
            best = Some((middle, prefix));
        }
    }
    let (middle, prefix) = match best {
        Some(best) => best,
        None => return Ok(false),
    };
    log::debug!(
        "extracting {} start nodes before node {}",
        prefix.len(),
        graph[middle].index
    );

    let label = ctx.fresh_label();
    let first_run = ctx.fresh_flag("firstRun");
    let middle_stack = graph[middle].input_stack.clone();
    for node_id in &prefix {
        inline_exits(
            graph,
            *node_id,
            |target| target == middle,
            |_| {
                let mut jump = ctx.store_stack(&middle_stack);
                jump.push(Instruction::Br(label));
                jump
            },
        );
    }

    let entry_stack = graph[entry].input_stack.clone();
    let prefix_graph = match graph.split_off(&prefix, entry) {
        Ok(prefix_graph) => prefix_graph,
        Err(message) => return Err(ctx.violation(graph, message)),
    };
    ctx.enter_loop(label);
    let prefix_body =
        solve_linear_tree(&prefix_graph, &HashMap::new(), TreeEntry::Unconditional, ctx);
    ctx.leave_loop(label);
    let prefix_body = match prefix_body? {
        Some(body) => body,
        None => return Err(ctx.violation(&prefix_graph, "start nodes have a cycle".to_string())),
    };

    let mut body = ctx.store_stack(&entry_stack);
    body.extend(one_shot_loop(label, first_run, prefix_body, vec![]));
    body.extend(ctx.load_stack(&middle_stack));
    let new_entry = graph.add_node(Node::new(body, entry_stack, middle_stack));
    graph.set_kind(new_entry, NodeKind::Sequence { next: middle });
    graph.set_entry(new_entry);
    graph.renumber();
    Ok(true)
}

/// Do the nodes form an acyclic region which can only be entered through its first node?
fn is_closed_dag(graph: &Graph, region: &[NodeId]) -> bool {
    let in_region: HashSet<NodeId> = region.iter().copied().collect();
    let entered_from_outside = region.iter().any(|node_id| {
        graph[*node_id]
            .inputs
            .iter()
            .any(|input| !in_region.contains(input))
    });
    if entered_from_outside {
        return false;
    }

    // Kahn's algorithm restricted to the region
    let mut pending: HashMap<NodeId, usize> = region
        .iter()
        .map(|node_id| (*node_id, graph[*node_id].inputs.len()))
        .collect();
    let mut ready: Vec<NodeId> = region
        .iter()
        .copied()
        .filter(|node_id| pending[node_id] == 0)
        .collect();
    let mut visited = 0;
    while let Some(node_id) = ready.pop() {
        visited += 1;
        for output in graph[node_id].outputs() {
            if let Some(count) = pending.get_mut(&output) {
                *count -= 1;
                if *count == 0 {
                    ready.push(output);
                }
            }
        }
    }
    visited == region.len()
}
