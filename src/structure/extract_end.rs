use super::{
    inline_exits, one_shot_loop, solve, solve_linear_tree, Error, MethodContext, TreeEntry,
};
use crate::graph::{Graph, Node, NodeId};
use crate::wasm::{Instruction, LocalId};
use std::collections::{HashMap, HashSet};

/// Pull out the nodes which definitely return, and solve them separately
///
/// End nodes are the ones from which no cycle can be reached. They form an acyclic graph of
/// their own, so they can be solved as a linear tree. Edges from the rest of the graph into end
/// nodes become jumps that set a flag for the end node and branch to the start of a loop wrapping
/// both halves:
///
/// ```text
/// loop $L
///   local.get $firstRun
///   if
///     i32.const 0
///     local.set $firstRun
///     <rest of the graph>
///   else
///     <end nodes, triggered by their flags>
///   end
/// end
/// ```
pub fn extract_end_nodes(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<Option<Node>, Error> {
    let entry = graph.entry();
    let end_nodes = find_end_nodes(graph);
    let worth_it = match end_nodes.len() {
        0 => false,
        1 => graph[end_nodes[0]].inputs.len() > 1,
        _ => true,
    };
    if !worth_it || end_nodes.contains(&entry) {
        return Ok(None);
    }
    log::debug!(
        "extracting {} of {} nodes as end nodes",
        end_nodes.len(),
        graph.len()
    );

    let label = ctx.fresh_label();
    let first_run = ctx.fresh_flag("firstRun");
    let is_end: HashSet<NodeId> = end_nodes.iter().copied().collect();
    let mut end_flags: HashMap<NodeId, LocalId> = HashMap::new();
    let main_nodes: Vec<NodeId> = graph
        .ids()
        .iter()
        .copied()
        .filter(|node_id| !is_end.contains(node_id))
        .collect();
    let end_indices: HashMap<NodeId, usize> = end_nodes
        .iter()
        .map(|end_node| (*end_node, graph[*end_node].index))
        .collect();
    for node_id in main_nodes {
        let output_stack = graph[node_id].output_stack.clone();
        inline_exits(
            graph,
            node_id,
            |target| is_end.contains(&target),
            |target| {
                let flag = *end_flags.entry(target).or_insert_with(|| {
                    ctx.fresh_flag(&format!("endNode{}", end_indices[&target]))
                });
                let mut jump = ctx.store_stack(&output_stack);
                jump.push(Instruction::I32Const(1));
                jump.push(Instruction::LocalSet(flag));
                jump.push(Instruction::Br(label));
                jump
            },
        );
    }

    let end_graph = match graph.split_off(&end_nodes, end_nodes[0]) {
        Ok(end_graph) => end_graph,
        Err(message) => return Err(ctx.violation(graph, message)),
    };

    // `split_off` keeps the order of the region, which is how the flags get carried over
    let extra_inputs: HashMap<NodeId, LocalId> = end_nodes
        .iter()
        .zip(end_graph.ids())
        .filter_map(|(old_id, new_id)| Some((*new_id, *end_flags.get(old_id)?)))
        .collect();

    let entry_stack = graph[entry].input_stack.clone();
    ctx.enter_loop(label);
    let main = solve(std::mem::take(graph), ctx);
    ctx.leave_loop(label);
    let main = main?;
    let end_body = solve_linear_tree(&end_graph, &extra_inputs, TreeEntry::FlagsOnly, ctx)?;
    let end_body = match end_body {
        Some(body) => body,
        None => return Err(ctx.violation(&end_graph, "end nodes have a cycle".to_string())),
    };

    let mut once = ctx.load_stack(&entry_stack);
    once.extend(main.body);
    once.push(Instruction::Unreachable);

    let mut body = ctx.store_stack(&entry_stack);
    let mut flags: Vec<LocalId> = end_flags.values().copied().collect();
    flags.sort_by_key(|flag| flag.index());
    for flag in flags {
        body.push(Instruction::I32Const(0));
        body.push(Instruction::LocalSet(flag));
    }
    body.extend(one_shot_loop(label, first_run, once, end_body));
    body.push(Instruction::Unreachable);
    Ok(Some(Node::new(body, entry_stack, vec![])))
}

/// Nodes from which no cycle can be reached, in graph order
fn find_end_nodes(graph: &Graph) -> Vec<NodeId> {
    // `None` while a node is being looked at, so running into it again means there is a cycle
    let mut is_end: HashMap<NodeId, Option<bool>> = HashMap::new();
    for root in graph.ids().iter().copied() {
        if is_end.contains_key(&root) {
            continue;
        }
        is_end.insert(root, None);
        let mut stack: Vec<(NodeId, Vec<NodeId>)> =
            vec![(root, graph[root].outputs().collect())];
        while let Some((node_id, pending)) = stack.last_mut() {
            let node_id = *node_id;
            match pending.pop() {
                Some(output) => {
                    if !is_end.contains_key(&output) {
                        is_end.insert(output, None);
                        stack.push((output, graph[output].outputs().collect()));
                    }
                }
                None => {
                    stack.pop();
                    let answer = graph[node_id]
                        .outputs()
                        .all(|output| is_end.get(&output) == Some(&Some(true)));
                    is_end.insert(node_id, Some(answer));
                }
            }
        }
    }
    graph
        .ids()
        .iter()
        .copied()
        .filter(|node_id| is_end.get(node_id) == Some(&Some(true)))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::NodeKind;
    use crate::structure::{NoDiagnostics, Settings, StructureFlags};
    use crate::wasm::{Locals, MethodSignature};

    fn node(value: i32, condition: bool) -> Node {
        let mut body = vec![Instruction::I32Const(value), Instruction::Drop];
        if condition {
            body.push(Instruction::I32Const(1));
        }
        Node::new(body, vec![], vec![])
    }

    fn return_node(value: i32) -> Node {
        let mut body = node(value, false).body;
        body.push(Instruction::Return);
        Node::new(body, vec![], vec![])
    }

    /// Loop `1 <-> 2` with exits to `3` from both nodes, and `3 -> 4 | 5`
    fn loop_with_shared_exit() -> Graph {
        let mut graph = Graph::new();
        let n0 = graph.add_node(node(0, false));
        let n1 = graph.add_node(node(1, true));
        let n2 = graph.add_node(node(2, true));
        let n3 = graph.add_node(node(3, true));
        let n4 = graph.add_node(return_node(4));
        let n5 = graph.add_node(return_node(5));
        graph.set_kind(n0, NodeKind::Sequence { next: n1 });
        graph.set_kind(
            n1,
            NodeKind::Branch {
                if_true: n2,
                if_false: n3,
            },
        );
        graph.set_kind(
            n2,
            NodeKind::Branch {
                if_true: n1,
                if_false: n3,
            },
        );
        graph.set_kind(
            n3,
            NodeKind::Branch {
                if_true: n4,
                if_false: n5,
            },
        );
        graph
    }

    #[test]
    fn end_nodes_of_loop() {
        let graph = loop_with_shared_exit();
        let indices: Vec<usize> = find_end_nodes(&graph)
            .into_iter()
            .map(|node_id| graph[node_id].index)
            .collect();
        assert_eq!(indices, vec![3, 4, 5]);
    }

    #[test]
    fn self_loop_is_not_an_end_node() {
        let mut graph = Graph::new();
        let n0 = graph.add_node(node(0, true));
        let n1 = graph.add_node(return_node(1));
        graph.set_kind(
            n0,
            NodeKind::Branch {
                if_true: n0,
                if_false: n1,
            },
        );
        assert_eq!(find_end_nodes(&graph), vec![n1]);
    }

    #[test]
    fn extracted_code_verifies() {
        let mut settings = Settings::new();
        settings.flags |= StructureFlags::VALIDATE_STEPS;
        let diagnostics = NoDiagnostics;
        let signature = MethodSignature::new("Test", "run", "()V", vec![]);
        let mut ctx = MethodContext::new(signature, Locals::new(), &settings, &diagnostics);

        let mut graph = loop_with_shared_exit();
        let node = extract_end_nodes(&mut graph, &mut ctx)
            .unwrap()
            .expect("end nodes should be extracted");
        assert!(graph.is_empty());
        assert_eq!(
            ctx.verifier().verify_node(&node).map_err(|err| err.to_string()),
            Ok(())
        );
    }
}
