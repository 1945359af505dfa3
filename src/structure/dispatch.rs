use super::{fingerprint, Error, MethodContext};
use crate::graph::{Graph, Node, NodeId, NodeKind};
use crate::wasm::{Instruction, ValueType};
use std::collections::HashMap;

/// Structure any graph as a loop around a switch on the next node to run
///
/// ```text
/// loop $L
///   switch $lbl
///     case 0: <load inputs> <node 0> <set $lbl to the successor> <store outputs> br $L
///     case 1: ...
///   end
/// end
/// unreachable
/// ```
///
/// This always works, but is the slowest and least readable output, so these graphs get reported
/// to the diagnostics.
pub fn flat_dispatch(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<Node, Error> {
    let fingerprint = fingerprint(graph, ctx.settings.max_fingerprint_len);
    log::debug!(
        "dispatch loop for {} nodes of {} ({})",
        graph.len(),
        ctx.signature,
        fingerprint
    );
    let dump = graph.dump(&ctx.locals);
    ctx.diagnostics.record_fallback(&fingerprint, &ctx.signature, &dump);

    // An entry nothing leads back to can run once before the loop
    let entry = graph.entry();
    let entry_runs_first = graph[entry].is_sequence() && graph[entry].inputs.is_empty();
    let case_nodes: Vec<NodeId> = graph
        .ids()
        .iter()
        .copied()
        .filter(|node_id| !(entry_runs_first && *node_id == entry))
        .collect();
    let case_of: HashMap<NodeId, i32> = case_nodes
        .iter()
        .enumerate()
        .map(|(case, node_id)| (*node_id, case as i32))
        .collect();

    let selector = ctx.fresh_flag("lbl");
    let label = ctx.fresh_label();

    let mut body = vec![];
    let entry_node = &graph[entry];
    if let (true, NodeKind::Sequence { next }) = (entry_runs_first, entry_node.kind) {
        body.extend(ctx.comment(|| format!("execute {}", entry_node.index)));
        body.extend(entry_node.body.iter().cloned());
        body.push(Instruction::I32Const(case_of[&next]));
        body.push(Instruction::LocalSet(selector));
        body.extend(ctx.store_stack(&entry_node.output_stack));
    } else {
        body.extend(ctx.store_stack(&entry_node.input_stack));
        body.push(Instruction::I32Const(case_of[&entry]));
        body.push(Instruction::LocalSet(selector));
    }

    let mut cases = Vec::with_capacity(case_nodes.len());
    for node_id in &case_nodes {
        let node = &graph[*node_id];
        let mut case = ctx.load_stack(&node.input_stack);
        case.extend(ctx.comment(|| format!("execute {}", node.index)));
        case.extend(node.body.iter().cloned());
        match node.kind {
            NodeKind::Return => {
                case.push(Instruction::Unreachable);
                cases.push(case);
                continue;
            }
            NodeKind::Sequence { next } => {
                case.push(Instruction::I32Const(case_of[&next]));
            }
            NodeKind::Branch { if_true, if_false } => {
                case.push(Instruction::If {
                    params: vec![],
                    results: vec![ValueType::I32],
                    then_body: vec![Instruction::I32Const(case_of[&if_true])],
                    else_body: vec![Instruction::I32Const(case_of[&if_false])],
                });
            }
        }
        case.push(Instruction::LocalSet(selector));
        case.extend(ctx.store_stack(&node.output_stack));
        case.push(Instruction::Br(label));
        cases.push(case);
    }

    body.push(Instruction::Loop {
        label,
        params: vec![],
        results: vec![],
        body: vec![Instruction::Switch { selector, cases }],
    });
    body.push(Instruction::Unreachable);
    Ok(Node::new(body, graph[entry].input_stack.clone(), vec![]))
}
