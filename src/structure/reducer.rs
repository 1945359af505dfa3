//! Peephole reductions of the graph
//!
//! Each rule looks for one small shape in the graph (a chain of nodes, a diamond, a loop of one or
//! two nodes) and replaces it with fewer nodes whose bodies use structured control flow. Every
//! rule strictly shrinks the graph (in nodes, branches, or non-return nodes), so repeatedly
//! applying them always terminates.

use super::{Error, MethodContext};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::wasm::{
    bodies_equal, has_no_code, last_real_index, negate_condition, real_instructions, Instruction,
};

/// A rule rewrites one instance of its shape, returning whether it found one
type Rule = fn(&mut Graph, &mut MethodContext<'_>) -> Result<bool, Error>;

/// Rules, in the order they are tried
const RULES: &[(&str, Rule)] = &[
    ("fold constant branches", fold_constant_branches),
    ("remove trivial branches", remove_trivial_branches),
    ("remove unreachable nodes", remove_unreachable_nodes),
    ("bypass empty nodes", bypass_empty_nodes),
    ("merge duplicate nodes", merge_duplicate_nodes),
    ("inline small returns", inline_small_returns),
    ("merge sequences", merge_sequences),
    ("join terminating branches", join_terminating_branches),
    ("join one terminating branch", join_one_terminating_branch),
    ("make endless loops", make_endless_loops),
    ("make while loops", make_while_loops),
    ("join optional branches", join_optional_branches),
    ("join converging branches", join_converging_branches),
    ("merge two node cycles", merge_two_node_cycles),
    ("make small circle loops", make_small_circle_loops),
    ("make two exit circle loops", make_two_exit_circle_loops),
];

/// Is the graph down to a single node which returns?
pub fn is_solved(graph: &Graph) -> bool {
    graph.len() == 1 && graph.get(graph.entry()).map_or(false, |node| node.is_return())
}

/// Apply rules until the graph is solved or no rule applies anymore
///
/// Returns whether the graph got solved.
pub fn reduce(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    loop {
        if is_solved(graph) {
            return Ok(true);
        }
        let mut changed = false;
        for (name, rule) in RULES {
            while rule(graph, ctx)? {
                log::trace!("{}: {} nodes left", name, graph.len());
                if log::log_enabled!(log::Level::Trace) {
                    for line in graph.dump(&ctx.locals) {
                        log::trace!("  {}", line);
                    }
                }
                ctx.check_step(graph, name)?;
                changed = true;
                if is_solved(graph) {
                    return Ok(true);
                }
            }
        }
        if !changed {
            return Ok(false);
        }
    }
}

/// Both ways of looking at the arms of a branch: `(arm, other arm, arm is the true one)`
fn arms(kind: NodeKind) -> Option<[(NodeId, NodeId, bool); 2]> {
    match kind {
        NodeKind::Branch { if_true, if_false } => {
            Some([(if_true, if_false, true), (if_false, if_true, false)])
        }
        _ => None,
    }
}

/// Can the body of `target` get inlined into `pred`?
///
/// Without duplication, `pred` must be the only way into `target`.
fn can_absorb(graph: &Graph, ctx: &MethodContext<'_>, target: NodeId, pred: NodeId) -> bool {
    if target == pred || target == graph.entry() {
        return false;
    }
    let inputs = &graph[target].inputs;
    (inputs.len() == 1 && inputs.contains(&pred)) || ctx.settings.allow_duplication()
}

/// Is `pred` the one and only predecessor of `target`?
fn only_input(graph: &Graph, target: NodeId, pred: NodeId) -> bool {
    let inputs = &graph[target].inputs;
    target != graph.entry() && inputs.len() == 1 && inputs.contains(&pred)
}

/// Remove a node if nothing leads to it anymore
fn remove_if_orphaned(graph: &mut Graph, node_id: NodeId) {
    let orphaned = graph
        .get(node_id)
        .map_or(false, |node| node.inputs.is_empty());
    if orphaned && node_id != graph.entry() {
        graph.remove_node(node_id);
    }
}

/// Get the body of a node which is being inlined somewhere
///
/// The body is moved out if nothing else could still need it.
fn take_body(graph: &mut Graph, node_id: NodeId, pred: NodeId) -> Vec<Instruction> {
    if only_input(graph, node_id, pred) {
        std::mem::take(&mut graph[node_id].body)
    } else {
        graph[node_id].body.clone()
    }
}

fn first_node(graph: &Graph, predicate: impl Fn(NodeId) -> bool) -> Option<NodeId> {
    graph.ids().iter().copied().find(|node_id| predicate(*node_id))
}

/// Branch on a constant always goes the same way
fn fold_constant_branches(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.iter().find_map(|(node_id, node)| {
        let (if_true, if_false) = match node.kind {
            NodeKind::Branch { if_true, if_false } => (if_true, if_false),
            _ => return None,
        };
        let idx = last_real_index(&node.body)?;
        match &node.body[idx] {
            Instruction::I32Const(value) => {
                Some((node_id, idx, if *value != 0 { if_true } else { if_false }))
            }
            _ => None,
        }
    });
    let (node_id, idx, next) = match found {
        Some(found) => found,
        None => return Ok(false),
    };
    graph[node_id].body.remove(idx);
    graph.set_kind(node_id, NodeKind::Sequence { next });
    Ok(true)
}

/// Branch with both arms going to the same place just drops the condition
fn remove_trivial_branches(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let node_id = match first_node(graph, |node_id| {
        matches!(graph[node_id].kind, NodeKind::Branch { if_true, if_false } if if_true == if_false)
    }) {
        Some(node_id) => node_id,
        None => return Ok(false),
    };
    let next = match graph[node_id].kind {
        NodeKind::Branch { if_true, .. } => if_true,
        _ => return Ok(false),
    };
    let comment = ctx.comment(|| "both branches go to the same node".to_string());
    let body = &mut graph[node_id].body;
    body.extend(comment);
    body.push(Instruction::Drop);
    graph.set_kind(node_id, NodeKind::Sequence { next });
    Ok(true)
}

fn remove_unreachable_nodes(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let removed = graph.remove_unreachable();
    if !removed.is_empty() {
        log::trace!("removed unreachable nodes {:?}", removed);
    }
    Ok(!removed.is_empty())
}

/// Node with no code just forwards to its successor
fn bypass_empty_nodes(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.iter().find_map(|(node_id, node)| match node.kind {
        NodeKind::Sequence { next } if next != node_id && has_no_code(&node.body) => {
            Some((node_id, next))
        }
        _ => None,
    });
    let (node_id, next) = match found {
        Some(found) => found,
        None => return Ok(false),
    };
    graph.redirect_inputs(node_id, next);
    if graph.entry() == node_id {
        graph.set_entry(next);
    }
    graph.remove_node(node_id);
    Ok(true)
}

/// Two nodes with the same code, stacks, and successors can be one node
fn merge_duplicate_nodes(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let ids = graph.ids().to_vec();
    for (position, keep) in ids.iter().copied().enumerate() {
        for duplicate in ids[position + 1..].iter().copied() {
            if duplicate == graph.entry() {
                continue;
            }
            let (kept, dup) = (&graph[keep], &graph[duplicate]);
            let same = kept.kind == dup.kind
                && !kept.kind.targets(keep)
                && !kept.kind.targets(duplicate)
                && kept.input_stack == dup.input_stack
                && kept.output_stack == dup.output_stack
                && bodies_equal(&kept.body, &dup.body);
            if same {
                graph.redirect_inputs(duplicate, keep);
                graph.remove_node(duplicate);
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Short return nodes get copied into predecessors which just fall into them
fn inline_small_returns(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let limit = ctx.settings.small_return_limit;
    let found = first_node(graph, |node_id| {
        let node = &graph[node_id];
        node.is_return()
            && node_id != graph.entry()
            && real_instructions(&node.body).count() < limit
            && !node.body.iter().any(Instruction::is_structured)
            && node.inputs.iter().any(|input| graph[*input].is_sequence())
    });
    let return_id = match found {
        Some(return_id) => return_id,
        None => return Ok(false),
    };

    let preds: Vec<NodeId> = graph[return_id]
        .inputs
        .iter()
        .copied()
        .filter(|input| graph[*input].is_sequence())
        .collect();
    let body = graph[return_id].body.clone();
    for pred in preds {
        graph[pred].body.extend(body.iter().cloned());
        graph.set_kind(pred, NodeKind::Return);
    }
    remove_if_orphaned(graph, return_id);
    Ok(true)
}

/// Node whose only predecessor falls straight into it absorbs that predecessor
fn merge_sequences(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.iter().find_map(|(node_id, node)| {
        if node_id == graph.entry() || node.inputs.len() != 1 {
            return None;
        }
        let prev = *node.inputs.iter().next()?;
        (prev != node_id && graph[prev].is_sequence()).then(|| (prev, node_id))
    });
    let (prev, curr) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    graph.redirect_inputs(prev, curr);
    let prev_node = graph.remove_node(prev);
    let curr_node = &mut graph[curr];
    let mut body = prev_node.body;
    body.append(&mut curr_node.body);
    curr_node.body = body;
    curr_node.input_stack = prev_node.input_stack;
    if graph.entry() == prev {
        graph.set_entry(curr);
    }
    Ok(true)
}

/// Branch whose arms both return becomes an `if`/`else` that returns
fn join_terminating_branches(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let found = first_node(graph, |node_id| match graph[node_id].kind {
        NodeKind::Branch { if_true, if_false } => {
            if_true != if_false
                && graph[if_true].is_return()
                && graph[if_false].is_return()
                && can_absorb(graph, ctx, if_true, node_id)
                && can_absorb(graph, ctx, if_false, node_id)
        }
        _ => false,
    });
    let (node_id, if_true, if_false) = match found.map(|node_id| (node_id, graph[node_id].kind)) {
        Some((node_id, NodeKind::Branch { if_true, if_false })) => (node_id, if_true, if_false),
        _ => return Ok(false),
    };

    let then_body = take_body(graph, if_true, node_id);
    let else_body = take_body(graph, if_false, node_id);
    let node = &mut graph[node_id];
    node.body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: vec![],
        then_body,
        else_body,
    });
    node.body.push(Instruction::Unreachable);
    graph.set_kind(node_id, NodeKind::Return);
    remove_if_orphaned(graph, if_true);
    remove_if_orphaned(graph, if_false);
    Ok(true)
}

/// Branch with one returning arm becomes an `if` followed by the other arm
fn join_one_terminating_branch(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        arms(graph[*node_id].kind)?
            .into_iter()
            .find(|(arm, other, _)| {
                arm != other
                    && other != node_id
                    && graph[*arm].is_return()
                    && can_absorb(graph, ctx, *arm, *node_id)
            })
            .map(|found| (*node_id, found))
    });
    let (node_id, (terminal, other, terminal_is_true)) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let then_body = take_body(graph, terminal, node_id);
    let node = &mut graph[node_id];
    if !terminal_is_true {
        negate_condition(&mut node.body);
    }
    node.body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: node.output_stack.clone(),
        then_body,
        else_body: vec![],
    });
    graph.set_kind(node_id, NodeKind::Sequence { next: other });
    remove_if_orphaned(graph, terminal);
    Ok(true)
}

/// Node that always loops back to itself
fn make_endless_loops(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let node_id = match first_node(graph, |node_id| {
        graph[node_id].kind == NodeKind::Sequence { next: node_id }
    }) {
        Some(node_id) => node_id,
        None => return Ok(false),
    };

    let label = ctx.fresh_label();
    let node = &mut graph[node_id];
    let mut body = std::mem::take(&mut node.body);
    body.push(Instruction::Br(label));
    node.body = vec![
        Instruction::Loop {
            label,
            params: node.input_stack.clone(),
            results: vec![],
            body,
        },
        Instruction::Unreachable,
    ];
    graph.set_kind(node_id, NodeKind::Return);
    Ok(true)
}

/// Branch with one arm back to itself becomes a loop ending in `br_if`
fn make_while_loops(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        arms(graph[*node_id].kind)?
            .into_iter()
            .find(|(arm, other, _)| arm == node_id && other != node_id)
            .map(|found| (*node_id, found))
    });
    let (node_id, (_, exit, loop_is_true)) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let label = ctx.fresh_label();
    let node = &mut graph[node_id];
    let mut body = std::mem::take(&mut node.body);
    if !loop_is_true {
        negate_condition(&mut body);
    }
    body.push(Instruction::BrIf(label));
    node.body = vec![Instruction::Loop {
        label,
        params: node.input_stack.clone(),
        results: node.output_stack.clone(),
        body,
    }];
    graph.set_kind(node_id, NodeKind::Sequence { next: exit });
    Ok(true)
}

/// Branch where one arm just leads into the other arm becomes an `if` without `else`
fn join_optional_branches(graph: &mut Graph, ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        arms(graph[*node_id].kind)?
            .into_iter()
            .find(|(arm, other, _)| {
                arm != other
                    && arm != node_id
                    && other != node_id
                    && graph[*arm].kind == NodeKind::Sequence { next: *other }
                    && can_absorb(graph, ctx, *arm, *node_id)
            })
            .map(|found| (*node_id, found))
    });
    let (node_id, (optional, join, optional_is_true)) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let then_body = take_body(graph, optional, node_id);
    let node = &mut graph[node_id];
    if !optional_is_true {
        negate_condition(&mut node.body);
    }
    node.body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: node.output_stack.clone(),
        then_body,
        else_body: vec![],
    });
    graph.set_kind(node_id, NodeKind::Sequence { next: join });
    remove_if_orphaned(graph, optional);
    Ok(true)
}

/// Branch whose arms both lead into the same node becomes an `if`/`else`
fn join_converging_branches(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        let (if_true, if_false) = match graph[*node_id].kind {
            NodeKind::Branch { if_true, if_false } => (if_true, if_false),
            _ => return None,
        };
        let join = match (graph[if_true].kind, graph[if_false].kind) {
            (NodeKind::Sequence { next: join1 }, NodeKind::Sequence { next: join2 })
                if join1 == join2 =>
            {
                join1
            }
            _ => return None,
        };
        let applies = if_true != if_false
            && join != if_true
            && join != if_false
            && can_absorb(graph, ctx, if_true, *node_id)
            && can_absorb(graph, ctx, if_false, *node_id);
        applies.then(|| (*node_id, if_true, if_false, join))
    });
    let (node_id, if_true, if_false, join) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let results = graph[if_true].output_stack.clone();
    let then_body = take_body(graph, if_true, node_id);
    let else_body = take_body(graph, if_false, node_id);
    let node = &mut graph[node_id];
    node.body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: results.clone(),
        then_body,
        else_body,
    });
    node.output_stack = results;
    graph.set_kind(node_id, NodeKind::Sequence { next: join });
    remove_if_orphaned(graph, if_true);
    remove_if_orphaned(graph, if_false);
    Ok(true)
}

/// Two nodes falling into each other merge into one node looping to itself
fn merge_two_node_cycles(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    let found = graph.iter().find_map(|(first, node)| {
        let second = match node.kind {
            NodeKind::Sequence { next } if next != first => next,
            _ => return None,
        };
        if graph[second].kind != (NodeKind::Sequence { next: first }) {
            return None;
        }
        if only_input(graph, second, first) {
            Some((first, second))
        } else if only_input(graph, first, second) {
            Some((second, first))
        } else {
            None
        }
    });
    let (keep, absorbed) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let absorbed_node = graph.remove_node(absorbed);
    let node = &mut graph[keep];
    node.body.extend(absorbed_node.body);
    node.output_stack = absorbed_node.output_stack;
    graph.set_kind(keep, NodeKind::Sequence { next: keep });
    Ok(true)
}

/// Branch with an arm that only leads back to the branch becomes a loop
///
/// ```text
/// loop $L
///   <branch body>
///   if
///     <arm body>
///     br $L
///   end
/// end
/// ```
fn make_small_circle_loops(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        arms(graph[*node_id].kind)?
            .into_iter()
            .find(|(arm, other, _)| {
                arm != other
                    && arm != node_id
                    && other != node_id
                    && graph[*arm].kind == NodeKind::Sequence { next: *node_id }
                    && only_input(graph, *arm, *node_id)
            })
            .map(|found| (*node_id, found))
    });
    let (node_id, (circle, exit, circle_is_true)) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let label = ctx.fresh_label();
    let mut circle_body = graph.remove_node(circle).body;
    circle_body.push(Instruction::Br(label));
    let node = &mut graph[node_id];
    let mut body = std::mem::take(&mut node.body);
    if !circle_is_true {
        negate_condition(&mut body);
    }
    body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: node.output_stack.clone(),
        then_body: circle_body,
        else_body: vec![],
    });
    node.body = vec![Instruction::Loop {
        label,
        params: node.input_stack.clone(),
        results: node.output_stack.clone(),
        body,
    }];
    graph.set_kind(node_id, NodeKind::Sequence { next: exit });
    Ok(true)
}

/// Like [`make_small_circle_loops`], but the arm branches either back or to the other arm
fn make_two_exit_circle_loops(
    graph: &mut Graph,
    ctx: &mut MethodContext<'_>,
) -> Result<bool, Error> {
    let found = graph.ids().iter().find_map(|node_id| {
        arms(graph[*node_id].kind)?
            .into_iter()
            .find(|(arm, other, _)| {
                let arm_outputs = match graph[*arm].kind {
                    NodeKind::Branch { if_true, if_false } => (if_true, if_false),
                    _ => return false,
                };
                arm != other
                    && arm != node_id
                    && other != node_id
                    && only_input(graph, *arm, *node_id)
                    && (arm_outputs == (*node_id, *other) || arm_outputs == (*other, *node_id))
            })
            .map(|found| (*node_id, found))
    });
    let (node_id, (circle, exit, circle_is_true)) = match found {
        Some(found) => found,
        None => return Ok(false),
    };

    let label = ctx.fresh_label();
    let circle_node = graph.remove_node(circle);
    let mut circle_body = circle_node.body;
    if circle_node.kind != (NodeKind::Branch { if_true: node_id, if_false: exit }) {
        negate_condition(&mut circle_body);
    }
    circle_body.push(Instruction::BrIf(label));

    let node = &mut graph[node_id];
    let mut body = std::mem::take(&mut node.body);
    if !circle_is_true {
        negate_condition(&mut body);
    }
    body.push(Instruction::If {
        params: node.output_stack.clone(),
        results: node.output_stack.clone(),
        then_body: circle_body,
        else_body: vec![],
    });
    node.body = vec![Instruction::Loop {
        label,
        params: node.input_stack.clone(),
        results: node.output_stack.clone(),
        body,
    }];
    graph.set_kind(node_id, NodeKind::Sequence { next: exit });
    Ok(true)
}
