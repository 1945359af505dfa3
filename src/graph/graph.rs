use super::{Node, NodeId, NodeKind};
use crate::wasm::{render_inline, Locals, ValueType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Index, IndexMut};

/// Control flow graph of a method
///
/// Nodes live in an arena and are referred to by [`NodeId`]. Removing a node leaves a hole in
/// the arena, so handles to the remaining nodes are unaffected. The graph keeps the `inputs` of
/// every node in sync with the successors of the other nodes, as long as edges are only changed
/// through the methods here.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,

    /// Live nodes, in their current order
    order: Vec<NodeId>,

    /// Where execution starts
    entry: NodeId,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Add a node to the graph
    ///
    /// The first node added is the entry. Edges from the new node to nodes already in the graph
    /// are registered on the targets. Edges to nodes that don't exist yet are only picked up by
    /// [`Graph::recalculate_inputs`].
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        node.inputs.clear();
        node.index = self.order.len();
        for output in node.outputs() {
            if output == node_id {
                node.inputs.insert(node_id);
            } else if let Some(target) = self.get_mut(output) {
                target.inputs.insert(node_id);
            }
        }
        if self.order.is_empty() {
            self.entry = node_id;
        }
        self.nodes.push(Some(node));
        self.order.push(node_id);
        node_id
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn set_entry(&mut self, entry: NodeId) {
        self.entry = entry;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some()
    }

    /// Live nodes, in order
    pub fn ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id.0).and_then(Option::as_mut)
    }

    /// Iterate over live nodes, in order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.order.iter().map(move |node_id| (*node_id, &self[*node_id]))
    }

    /// Change the successors of a node, keeping `inputs` of both old and new successors in sync
    pub fn set_kind(&mut self, node_id: NodeId, kind: NodeKind) {
        let old_kind = std::mem::replace(&mut self[node_id].kind, kind);
        for output in old_kind.outputs() {
            if !kind.targets(output) {
                if let Some(target) = self.get_mut(output) {
                    target.inputs.remove(&node_id);
                }
            }
        }
        for output in kind.outputs() {
            if let Some(target) = self.get_mut(output) {
                target.inputs.insert(node_id);
            }
        }
    }

    /// Redirect one node's edges to `old_target` so they go to `new_target`
    pub fn redirect_edge(&mut self, from: NodeId, old_target: NodeId, new_target: NodeId) {
        let mut kind = self[from].kind;
        kind.retarget(old_target, new_target);
        self.set_kind(from, kind);
    }

    /// Make every predecessor of `old_target` go to `new_target` instead
    pub fn redirect_inputs(&mut self, old_target: NodeId, new_target: NodeId) {
        let inputs: Vec<NodeId> = self[old_target].inputs.iter().copied().collect();
        for input in inputs {
            if self.contains(input) {
                self.redirect_edge(input, old_target, new_target);
            }
        }
    }

    /// Take a node out of the graph
    ///
    /// The successors of the node forget about it, but any predecessors should have already been
    /// redirected.
    pub fn remove_node(&mut self, node_id: NodeId) -> Node {
        let node = match self.nodes.get_mut(node_id.0).and_then(Option::take) {
            Some(node) => node,
            None => panic!("removing missing node {:?}", node_id),
        };
        self.order.retain(|id| *id != node_id);
        for output in node.outputs() {
            if let Some(target) = self.get_mut(output) {
                target.inputs.remove(&node_id);
            }
        }
        node
    }

    /// Nodes reachable from `start` (inclusive), in breadth first order
    ///
    /// Search stops at `avoid` (which is then not part of the result).
    pub fn reachable_from(&self, start: NodeId, avoid: Option<NodeId>) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut reached = vec![];
        let mut queue = VecDeque::new();
        if Some(start) != avoid {
            seen.insert(start);
            queue.push_back(start);
        }
        while let Some(node_id) = queue.pop_front() {
            reached.push(node_id);
            for output in self[node_id].outputs() {
                if Some(output) != avoid && seen.insert(output) {
                    queue.push_back(output);
                }
            }
        }
        reached
    }

    /// Remove the nodes which can't be reached from the entry
    pub fn remove_unreachable(&mut self) -> Vec<NodeId> {
        let reachable: HashSet<NodeId> = self
            .reachable_from(self.entry, None)
            .into_iter()
            .collect();
        let unreachable: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|node_id| !reachable.contains(node_id))
            .collect();
        for node_id in &unreachable {
            self.remove_node(*node_id);
        }
        unreachable
    }

    /// Rebuild `inputs` of every node from the successors of every other node
    pub fn recalculate_inputs(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.inputs.clear();
        }
        for node_idx in 0..self.order.len() {
            let node_id = self.order[node_idx];
            for output in self[node_id].outputs() {
                if let Some(target) = self.get_mut(output) {
                    target.inputs.insert(node_id);
                }
            }
        }
    }

    /// Make node indices match the current order
    pub fn renumber(&mut self) {
        for position in 0..self.order.len() {
            let node_id = self.order[position];
            self[node_id].index = position;
        }
    }

    /// Reorder nodes breadth-first from the entry (following `if_true` before `if_false`)
    ///
    /// Unreachable nodes keep their relative order at the end.
    pub fn sort_breadth_first(&mut self) {
        let mut order = self.reachable_from(self.entry, None);
        let reached: HashSet<NodeId> = order.iter().copied().collect();
        order.extend(self.order.iter().filter(|id| !reached.contains(id)));
        self.order = order;
        self.renumber();
    }

    /// Move a closed region of nodes out into a graph of its own
    ///
    /// No edges may cross the boundary of the region (in either direction). The nodes get fresh
    /// handles in the new graph, and `entry` becomes the entry there.
    pub fn split_off(&mut self, region: &[NodeId], entry: NodeId) -> Result<Graph, String> {
        let in_region: HashSet<NodeId> = region.iter().copied().collect();
        if !in_region.contains(&entry) {
            return Err(format!("region entry {:?} is not in the region", entry));
        }
        for (node_id, node) in self.iter() {
            for output in node.outputs() {
                if in_region.contains(&node_id) != in_region.contains(&output) {
                    return Err(format!(
                        "edge {:?} -> {:?} crosses the region boundary",
                        node_id, output
                    ));
                }
            }
        }

        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        let mut taken = vec![];
        for (new_idx, node_id) in region.iter().enumerate() {
            mapping.insert(*node_id, NodeId(new_idx));
            taken.push(self.remove_node(*node_id));
        }

        let mut split = Graph::new();
        for mut node in taken {
            node.kind = node.kind.map_outputs(|output| mapping[&output]);
            split.add_node(node);
        }
        split.entry = mapping[&entry];
        split.recalculate_inputs();
        split.renumber();
        Ok(split)
    }

    /// Check that the edges and `inputs` of all nodes agree
    pub fn check_links(&self) -> Result<(), String> {
        if !self.is_empty() && !self.contains(self.entry) {
            return Err(format!("entry {:?} is not in the graph", self.entry));
        }
        for (node_id, node) in self.iter() {
            for output in node.outputs() {
                match self.get(output) {
                    None => {
                        return Err(format!("{:?} targets missing node {:?}", node_id, output))
                    }
                    Some(target) if !target.inputs.contains(&node_id) => {
                        return Err(format!(
                            "{:?} targets {:?}, which doesn't list it as an input",
                            node_id, output
                        ))
                    }
                    _ => (),
                }
            }
            for input in &node.inputs {
                match self.get(*input) {
                    Some(source) if source.kind.targets(node_id) => (),
                    _ => {
                        return Err(format!(
                            "{:?} lists {:?} as an input, but there is no such edge",
                            node_id, input
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Human readable summary of the graph, one line per node
    pub fn dump(&self, locals: &Locals) -> Vec<String> {
        let index_of = |node_id: &NodeId| match self.get(*node_id) {
            Some(node) => node.index.to_string(),
            None => format!("{:?}?", node_id),
        };
        self.iter()
            .map(|(node_id, node)| {
                let inputs: Vec<String> = node.inputs.iter().map(index_of).collect();
                let outputs: Vec<String> = node.outputs().map(|id| index_of(&id)).collect();
                let stack = |types: &[ValueType]| {
                    types
                        .iter()
                        .map(|value_type| value_type.name())
                        .collect::<Vec<_>>()
                        .join(",")
                };
                format!(
                    "{}{} {} [{}] ({}) -> ({}) [{}]: {}",
                    if node_id == self.entry { "*" } else { " " },
                    node.index,
                    node.kind.letter(),
                    inputs.join(","),
                    stack(&node.input_stack),
                    stack(&node.output_stack),
                    outputs.join(","),
                    render_inline(&node.body, locals),
                )
            })
            .collect()
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, node_id: NodeId) -> &Node {
        match self.get(node_id) {
            Some(node) => node,
            None => panic!("missing node {:?}", node_id),
        }
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, node_id: NodeId) -> &mut Node {
        match self.get_mut(node_id) {
            Some(node) => node,
            None => panic!("missing node {:?}", node_id),
        }
    }
}
