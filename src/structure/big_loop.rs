use super::{Error, MethodContext};
use crate::graph::Graph;

/// Pull out a large cyclic region starting at some node, leaving an acyclic rest behind
///
/// Not supported yet: this never applies, and the region split and dispatch loop pick up the
/// graphs it would have handled.
pub fn extract_big_loop(graph: &mut Graph, _ctx: &mut MethodContext<'_>) -> Result<bool, Error> {
    log::trace!("big loop extraction skipped for {} nodes", graph.len());
    Ok(false)
}
