//! Control-flow structuring for JVM bytecode being translated into WASM
//!
//! The JVM lets method bodies jump anywhere, but WASM only has nested blocks, loops, and
//! conditionals. The input here is a method that has already been cut into basic blocks (the
//! nodes of a [`graph::Graph`]) and each block already translated into WASM instructions. The
//! output is a single instruction sequence where all of the jumps between blocks have been
//! replaced by structured control flow.
//!
//! The engine works in stages (see [`structure::structure`]):
//!
//!   * a peephole reducer that merges recognisable shapes (sequences, diamonds, loops) until the
//!     graph is a single node
//!   * a solver for acyclic regions, which nests nodes under boolean flags
//!   * extraction strategies that peel off the start or the end of the graph and solve each part
//!     separately
//!   * a region splitter and finally a generic `loop { switch }` dispatcher which always
//!     succeeds

pub mod graph;
pub mod structure;
pub mod verifier;
pub mod wasm;
