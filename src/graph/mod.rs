mod graph;
mod node;
pub mod text;

pub use graph::*;
pub use node::*;
