//! Checking that WASM bodies use the operand stack consistently
//!
//! Nodes receive and hand on values through the operand stack. Every transformation of the graph
//! can be checked by re-verifying the bodies it produced against the stacks the nodes declare.

mod control_frame;
mod errors;
mod stack;

pub use control_frame::*;
pub use errors::*;
pub use stack::*;
