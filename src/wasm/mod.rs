mod instructions;
mod label;
mod locals;
mod render;
mod types;

pub use instructions::*;
pub use label::*;
pub use locals::*;
pub use render::*;
pub use types::*;
