use crate::wasm::{LoopLabel, ValueType};

/// Information about a block structure enclosing the instruction being verified
///
/// Labels are kept in their own stack, separate from the operand stack. Only loops can be the
/// target of branches, so the other frames are there to track what each block must leave on the
/// stack.
#[derive(Debug)]
pub enum ControlFrame {
    /// Whole body of a node
    Body {
        /// What the body must leave on the stack if it falls through
        return_values: Vec<ValueType>,
    },
    If {
        /// What to return from the block
        return_values: Vec<ValueType>,
    },
    Loop {
        /// Label for the top of the loop
        start_loop: LoopLabel,

        /// What arguments come to this block
        input_values: Vec<ValueType>,

        /// What to return from the block
        return_values: Vec<ValueType>,
    },
    Case,
}

impl ControlFrame {
    /// Get the label that should be jumped to by branching instructions targeting this block
    pub fn branch_label(&self) -> Option<LoopLabel> {
        match self {
            ControlFrame::Loop { start_loop, .. } => Some(*start_loop),
            _ => None,
        }
    }

    /// How many values should be on the stack before branching to this frame?
    ///
    /// Note: this is subtly different than `return_values` for loops, since in those the branch
    /// jumps to the beginning of the loop, not the end!
    pub fn branch_values(&self) -> &[ValueType] {
        match self {
            ControlFrame::Loop { input_values, .. } => input_values,
            _ => &[],
        }
    }

    /// How many return values should be on the stack when naturally ending this frame?
    pub fn return_values(&self) -> &[ValueType] {
        match self {
            ControlFrame::Body { return_values } => return_values,
            ControlFrame::If { return_values } => return_values,
            ControlFrame::Loop { return_values, .. } => return_values,
            ControlFrame::Case => &[],
        }
    }
}

/// Find the frame a branch to `label` refers to
pub fn find_branch_target(frames: &[ControlFrame], label: LoopLabel) -> Option<&ControlFrame> {
    frames
        .iter()
        .rev()
        .find(|frame| frame.branch_label() == Some(label))
}
