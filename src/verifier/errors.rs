use crate::wasm::{LocalId, LoopLabel, ValueType};
use std::fmt;

/// Failure to verify a body
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierError {
    pub location: Location,
    pub kind: VerifierErrorKind,
}

/// Where in a graph verification failed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    /// Index of the node whose body failed to verify
    pub node: Option<usize>,

    /// Position of the offending instruction, as indices into nested bodies
    ///
    /// An empty path means the problem is at the end of the node body.
    pub path: Vec<usize>,

    /// Rendering of the offending instruction
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifierErrorKind {
    /// The stack doesn't have the expected shape
    StackMismatch {
        expected: Vec<ValueType>,
        actual: Vec<ValueType>,
    },

    /// Tried to pop a value from an empty stack
    EmptyStack,

    UnknownLocal(LocalId),

    /// Branch to a loop which isn't enclosing the branch
    UnknownLabel(LoopLabel),

    /// Body of a node which should not fall through does
    FallsThrough,

    /// Values on the stack at a branch don't match the loop parameters
    BranchStackMismatch {
        label: LoopLabel,
        expected: Vec<ValueType>,
        actual: Vec<ValueType>,
    },
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = self.location.node {
            write!(f, "node {}: ", node)?;
        }
        if !self.location.path.is_empty() {
            write!(f, "at {:?} `{}`: ", self.location.path, self.location.instruction)?;
        }
        match &self.kind {
            VerifierErrorKind::StackMismatch { expected, actual } => {
                write!(f, "expected stack {:?} but found {:?}", expected, actual)
            }
            VerifierErrorKind::EmptyStack => f.write_str("pop from an empty stack"),
            VerifierErrorKind::UnknownLocal(local) => write!(f, "unknown local {:?}", local),
            VerifierErrorKind::UnknownLabel(label) => write!(f, "unknown label {:?}", label),
            VerifierErrorKind::FallsThrough => f.write_str("body falls through"),
            VerifierErrorKind::BranchStackMismatch {
                label,
                expected,
                actual,
            } => write!(
                f,
                "branch to {:?} expects {:?} on the stack but found {:?}",
                label, expected, actual
            ),
        }
    }
}

impl std::error::Error for VerifierError {}
