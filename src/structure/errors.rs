use crate::verifier::VerifierError;
use crate::wasm::ValueType;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A node body doesn't match its declared stacks
    Verifier(VerifierError),

    /// The stack handed on along an edge doesn't match what the target expects
    EdgeStackMismatch {
        from: usize,
        to: usize,
        output: Vec<ValueType>,
        input: Vec<ValueType>,
    },

    /// The graph got into a state that should be impossible (indicates a bug)
    ///
    /// The dump is the state of the graph when the problem was noticed.
    InvariantViolation { message: String, dump: Vec<String> },

    /// There are no nodes to structure
    EmptyGraph,
}

impl From<VerifierError> for Error {
    fn from(err: VerifierError) -> Error {
        Error::Verifier(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Verifier(err) => write!(f, "verification failed: {}", err),
            Error::EdgeStackMismatch {
                from,
                to,
                output,
                input,
            } => write!(
                f,
                "node {} hands on {:?} but its successor {} expects {:?}",
                from, output, to, input
            ),
            Error::InvariantViolation { message, dump } => {
                write!(f, "invariant violated: {}", message)?;
                for line in dump {
                    write!(f, "\n  {}", line)?;
                }
                Ok(())
            }
            Error::EmptyGraph => f.write_str("graph has no nodes"),
        }
    }
}

impl std::error::Error for Error {}
