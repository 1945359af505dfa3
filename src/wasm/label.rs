use std::fmt;

/// Name of a `loop`, which is what `br` and `br_if` jump back to
///
/// Labels are only unique within one method, since they come from that method's [`LoopLabels`].
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LoopLabel(usize);

impl fmt::Debug for LoopLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for LoopLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$L{}", self.0)
    }
}

/// Loop labels of a method
///
/// Besides handing out fresh labels, this tracks the loops whose bodies are still being
/// generated. Code inside those can already jump to them, even though the `loop` instruction
/// itself only gets built once the body is done.
#[derive(Clone, Default, Debug)]
pub struct LoopLabels {
    issued: usize,

    /// Loops being built, innermost last
    open: Vec<LoopLabel>,
}

impl LoopLabels {
    pub fn fresh(&mut self) -> LoopLabel {
        let label = LoopLabel(self.issued);
        self.issued += 1;
        label
    }

    /// Mark a loop as enclosing all the code generated until it gets closed
    pub fn open(&mut self, label: LoopLabel) {
        self.open.push(label);
    }

    /// Stop treating a loop as enclosing (along with any loops opened inside it)
    pub fn close(&mut self, label: LoopLabel) {
        if let Some(pos) = self.open.iter().rposition(|open| *open == label) {
            self.open.truncate(pos);
        }
    }

    /// Loops being built, outermost first
    pub fn open_loops(&self) -> &[LoopLabel] {
        &self.open
    }
}
