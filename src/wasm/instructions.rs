use super::{FunctionType, LocalId, LoopLabel, ValueType};

/// Numeric instructions that only touch the operand stack
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NumericOp {
    I32Add,
    I32Sub,
    I32Mul,
    I32And,
    I32Or,
    I32Xor,
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LeS,
    I32GtS,
    I32GeS,
    I64Add,
    I64Sub,
    I64Mul,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LeS,
    I64GtS,
    I64GeS,
    F32Add,
    F32Sub,
    F32Mul,
    F64Add,
    F64Sub,
    F64Mul,
    I32WrapI64,
    I64ExtendI32S,
    F64PromoteF32,
    F32DemoteF64,
}

impl NumericOp {
    pub const ALL: [NumericOp; 33] = [
        NumericOp::I32Add,
        NumericOp::I32Sub,
        NumericOp::I32Mul,
        NumericOp::I32And,
        NumericOp::I32Or,
        NumericOp::I32Xor,
        NumericOp::I32Eqz,
        NumericOp::I32Eq,
        NumericOp::I32Ne,
        NumericOp::I32LtS,
        NumericOp::I32LeS,
        NumericOp::I32GtS,
        NumericOp::I32GeS,
        NumericOp::I64Add,
        NumericOp::I64Sub,
        NumericOp::I64Mul,
        NumericOp::I64Eqz,
        NumericOp::I64Eq,
        NumericOp::I64Ne,
        NumericOp::I64LtS,
        NumericOp::I64LeS,
        NumericOp::I64GtS,
        NumericOp::I64GeS,
        NumericOp::F32Add,
        NumericOp::F32Sub,
        NumericOp::F32Mul,
        NumericOp::F64Add,
        NumericOp::F64Sub,
        NumericOp::F64Mul,
        NumericOp::I32WrapI64,
        NumericOp::I64ExtendI32S,
        NumericOp::F64PromoteF32,
        NumericOp::F32DemoteF64,
    ];

    /// Types popped by the instruction (top of the stack is last)
    pub const fn inputs(self) -> &'static [ValueType] {
        use NumericOp::*;
        match self {
            I32Add | I32Sub | I32Mul | I32And | I32Or | I32Xor | I32Eq | I32Ne | I32LtS
            | I32LeS | I32GtS | I32GeS => &[ValueType::I32, ValueType::I32],
            I32Eqz | I64ExtendI32S => &[ValueType::I32],
            I64Add | I64Sub | I64Mul | I64Eq | I64Ne | I64LtS | I64LeS | I64GtS | I64GeS => {
                &[ValueType::I64, ValueType::I64]
            }
            I64Eqz | I32WrapI64 => &[ValueType::I64],
            F32Add | F32Sub | F32Mul => &[ValueType::F32, ValueType::F32],
            F64Add | F64Sub | F64Mul => &[ValueType::F64, ValueType::F64],
            F64PromoteF32 => &[ValueType::F32],
            F32DemoteF64 => &[ValueType::F64],
        }
    }

    /// Type pushed by the instruction
    pub const fn output(self) -> ValueType {
        use NumericOp::*;
        match self {
            I64Add | I64Sub | I64Mul | I64ExtendI32S => ValueType::I64,
            F32Add | F32Sub | F32Mul | F32DemoteF64 => ValueType::F32,
            F64Add | F64Sub | F64Mul | F64PromoteF32 => ValueType::F64,
            _ => ValueType::I32,
        }
    }

    /// Comparison computing the opposite boolean, if there is one
    pub const fn inverse(self) -> Option<NumericOp> {
        use NumericOp::*;
        Some(match self {
            I32Eq => I32Ne,
            I32Ne => I32Eq,
            I32LtS => I32GeS,
            I32GeS => I32LtS,
            I32LeS => I32GtS,
            I32GtS => I32LeS,
            I64Eq => I64Ne,
            I64Ne => I64Eq,
            I64LtS => I64GeS,
            I64GeS => I64LtS,
            I64LeS => I64GtS,
            I64GtS => I64LeS,
            _ => return None,
        })
    }

    pub const fn mnemonic(self) -> &'static str {
        use NumericOp::*;
        match self {
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            I32And => "i32.and",
            I32Or => "i32.or",
            I32Xor => "i32.xor",
            I32Eqz => "i32.eqz",
            I32Eq => "i32.eq",
            I32Ne => "i32.ne",
            I32LtS => "i32.lt_s",
            I32LeS => "i32.le_s",
            I32GtS => "i32.gt_s",
            I32GeS => "i32.ge_s",
            I64Add => "i64.add",
            I64Sub => "i64.sub",
            I64Mul => "i64.mul",
            I64Eqz => "i64.eqz",
            I64Eq => "i64.eq",
            I64Ne => "i64.ne",
            I64LtS => "i64.lt_s",
            I64LeS => "i64.le_s",
            I64GtS => "i64.gt_s",
            I64GeS => "i64.ge_s",
            F32Add => "f32.add",
            F32Sub => "f32.sub",
            F32Mul => "f32.mul",
            F64Add => "f64.add",
            F64Sub => "f64.sub",
            F64Mul => "f64.mul",
            I32WrapI64 => "i32.wrap_i64",
            I64ExtendI32S => "i64.extend_i32_s",
            F64PromoteF32 => "f64.promote_f32",
            F32DemoteF64 => "f32.demote_f64",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<NumericOp> {
        NumericOp::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic() == mnemonic)
    }
}

/// WASM instructions making up node bodies
///
/// Control flow is always structured: the only branch instructions target enclosing loops. Forward
/// jumps are expressed either by nesting in `if` or by parking state in locals and branching back
/// to a one-shot loop header.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    LocalGet(LocalId),
    LocalSet(LocalId),
    Numeric(NumericOp),
    Drop,

    /// Call to some function that the structuring engine knows nothing about
    Call {
        name: String,
        func_type: FunctionType,
    },

    /// Annotation for humans, has no effect
    Comment(String),

    /// Pops an `i32` condition, then runs one of the arms
    If {
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        then_body: Vec<Instruction>,
        else_body: Vec<Instruction>,
    },

    /// Loop whose header is the target of `br label` in the body
    Loop {
        label: LoopLabel,
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        body: Vec<Instruction>,
    },
    Br(LoopLabel),
    BrIf(LoopLabel),

    /// Runs the case whose index is in the selector local (out of range indices trap)
    ///
    /// Cases take and leave nothing on the stack. A case that falls through continues after the
    /// whole switch.
    Switch {
        selector: LocalId,
        cases: Vec<Vec<Instruction>>,
    },
    Unreachable,
    Return,
}

impl Instruction {
    pub fn is_comment(&self) -> bool {
        matches!(self, Instruction::Comment(_))
    }

    /// Does this instruction contain nested instructions?
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            Instruction::If { .. } | Instruction::Loop { .. } | Instruction::Switch { .. }
        )
    }

    /// Can execution continue onto the next instruction?
    pub fn can_fall_through(&self) -> bool {
        match self {
            Instruction::Br(_) | Instruction::Return | Instruction::Unreachable => false,
            Instruction::If {
                then_body,
                else_body,
                ..
            } => falls_through(then_body) || falls_through(else_body),
            Instruction::Loop { body, .. } => falls_through(body),
            Instruction::Switch { cases, .. } => cases.iter().any(|case| falls_through(case)),
            _ => true,
        }
    }
}

/// Can execution reach the end of a sequence of instructions?
pub fn falls_through(body: &[Instruction]) -> bool {
    body.iter().all(Instruction::can_fall_through)
}

/// Instructions which actually do something
pub fn real_instructions(body: &[Instruction]) -> impl Iterator<Item = &Instruction> {
    body.iter().filter(|insn| !insn.is_comment())
}

/// Is the body made up of only comments?
pub fn has_no_code(body: &[Instruction]) -> bool {
    real_instructions(body).next().is_none()
}

/// Compare two bodies, ignoring comments
pub fn bodies_equal(body1: &[Instruction], body2: &[Instruction]) -> bool {
    real_instructions(body1).eq(real_instructions(body2))
}

/// Position of the last instruction which isn't a comment
pub fn last_real_index(body: &[Instruction]) -> Option<usize> {
    body.iter().rposition(|insn| !insn.is_comment())
}

/// Invert the `i32` condition computed at the end of a body
///
/// Comparisons get flipped in place. Anything else gets an extra `i32.eqz`.
pub fn negate_condition(body: &mut Vec<Instruction>) {
    if let Some(idx) = last_real_index(body) {
        let last_op = match &body[idx] {
            Instruction::Numeric(op) => Some(*op),
            _ => None,
        };
        if let Some(inverse) = last_op.and_then(NumericOp::inverse) {
            body[idx] = Instruction::Numeric(inverse);
            return;
        }
        let double_eqz = last_op == Some(NumericOp::I32Eqz)
            && idx > 0
            && body[idx - 1] == Instruction::Numeric(NumericOp::I32Eqz);
        if double_eqz {
            body.remove(idx);
            return;
        }
    }
    body.push(Instruction::Numeric(NumericOp::I32Eqz));
}
