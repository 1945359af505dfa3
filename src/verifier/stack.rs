use super::{find_branch_target, ControlFrame, Location, VerifierError, VerifierErrorKind};
use crate::graph::{Graph, Node, NodeKind};
use crate::wasm::{
    render_lines, stack_ends_with, stacks_match, Instruction, Locals, LoopLabel, ValueType,
};

/// Whether execution can get past the end of some instructions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reachability {
    FallsThrough,
    Terminates,
}

/// Abstract interpreter for the operand stack
///
/// Only the types of the values on the stack are tracked. Code after an instruction that never
/// falls through (`br`, `return`, `unreachable`) is dead and is not checked.
pub struct StackVerifier<'a> {
    locals: &'a Locals,

    /// Stack expected by `return`
    method_results: &'a [ValueType],

    /// Keep references distinct from `i32`
    strict: bool,

    /// Loops (outermost first) wrapped around all of the code being verified
    outer_loops: &'a [LoopLabel],
}

impl<'a> StackVerifier<'a> {
    pub fn new(locals: &'a Locals, method_results: &'a [ValueType], strict: bool) -> Self {
        StackVerifier {
            locals,
            method_results,
            strict,
            outer_loops: &[],
        }
    }

    /// Accept branches to these loops, which take no parameters
    ///
    /// Code for a region solved on its own can jump to a loop that only gets built around the
    /// region afterwards.
    pub fn with_outer_loops(mut self, outer_loops: &'a [LoopLabel]) -> Self {
        self.outer_loops = outer_loops;
        self
    }

    /// Verify a body which starts with `params` on the stack and must end with `results` (if it
    /// falls through)
    pub fn verify_body(
        &self,
        body: &[Instruction],
        params: &[ValueType],
        results: &[ValueType],
    ) -> Result<Reachability, VerifierError> {
        let mut frames: Vec<ControlFrame> = self
            .outer_loops
            .iter()
            .map(|label| ControlFrame::Loop {
                start_loop: *label,
                input_values: vec![],
                return_values: vec![],
            })
            .collect();
        frames.push(ControlFrame::Body {
            return_values: results.to_vec(),
        });
        let mut path = vec![];
        self.verify_block(body, params.to_vec(), &mut frames, &mut path)
    }

    /// Verify the body of a node against its declared stacks and successors
    pub fn verify_node(&self, node: &Node) -> Result<(), VerifierError> {
        let verified = match node.kind {
            NodeKind::Sequence { .. } => self
                .verify_body(&node.body, &node.input_stack, &node.output_stack)
                .map(|_| ()),
            NodeKind::Branch { .. } => {
                let mut results = node.output_stack.clone();
                results.push(ValueType::I32);
                self.verify_body(&node.body, &node.input_stack, &results)
                    .map(|_| ())
            }
            NodeKind::Return => {
                match self.verify_body(&node.body, &node.input_stack, self.method_results) {
                    Ok(Reachability::Terminates) => Ok(()),
                    Ok(Reachability::FallsThrough) => Err(VerifierError {
                        location: Location::default(),
                        kind: VerifierErrorKind::FallsThrough,
                    }),
                    Err(err) => Err(err),
                }
            }
        };
        verified.map_err(|mut err| {
            err.location.node = Some(node.index);
            err
        })
    }

    /// Verify every node in the graph
    pub fn verify_graph(&self, graph: &Graph) -> Result<(), VerifierError> {
        for (_, node) in graph.iter() {
            self.verify_node(node)?;
        }
        Ok(())
    }

    /// Verify instructions inside of the innermost frame
    fn verify_block(
        &self,
        body: &[Instruction],
        mut stack: Vec<ValueType>,
        frames: &mut Vec<ControlFrame>,
        path: &mut Vec<usize>,
    ) -> Result<Reachability, VerifierError> {
        for (idx, insn) in body.iter().enumerate() {
            path.push(idx);
            let reachability = self.verify_instruction(insn, &mut stack, frames, path)?;
            path.pop();
            if reachability == Reachability::Terminates {
                return Ok(Reachability::Terminates);
            }
        }

        let expected = frames.last().map_or(&[][..], ControlFrame::return_values);
        if !stacks_match(&stack, expected, self.strict) {
            return Err(VerifierError {
                location: Location {
                    node: None,
                    path: path.clone(),
                    instruction: "end".to_string(),
                },
                kind: VerifierErrorKind::StackMismatch {
                    expected: expected.to_vec(),
                    actual: stack,
                },
            });
        }
        Ok(Reachability::FallsThrough)
    }

    fn verify_instruction(
        &self,
        insn: &Instruction,
        stack: &mut Vec<ValueType>,
        frames: &mut Vec<ControlFrame>,
        path: &mut Vec<usize>,
    ) -> Result<Reachability, VerifierError> {
        let fail = |kind: VerifierErrorKind, path: &[usize]| VerifierError {
            location: Location {
                node: None,
                path: path.to_vec(),
                instruction: render_lines(std::slice::from_ref(insn), self.locals)
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
            },
            kind,
        };

        match insn {
            Instruction::I32Const(_) => stack.push(ValueType::I32),
            Instruction::I64Const(_) => stack.push(ValueType::I64),
            Instruction::F32Const(_) => stack.push(ValueType::F32),
            Instruction::F64Const(_) => stack.push(ValueType::F64),
            Instruction::LocalGet(local_id) => match self.locals.get(*local_id) {
                Some(local) => stack.push(local.value_type),
                None => return Err(fail(VerifierErrorKind::UnknownLocal(*local_id), path)),
            },
            Instruction::LocalSet(local_id) => match self.locals.get(*local_id) {
                Some(local) => self
                    .pop_values(stack, &[local.value_type])
                    .map_err(|kind| fail(kind, path))?,
                None => return Err(fail(VerifierErrorKind::UnknownLocal(*local_id), path)),
            },
            Instruction::Numeric(op) => {
                self.pop_values(stack, op.inputs())
                    .map_err(|kind| fail(kind, path))?;
                stack.push(op.output());
            }
            Instruction::Drop => {
                if stack.pop().is_none() {
                    return Err(fail(VerifierErrorKind::EmptyStack, path));
                }
            }
            Instruction::Call { func_type, .. } => {
                self.pop_values(stack, &func_type.inputs)
                    .map_err(|kind| fail(kind, path))?;
                stack.extend_from_slice(&func_type.outputs);
            }
            Instruction::Comment(_) => (),
            Instruction::If {
                params,
                results,
                then_body,
                else_body,
            } => {
                self.pop_values(stack, &[ValueType::I32])
                    .and_then(|_| self.pop_values(stack, params))
                    .map_err(|kind| fail(kind, path))?;

                frames.push(ControlFrame::If {
                    return_values: results.clone(),
                });
                let mut all_terminate = true;
                for (arm_idx, arm) in [then_body, else_body].into_iter().enumerate() {
                    path.push(arm_idx);
                    let reachability = self.verify_block(arm, params.clone(), frames, path)?;
                    path.pop();
                    all_terminate &= reachability == Reachability::Terminates;
                }
                frames.pop();

                if all_terminate {
                    return Ok(Reachability::Terminates);
                }
                stack.extend_from_slice(results);
            }
            Instruction::Loop {
                label,
                params,
                results,
                body,
            } => {
                self.pop_values(stack, params)
                    .map_err(|kind| fail(kind, path))?;

                frames.push(ControlFrame::Loop {
                    start_loop: *label,
                    input_values: params.clone(),
                    return_values: results.clone(),
                });
                path.push(0);
                let reachability = self.verify_block(body, params.clone(), frames, path)?;
                path.pop();
                frames.pop();

                if reachability == Reachability::Terminates {
                    return Ok(Reachability::Terminates);
                }
                stack.extend_from_slice(results);
            }
            Instruction::Br(label) => {
                self.check_branch(stack, frames, *label)
                    .map_err(|kind| fail(kind, path))?;
                return Ok(Reachability::Terminates);
            }
            Instruction::BrIf(label) => {
                self.pop_values(stack, &[ValueType::I32])
                    .and_then(|_| self.check_branch(stack, frames, *label))
                    .map_err(|kind| fail(kind, path))?;
            }
            Instruction::Switch { selector, cases } => {
                match self.locals.get(*selector) {
                    None => return Err(fail(VerifierErrorKind::UnknownLocal(*selector), path)),
                    Some(local) if !local.value_type.matches(ValueType::I32, self.strict) => {
                        return Err(fail(
                            VerifierErrorKind::StackMismatch {
                                expected: vec![ValueType::I32],
                                actual: vec![local.value_type],
                            },
                            path,
                        ))
                    }
                    Some(_) => (),
                }

                let mut all_terminate = true;
                for (case_idx, case) in cases.iter().enumerate() {
                    frames.push(ControlFrame::Case);
                    path.push(case_idx);
                    let reachability = self.verify_block(case, vec![], frames, path)?;
                    path.pop();
                    frames.pop();
                    all_terminate &= reachability == Reachability::Terminates;
                }
                if all_terminate {
                    return Ok(Reachability::Terminates);
                }
            }
            Instruction::Unreachable => return Ok(Reachability::Terminates),
            Instruction::Return => {
                if !stack_ends_with(stack, self.method_results, self.strict) {
                    return Err(fail(
                        VerifierErrorKind::StackMismatch {
                            expected: self.method_results.to_vec(),
                            actual: stack.clone(),
                        },
                        path,
                    ));
                }
                return Ok(Reachability::Terminates);
            }
        }
        Ok(Reachability::FallsThrough)
    }

    /// Pop values off the stack, checking their types
    fn pop_values(
        &self,
        stack: &mut Vec<ValueType>,
        expected: &[ValueType],
    ) -> Result<(), VerifierErrorKind> {
        if stack.is_empty() && !expected.is_empty() {
            return Err(VerifierErrorKind::EmptyStack);
        }
        if !stack_ends_with(stack, expected, self.strict) {
            return Err(VerifierErrorKind::StackMismatch {
                expected: expected.to_vec(),
                actual: stack.clone(),
            });
        }
        stack.truncate(stack.len() - expected.len());
        Ok(())
    }

    /// Check that the stack has what the loop header expects
    fn check_branch(
        &self,
        stack: &[ValueType],
        frames: &[ControlFrame],
        label: LoopLabel,
    ) -> Result<(), VerifierErrorKind> {
        let frame = find_branch_target(frames, label)
            .ok_or(VerifierErrorKind::UnknownLabel(label))?;
        let expected = frame.branch_values();
        if !stack_ends_with(stack, expected, self.strict) {
            return Err(VerifierErrorKind::BranchStackMismatch {
                label,
                expected: expected.to_vec(),
                actual: stack.to_vec(),
            });
        }
        Ok(())
    }
}
