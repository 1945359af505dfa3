//! Reference interpreter for method graphs and for structured code
//!
//! Both interpreters share the same instruction semantics, so running a graph and the code it
//! got structured into with the same inputs must produce the same run. Two calls are special:
//!
//!   * `call visit (param i32)` records that a node was visited
//!   * `call cond (result i32)` produces the next condition from a seeded random oracle
//!
//! Runs are cut off after a fixed number of visits, since random graphs often loop forever.

#![allow(dead_code)]

use jvm2wasm::graph::{Graph, NodeKind};
use jvm2wasm::structure::{self, MethodContext, NoDiagnostics, Settings};
use jvm2wasm::wasm::{
    FunctionType, Instruction, LocalId, Locals, LoopLabel, MethodSignature, NumericOp, ValueType,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn zero(value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 | ValueType::Ref => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            Value::I32(value) => value,
            other => panic!("expected an i32 but got {:?}", other),
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Value::I64(value) => value,
            other => panic!("expected an i64 but got {:?}", other),
        }
    }
}

/// How a run ended
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Returned with these results
    Returned(Vec<Value>),

    /// Hit `unreachable` (or some other trap)
    Trapped(String),

    /// Ran out of visits
    OutOfFuel,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub outcome: Outcome,

    /// Arguments of every `call visit`, in order
    pub visits: Vec<i32>,
}

/// Why execution of a body stopped early
enum Stop {
    Return,
    Trap(String),
    OutOfFuel,
}

/// How execution left a body that didn't stop
enum Flow {
    Next,
    Branch(LoopLabel),
}

/// Upper limit on executed instructions, in case some structured loop never visits anything
const STEP_LIMIT: usize = 1_000_000;

pub struct Machine<'a> {
    locals: &'a Locals,
    values: HashMap<LocalId, Value>,
    oracle: SmallRng,
    visits: Vec<i32>,
    fuel: usize,
    steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(locals: &'a Locals, seed: u64, fuel: usize) -> Machine<'a> {
        Machine {
            locals,
            values: HashMap::new(),
            oracle: SmallRng::seed_from_u64(seed),
            visits: vec![],
            fuel,
            steps: 0,
        }
    }

    /// Run a graph, starting at its entry with the given stack
    pub fn run_graph(mut self, graph: &Graph, results: usize, inputs: Vec<Value>) -> Run {
        let mut stack = inputs;
        let mut node_id = graph.entry();
        let outcome = loop {
            let node = &graph[node_id];
            match self.run_body(&node.body, &mut stack) {
                Ok(Flow::Next) => (),
                Ok(Flow::Branch(label)) => break Outcome::Trapped(format!("stray br {}", label)),
                Err(stop) => break self.stopped(stop, &stack, results),
            }
            match node.kind {
                NodeKind::Return => break Outcome::Returned(top(&stack, results)),
                NodeKind::Sequence { next } => node_id = next,
                NodeKind::Branch { if_true, if_false } => {
                    let condition = pop(&mut stack).as_i32();
                    node_id = if condition != 0 { if_true } else { if_false };
                }
            }
        };
        Run {
            outcome,
            visits: self.visits,
        }
    }

    /// Run structured code with the given stack
    pub fn run_code(mut self, body: &[Instruction], results: usize, inputs: Vec<Value>) -> Run {
        let mut stack = inputs;
        let outcome = match self.run_body(body, &mut stack) {
            Ok(Flow::Next) => Outcome::Returned(top(&stack, results)),
            Ok(Flow::Branch(label)) => Outcome::Trapped(format!("stray br {}", label)),
            Err(stop) => self.stopped(stop, &stack, results),
        };
        Run {
            outcome,
            visits: self.visits,
        }
    }

    fn stopped(&self, stop: Stop, stack: &[Value], results: usize) -> Outcome {
        match stop {
            Stop::Return => Outcome::Returned(top(stack, results)),
            Stop::Trap(message) => Outcome::Trapped(message),
            Stop::OutOfFuel => Outcome::OutOfFuel,
        }
    }

    fn local(&self, local_id: LocalId) -> Value {
        match self.values.get(&local_id) {
            Some(value) => *value,
            None => {
                let local = self.locals.get(local_id).expect("unknown local");
                Value::zero(local.value_type)
            }
        }
    }

    fn run_body(&mut self, body: &[Instruction], stack: &mut Vec<Value>) -> Result<Flow, Stop> {
        for insn in body {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "structured code is stuck");
            match insn {
                Instruction::I32Const(value) => stack.push(Value::I32(*value)),
                Instruction::I64Const(value) => stack.push(Value::I64(*value)),
                Instruction::F32Const(value) => stack.push(Value::F32(*value)),
                Instruction::F64Const(value) => stack.push(Value::F64(*value)),
                Instruction::LocalGet(local_id) => stack.push(self.local(*local_id)),
                Instruction::LocalSet(local_id) => {
                    let value = pop(stack);
                    self.values.insert(*local_id, value);
                }
                Instruction::Numeric(op) => numeric(*op, stack),
                Instruction::Drop => {
                    pop(stack);
                }
                Instruction::Call { name, func_type } => self.call(name, func_type, stack)?,
                Instruction::Comment(_) => (),
                Instruction::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    let condition = pop(stack).as_i32();
                    let arm = if condition != 0 { then_body } else { else_body };
                    if let Flow::Branch(label) = self.run_body(arm, stack)? {
                        return Ok(Flow::Branch(label));
                    }
                }
                Instruction::Loop {
                    label,
                    params,
                    body,
                    ..
                } => {
                    let base = stack.len() - params.len();
                    loop {
                        match self.run_body(body, stack)? {
                            Flow::Next => break,
                            Flow::Branch(target) if target == *label => {
                                let carried = stack.split_off(stack.len() - params.len());
                                stack.truncate(base);
                                stack.extend(carried);
                            }
                            Flow::Branch(target) => return Ok(Flow::Branch(target)),
                        }
                    }
                }
                Instruction::Br(label) => return Ok(Flow::Branch(*label)),
                Instruction::BrIf(label) => {
                    if pop(stack).as_i32() != 0 {
                        return Ok(Flow::Branch(*label));
                    }
                }
                Instruction::Switch { selector, cases } => {
                    let case_idx = self.local(*selector).as_i32();
                    let case = match usize::try_from(case_idx).ok().and_then(|idx| cases.get(idx)) {
                        Some(case) => case,
                        None => return Err(Stop::Trap(format!("no case {}", case_idx))),
                    };
                    if let Flow::Branch(label) = self.run_body(case, stack)? {
                        return Ok(Flow::Branch(label));
                    }
                }
                Instruction::Unreachable => return Err(Stop::Trap("unreachable".to_string())),
                Instruction::Return => return Err(Stop::Return),
            }
        }
        Ok(Flow::Next)
    }

    fn call(
        &mut self,
        name: &str,
        func_type: &FunctionType,
        stack: &mut Vec<Value>,
    ) -> Result<(), Stop> {
        match name {
            "visit" => {
                if self.visits.len() >= self.fuel {
                    return Err(Stop::OutOfFuel);
                }
                let visited = pop(stack).as_i32();
                self.visits.push(visited);
            }
            "cond" => {
                let condition = self.oracle.gen_bool(0.5);
                stack.push(Value::I32(condition as i32));
            }
            _ => {
                for _ in &func_type.inputs {
                    pop(stack);
                }
                for output in &func_type.outputs {
                    stack.push(Value::zero(*output));
                }
            }
        }
        Ok(())
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn top(stack: &[Value], count: usize) -> Vec<Value> {
    stack[stack.len() - count..].to_vec()
}

fn numeric(op: NumericOp, stack: &mut Vec<Value>) {
    use NumericOp::*;
    let result = match op {
        I32Eqz => Value::I32((pop(stack).as_i32() == 0) as i32),
        I64Eqz => Value::I32((pop(stack).as_i64() == 0) as i32),
        I32Add | I32Sub | I32Mul | I32And | I32Or | I32Xor | I32Eq | I32Ne | I32LtS | I32LeS
        | I32GtS | I32GeS => {
            let rhs = pop(stack).as_i32();
            let lhs = pop(stack).as_i32();
            Value::I32(match op {
                I32Add => lhs.wrapping_add(rhs),
                I32Sub => lhs.wrapping_sub(rhs),
                I32Mul => lhs.wrapping_mul(rhs),
                I32And => lhs & rhs,
                I32Or => lhs | rhs,
                I32Xor => lhs ^ rhs,
                I32Eq => (lhs == rhs) as i32,
                I32Ne => (lhs != rhs) as i32,
                I32LtS => (lhs < rhs) as i32,
                I32LeS => (lhs <= rhs) as i32,
                I32GtS => (lhs > rhs) as i32,
                _ => (lhs >= rhs) as i32,
            })
        }
        I64Add | I64Sub | I64Mul => {
            let rhs = pop(stack).as_i64();
            let lhs = pop(stack).as_i64();
            Value::I64(match op {
                I64Add => lhs.wrapping_add(rhs),
                I64Sub => lhs.wrapping_sub(rhs),
                _ => lhs.wrapping_mul(rhs),
            })
        }
        I64Eq | I64Ne | I64LtS | I64LeS | I64GtS | I64GeS => {
            let rhs = pop(stack).as_i64();
            let lhs = pop(stack).as_i64();
            Value::I32(match op {
                I64Eq => (lhs == rhs) as i32,
                I64Ne => (lhs != rhs) as i32,
                I64LtS => (lhs < rhs) as i32,
                I64LeS => (lhs <= rhs) as i32,
                I64GtS => (lhs > rhs) as i32,
                _ => (lhs >= rhs) as i32,
            })
        }
        I32WrapI64 => Value::I32(pop(stack).as_i64() as i32),
        I64ExtendI32S => Value::I64(pop(stack).as_i32() as i64),
        other => panic!("interpreter does not support {:?}", other),
    };
    stack.push(result);
}

/// Instructions recording a visit to node `idx`
pub fn visit(idx: i32) -> Vec<Instruction> {
    vec![
        Instruction::I32Const(idx),
        Instruction::Call {
            name: "visit".to_string(),
            func_type: FunctionType {
                inputs: vec![ValueType::I32],
                outputs: vec![],
            },
        },
    ]
}

/// Instruction pushing a condition from the oracle
pub fn cond() -> Instruction {
    Instruction::Call {
        name: "cond".to_string(),
        func_type: FunctionType {
            inputs: vec![],
            outputs: vec![ValueType::I32],
        },
    }
}

pub fn signature(results: Vec<ValueType>) -> MethodSignature {
    MethodSignature::new("test/Graphs", "run", "()V", results)
}

/// Settings used by the tests: every step gets validated
pub fn test_settings(flags: structure::StructureFlags) -> Settings {
    let mut settings = Settings::new();
    settings.flags = flags | structure::StructureFlags::VALIDATE_STEPS;
    settings
}

/// Result of structuring a graph
pub struct Structured {
    pub body: Vec<Instruction>,
    pub locals: Locals,
}

/// Structure a copy of the graph, panicking on failure
pub fn structure_graph(
    graph: &Graph,
    locals: &Locals,
    signature: MethodSignature,
    settings: &Settings,
) -> Structured {
    let diagnostics = NoDiagnostics;
    let mut ctx = MethodContext::new(signature, locals.clone(), settings, &diagnostics);
    let node = match structure::structure(graph.clone(), &mut ctx) {
        Ok(node) => node,
        Err(err) => panic!("structuring failed: {}", err),
    };
    assert!(node.is_return());
    Structured {
        body: node.body,
        locals: ctx.locals,
    }
}

/// Check that the structured code behaves exactly like the graph for a few oracle seeds
pub fn assert_equivalent(
    graph: &Graph,
    locals: &Locals,
    structured: &Structured,
    results: usize,
    inputs: &[Value],
    seeds: std::ops::Range<u64>,
) {
    for seed in seeds {
        let expected = Machine::new(locals, seed, 64).run_graph(graph, results, inputs.to_vec());
        let actual = Machine::new(&structured.locals, seed, 64).run_code(
            &structured.body,
            results,
            inputs.to_vec(),
        );
        assert_eq!(actual, expected, "runs differ for seed {}", seed);
    }
}
