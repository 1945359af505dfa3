mod common;

use common::*;
use jvm2wasm::graph::text::parse_method;
use jvm2wasm::graph::Graph;
use jvm2wasm::structure::{
    self, solve_linear_tree, Diagnostics, MethodContext, NoDiagnostics, StructureFlags, TreeEntry,
};
use jvm2wasm::wasm::{render_lines, Instruction, MethodSignature, ValueType};
use std::cell::RefCell;
use std::collections::HashMap;

const DIAMOND: &str = "
method test/Graphs diamond ()V ->
node a () -> () branch b c
  i32.const 0
  call visit (param i32)
  call cond (result i32)
node b () -> () seq d
  i32.const 1
  call visit (param i32)
node c () -> () seq d
  i32.const 2
  call visit (param i32)
node d () -> () return
  i32.const 3
  call visit (param i32)
  return
";

const SELF_LOOP: &str = "
method test/Graphs spin ()V ->
node head () -> () branch done head
  i32.const 1
  call visit (param i32)
  call cond (result i32)
node done () -> () return
  i32.const 2
  call visit (param i32)
  return
";

/// Two loops entered from both ends, which no rewrite can untangle
const CRISS_CROSS: &str = "
method test/Graphs tangle (I)I -> i32
node entry (i32) -> (i32) branch left right
  i32.const 0
  call visit (param i32)
  call cond (result i32)
node left (i32) -> (i32) branch right out
  i32.const 1
  call visit (param i32)
  i32.const 1
  i32.add
  call cond (result i32)
node right (i32) -> (i32) branch left out
  i32.const 2
  call visit (param i32)
  i32.const 2
  i32.mul
  call cond (result i32)
node out (i32) -> () return
  i32.const 3
  call visit (param i32)
  return
";

/// Stack values carried across a loop and into both arms of a branch
const STACK_LOOP: &str = "
method test/Graphs count (I)I -> i32
local total i32
node start (i32) -> (i32 i32) seq body
  i32.const 0
  call visit (param i32)
  i32.const 7
node body (i32 i32) -> (i32 i32) branch body done
  i32.const 1
  call visit (param i32)
  local.get $total
  i32.const 1
  i32.add
  local.set $total
  call cond (result i32)
node done (i32 i32) -> () return
  i32.const 2
  call visit (param i32)
  i32.add
  local.get $total
  i32.add
  return
";

fn parse(source: &str) -> jvm2wasm::graph::text::ParsedMethod {
    match parse_method(source) {
        Ok(parsed) => parsed,
        Err(err) => panic!("bad test graph: {}", err),
    }
}

#[test]
fn diamond_visits_one_arm() {
    let parsed = parse(DIAMOND);
    let settings = test_settings(StructureFlags::empty());
    let structured = structure_graph(
        &parsed.graph,
        &parsed.locals,
        parsed.signature.clone(),
        &settings,
    );
    assert_equivalent(&parsed.graph, &parsed.locals, &structured, 0, &[], 0..16);

    let mut seen = vec![];
    for seed in 0..16 {
        let run = Machine::new(&structured.locals, seed, 64).run_code(&structured.body, 0, vec![]);
        assert_eq!(run.outcome, Outcome::Returned(vec![]));
        assert!(
            run.visits == [0, 1, 3] || run.visits == [0, 2, 3],
            "unexpected visits {:?}",
            run.visits
        );
        seen.push(run.visits[1]);
    }
    assert!(seen.contains(&1) && seen.contains(&2));
}

#[test]
fn diamond_as_linear_tree() {
    let parsed = parse(DIAMOND);
    let settings = test_settings(StructureFlags::empty());
    let diagnostics = NoDiagnostics;
    let mut ctx = MethodContext::new(
        parsed.signature.clone(),
        parsed.locals.clone(),
        &settings,
        &diagnostics,
    );
    let body = solve_linear_tree(&parsed.graph, &HashMap::new(), TreeEntry::OnStack, &mut ctx)
        .unwrap()
        .expect("diamond is acyclic");

    let structured = Structured {
        body,
        locals: ctx.locals,
    };
    assert_equivalent(&parsed.graph, &parsed.locals, &structured, 0, &[], 0..16);
}

#[test]
fn self_loop_becomes_do_while() {
    let parsed = parse(SELF_LOOP);
    let settings = test_settings(StructureFlags::empty());
    let structured = structure_graph(
        &parsed.graph,
        &parsed.locals,
        parsed.signature.clone(),
        &settings,
    );

    // loop { head; br_if (not cond) } done
    match &structured.body[0] {
        Instruction::Loop { body, label, .. } => {
            assert_eq!(body.last(), Some(&Instruction::BrIf(*label)));
        }
        other => panic!("expected a loop first, got {:?}", other),
    }
    let lines = render_lines(&structured.body, &structured.locals);
    let loop_end = lines.iter().position(|line| line == "end").unwrap();
    let done = lines.iter().position(|line| line == "i32.const 2").unwrap();
    assert!(loop_end < done, "{:#?}", lines);
    assert!(!lines.iter().any(|line| line.contains("br_table")));

    assert_equivalent(&parsed.graph, &parsed.locals, &structured, 0, &[], 0..16);
}

/// Remembers which graphs needed the dispatch loop
#[derive(Default)]
struct Recorder(RefCell<Vec<String>>);

impl Diagnostics for Recorder {
    fn record_fallback(&self, fingerprint: &str, _signature: &MethodSignature, _dump: &[String]) {
        self.0.borrow_mut().push(fingerprint.to_string());
    }
}

#[test]
fn fallback_always_succeeds() {
    let parsed = parse(CRISS_CROSS);
    let settings = test_settings(StructureFlags::empty());
    let recorder = Recorder::default();
    let mut ctx = MethodContext::new(
        parsed.signature.clone(),
        parsed.locals.clone(),
        &settings,
        &recorder,
    );
    let node = structure::structure(parsed.graph.clone(), &mut ctx).unwrap();
    assert!(!recorder.0.borrow().is_empty());

    let lines = render_lines(&node.body, &ctx.locals);
    assert!(lines.iter().any(|line| line.contains("br_table")));

    let structured = Structured {
        body: node.body,
        locals: ctx.locals,
    };
    for input in [0, 5, -3] {
        assert_equivalent(
            &parsed.graph,
            &parsed.locals,
            &structured,
            1,
            &[Value::I32(input)],
            0..16,
        );
    }
}

#[test]
fn fallback_with_duplication() {
    let parsed = parse(CRISS_CROSS);
    let settings = test_settings(StructureFlags::ALLOW_DUPLICATION);
    let structured = structure_graph(
        &parsed.graph,
        &parsed.locals,
        parsed.signature.clone(),
        &settings,
    );
    assert_equivalent(
        &parsed.graph,
        &parsed.locals,
        &structured,
        1,
        &[Value::I32(4)],
        0..16,
    );
}

#[test]
fn stack_values_survive_loops() {
    let parsed = parse(STACK_LOOP);
    for flags in [StructureFlags::empty(), StructureFlags::COMMENTS] {
        let settings = test_settings(flags);
        let structured = structure_graph(
            &parsed.graph,
            &parsed.locals,
            parsed.signature.clone(),
            &settings,
        );
        assert_equivalent(
            &parsed.graph,
            &parsed.locals,
            &structured,
            1,
            &[Value::I32(35)],
            0..16,
        );
    }
}

#[test]
fn strict_references() {
    let source = "
method test/Graphs identity (Ljava/lang/Object;)Ljava/lang/Object; -> ref
node only (ref) -> () return
  return
";
    let parsed = parse(source);
    for flags in [StructureFlags::empty(), StructureFlags::STRICT_REFERENCES] {
        let settings = test_settings(flags);
        structure_graph(
            &parsed.graph,
            &parsed.locals,
            parsed.signature.clone(),
            &settings,
        );
    }

    // An `i32` is only good enough for a reference when references are erased
    let mismatched = "
method test/Graphs forge ()Ljava/lang/Object; -> ref
node only () -> () return
  i32.const 0
  return
";
    let parsed = parse(mismatched);
    let loose = test_settings(StructureFlags::empty());
    structure_graph(
        &parsed.graph,
        &parsed.locals,
        parsed.signature.clone(),
        &loose,
    );

    let strict = test_settings(StructureFlags::STRICT_REFERENCES);
    let diagnostics = NoDiagnostics;
    let mut ctx = MethodContext::new(
        parsed.signature.clone(),
        parsed.locals.clone(),
        &strict,
        &diagnostics,
    );
    assert!(structure::structure(parsed.graph, &mut ctx).is_err());
}

#[test]
fn bad_edge_stacks_are_rejected() {
    let source = "
method test/Graphs broken ()V ->
node first () -> (i64) seq second
  i64.const 1
node second (i32) -> () return
  drop
  return
";
    let parsed = parse(source);
    let settings = test_settings(StructureFlags::empty());
    let diagnostics = NoDiagnostics;
    let mut ctx = MethodContext::new(parsed.signature, parsed.locals, &settings, &diagnostics);
    match structure::structure(parsed.graph, &mut ctx) {
        Err(structure::Error::EdgeStackMismatch { output, input, .. }) => {
            assert_eq!(output, vec![ValueType::I64]);
            assert_eq!(input, vec![ValueType::I32]);
        }
        other => panic!("expected an edge stack mismatch, got {:?}", other),
    }
}

#[test]
fn empty_graph_is_an_error() {
    let settings = test_settings(StructureFlags::empty());
    let diagnostics = NoDiagnostics;
    let mut ctx = MethodContext::new(
        signature(vec![]),
        jvm2wasm::wasm::Locals::new(),
        &settings,
        &diagnostics,
    );
    assert!(matches!(
        structure::structure(Graph::new(), &mut ctx),
        Err(structure::Error::EmptyGraph)
    ));
}
