use super::{Diagnostics, Error, Settings};
use crate::graph::{Graph, Node};
use crate::verifier::StackVerifier;
use crate::wasm::{
    render_lines, stacks_match, Instruction, LocalId, Locals, LoopLabel, LoopLabels,
    MethodSignature, ValueType,
};
use std::fmt;

/// Everything about the method being structured, other than its graph
///
/// Nested regions of the graph get solved separately, but they all share one context, so that
/// labels and locals stay unique across the whole method.
pub struct MethodContext<'a> {
    pub signature: MethodSignature,

    /// Locals of the method, extended with the ones structuring introduces
    pub locals: Locals,

    labels: LoopLabels,

    pub settings: &'a Settings,

    pub diagnostics: &'a dyn Diagnostics,
}

impl<'a> MethodContext<'a> {
    pub fn new(
        signature: MethodSignature,
        locals: Locals,
        settings: &'a Settings,
        diagnostics: &'a dyn Diagnostics,
    ) -> MethodContext<'a> {
        MethodContext {
            signature,
            locals,
            labels: LoopLabels::default(),
            settings,
            diagnostics,
        }
    }

    pub fn fresh_label(&mut self) -> LoopLabel {
        self.labels.fresh()
    }

    /// Start generating code that will end up inside the loop `label`
    pub fn enter_loop(&mut self, label: LoopLabel) {
        self.labels.open(label);
    }

    pub fn leave_loop(&mut self, label: LoopLabel) {
        self.labels.close(label);
    }

    /// Register a fresh `i32` local (used for flags and selectors)
    pub fn fresh_flag(&mut self, name: &str) -> LocalId {
        self.locals.add(name, ValueType::I32)
    }

    /// Verifier for code generated at this point, which may branch to any loop being built
    pub fn verifier(&self) -> StackVerifier<'_> {
        StackVerifier::new(
            &self.locals,
            &self.signature.results,
            self.settings.strict_references(),
        )
        .with_outer_loops(self.labels.open_loops())
    }

    /// Comment to put into generated code (only produced if comments are enabled)
    pub fn comment(&self, text: impl FnOnce() -> String) -> Option<Instruction> {
        if self.settings.comments() {
            Some(Instruction::Comment(text()))
        } else {
            None
        }
    }

    /// Instructions moving values off the operand stack into their stack slot locals
    pub fn store_stack(&mut self, stack: &[ValueType]) -> Vec<Instruction> {
        let mut code = vec![];
        if !stack.is_empty() {
            code.extend(self.comment(|| format!("store stack {:?}", stack)));
        }
        for (depth, value_type) in stack.iter().enumerate().rev() {
            code.push(Instruction::LocalSet(self.locals.stack_slot(depth, *value_type)));
        }
        code
    }

    /// Instructions pushing values from stack slot locals back onto the operand stack
    pub fn load_stack(&mut self, stack: &[ValueType]) -> Vec<Instruction> {
        let mut code = vec![];
        if !stack.is_empty() {
            code.extend(self.comment(|| format!("load stack {:?}", stack)));
        }
        for (depth, value_type) in stack.iter().enumerate() {
            code.push(Instruction::LocalGet(self.locals.stack_slot(depth, *value_type)));
        }
        code
    }

    /// Log a fatal problem along with the code it was found in
    fn log_fatal(&self, problem: &dyn fmt::Display, dump: &[String]) {
        log::error!("{} in {}", problem, self.signature);
        for line in dump {
            log::error!("  {}", line);
        }
    }

    /// Build (and log) an error for a graph that got into an impossible state
    pub fn violation(&self, graph: &Graph, message: String) -> Error {
        let dump = graph.dump(&self.locals);
        self.log_fatal(&message, &dump);
        Error::InvariantViolation { message, dump }
    }

    /// Check the edges and bodies of every node in the graph
    pub fn check_graph(&self, graph: &Graph) -> Result<(), Error> {
        if let Err(message) = graph.check_links() {
            return Err(self.violation(graph, message));
        }
        let strict = self.settings.strict_references();
        for (_, node) in graph.iter() {
            for output in node.outputs() {
                let target = &graph[output];
                if !stacks_match(&node.output_stack, &target.input_stack, strict) {
                    let err = Error::EdgeStackMismatch {
                        from: node.index,
                        to: target.index,
                        output: node.output_stack.clone(),
                        input: target.input_stack.clone(),
                    };
                    self.log_fatal(&err, &graph.dump(&self.locals));
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.verifier().verify_graph(graph) {
            let err = Error::from(err);
            self.log_fatal(&err, &graph.dump(&self.locals));
            return Err(err);
        }
        Ok(())
    }

    /// Check the single node a method got structured into
    pub fn check_solved(&self, node: &Node) -> Result<(), Error> {
        if let Err(err) = self.verifier().verify_node(node) {
            let err = Error::from(err);
            self.log_fatal(&err, &render_lines(&node.body, &self.locals));
            return Err(err);
        }
        Ok(())
    }

    /// Check the graph, but only if every step is supposed to be checked
    pub fn check_step(&self, graph: &Graph, step: &str) -> Result<(), Error> {
        if self.settings.validate_steps() {
            log::trace!("checking graph after {}", step);
            self.check_graph(graph)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::NodeKind;
    use crate::structure::NoDiagnostics;
    use crate::wasm::NumericOp;
    use std::sync::Mutex;

    /// Keeps every error logged by any test in this binary
    struct ErrorLog(Mutex<Vec<String>>);

    impl log::Log for ErrorLog {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::Level::Error
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                if let Ok(mut lines) = self.0.lock() {
                    lines.push(record.args().to_string());
                }
            }
        }

        fn flush(&self) {}
    }

    static ERROR_LOG: ErrorLog = ErrorLog(Mutex::new(Vec::new()));

    fn logged_errors() -> Vec<String> {
        let _ = log::set_logger(&ERROR_LOG);
        log::set_max_level(log::LevelFilter::Error);
        ERROR_LOG.0.lock().unwrap().clone()
    }

    fn assert_logged_with_dump(graph: &Graph, locals: &Locals, method: &str, problem: &str) {
        let lines = logged_errors();
        assert!(
            lines
                .iter()
                .any(|line| line.contains(problem) && line.ends_with(method)),
            "no error for {} in {:#?}",
            method,
            lines
        );
        for dump_line in graph.dump(locals) {
            assert!(lines.contains(&format!("  {}", dump_line)));
        }
    }

    fn two_nodes(first_output: ValueType, second: Vec<Instruction>) -> Graph {
        let mut graph = Graph::new();
        let first = graph.add_node(Node::new(
            vec![Instruction::I64Const(1)],
            vec![],
            vec![first_output],
        ));
        let second = graph.add_node(Node::new(second, vec![ValueType::I64], vec![]));
        graph.set_kind(first, NodeKind::Sequence { next: second });
        graph
    }

    #[test]
    fn fatal_checks_log_the_graph() {
        logged_errors();
        let settings = Settings::new();
        let diagnostics = NoDiagnostics;

        // The first node claims to hand on an `i32`, the second one expects an `i64`
        let signature = MethodSignature::new("test/Logged", "edges", "()V", vec![]);
        let ctx = MethodContext::new(signature, Locals::new(), &settings, &diagnostics);
        let graph = two_nodes(ValueType::I32, vec![Instruction::Drop, Instruction::Return]);
        let err = ctx.check_graph(&graph).unwrap_err();
        assert!(matches!(err, Error::EdgeStackMismatch { .. }));
        assert_logged_with_dump(&graph, &ctx.locals, "test/Logged.edges()V", "hands on");

        // Stacks line up, but the second body treats its `i64` as an `i32`
        let signature = MethodSignature::new("test/Logged", "bodies", "()V", vec![]);
        let ctx = MethodContext::new(signature, Locals::new(), &settings, &diagnostics);
        let body = vec![Instruction::Numeric(NumericOp::I32Eqz), Instruction::Return];
        let graph = two_nodes(ValueType::I64, body);
        let err = ctx.check_graph(&graph).unwrap_err();
        assert!(matches!(err, Error::Verifier(_)));
        assert_logged_with_dump(&graph, &ctx.locals, "test/Logged.bodies()V", "verification");
    }

    #[test]
    fn open_loops_can_be_branched_to() {
        let settings = Settings::new();
        let diagnostics = NoDiagnostics;
        let signature = MethodSignature::new("Test", "run", "()V", vec![]);
        let mut ctx = MethodContext::new(signature, Locals::new(), &settings, &diagnostics);

        let label = ctx.fresh_label();
        let node = Node::new(vec![Instruction::Br(label)], vec![], vec![]);
        assert!(ctx.check_solved(&node).is_err());

        ctx.enter_loop(label);
        assert!(ctx.check_solved(&node).is_ok());
        ctx.leave_loop(label);
        assert!(ctx.check_solved(&node).is_err());
    }
}
