use super::{falls_through, Instruction, LocalId, Locals, ValueType};

/// Render instructions in a WAT-like text format, one instruction (or block delimiter) per line
pub fn render_lines(body: &[Instruction], locals: &Locals) -> Vec<String> {
    let mut printer = Printer {
        locals,
        indent: 0,
        lines: vec![],
    };
    printer.print_body(body);
    printer.lines
}

/// Render instructions on a single line (used in graph dumps)
pub fn render_inline(body: &[Instruction], locals: &Locals) -> String {
    render_lines(body, locals)
        .iter()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Render a type signature as `(param ..) (result ..)`
pub fn render_block_type(params: &[ValueType], results: &[ValueType]) -> String {
    let mut rendered = String::new();
    for (keyword, types) in [("param", params), ("result", results)] {
        if types.is_empty() {
            continue;
        }
        rendered.push_str(" (");
        rendered.push_str(keyword);
        for value_type in types {
            rendered.push(' ');
            rendered.push_str(value_type.name());
        }
        rendered.push(')');
    }
    rendered
}

struct Printer<'a> {
    locals: &'a Locals,
    indent: usize,
    lines: Vec<String>,
}

impl<'a> Printer<'a> {
    fn line(&mut self, text: String) {
        self.lines.push(format!("{}{}", "  ".repeat(self.indent), text));
    }

    fn nested(&mut self, body: &[Instruction]) {
        self.indent += 1;
        self.print_body(body);
        self.indent -= 1;
    }

    fn print_body(&mut self, body: &[Instruction]) {
        for insn in body {
            self.print(insn);
        }
    }

    fn print(&mut self, insn: &Instruction) {
        match insn {
            Instruction::I32Const(value) => self.line(format!("i32.const {}", value)),
            Instruction::I64Const(value) => self.line(format!("i64.const {}", value)),
            Instruction::F32Const(value) => self.line(format!("f32.const {:?}", value)),
            Instruction::F64Const(value) => self.line(format!("f64.const {:?}", value)),
            Instruction::LocalGet(local) => {
                self.line(format!("local.get ${}", self.locals.name(*local)))
            }
            Instruction::LocalSet(local) => {
                self.line(format!("local.set ${}", self.locals.name(*local)))
            }
            Instruction::Numeric(op) => self.line(op.mnemonic().to_string()),
            Instruction::Drop => self.line("drop".to_string()),
            Instruction::Call { name, func_type } => self.line(format!(
                "call {}{}",
                name,
                render_block_type(&func_type.inputs, &func_type.outputs)
            )),
            Instruction::Comment(text) => self.line(format!(";; {}", text)),
            Instruction::If {
                params,
                results,
                then_body,
                else_body,
            } => {
                self.line(format!("if{}", render_block_type(params, results)));
                self.nested(then_body);
                if !else_body.is_empty() {
                    self.line("else".to_string());
                    self.nested(else_body);
                }
                self.line("end".to_string());
            }
            Instruction::Loop {
                label,
                params,
                results,
                body,
            } => {
                self.line(format!("loop {}{}", label, render_block_type(params, results)));
                self.nested(body);
                self.line("end".to_string());
            }
            Instruction::Br(label) => self.line(format!("br {}", label)),
            Instruction::BrIf(label) => self.line(format!("br_if {}", label)),
            Instruction::Switch { selector, cases } => self.print_switch(*selector, cases),
            Instruction::Unreachable => self.line("unreachable".to_string()),
            Instruction::Return => self.line("return".to_string()),
        }
    }

    /// Switches become the usual ladder of nested blocks around a `br_table`
    ///
    /// Exiting the block at depth `i` lands at the code for case `i`. The extra block between the
    /// cases and the outermost block catches out of range selectors.
    fn print_switch(&mut self, selector: LocalId, cases: &[Vec<Instruction>]) {
        let case_count = cases.len();
        self.line("block ;; switch".to_string());
        self.indent += 1;
        self.line("block ;; out of range".to_string());
        self.indent += 1;
        for case_idx in (0..case_count).rev() {
            self.line(format!("block ;; case {}", case_idx));
            self.indent += 1;
        }

        self.line(format!("local.get ${}", self.locals.name(selector)));
        let targets: Vec<String> = (0..=case_count).map(|idx| idx.to_string()).collect();
        self.line(format!("br_table {}", targets.join(" ")));

        for (case_idx, case) in cases.iter().enumerate() {
            self.indent -= 1;
            self.line("end".to_string());
            self.print_body(case);
            if falls_through(case) {
                self.line(format!("br {}", case_count - case_idx));
            }
        }

        self.indent -= 1;
        self.line("end".to_string());
        self.line("unreachable".to_string());
        self.indent -= 1;
        self.line("end".to_string());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wasm::{LoopLabels, NumericOp};

    #[test]
    fn render_loop() {
        let mut locals = Locals::new();
        let counter = locals.add("counter", ValueType::I32);
        let label = LoopLabels::default().fresh();
        let body = vec![Instruction::Loop {
            label,
            params: vec![],
            results: vec![ValueType::I32],
            body: vec![
                Instruction::LocalGet(counter),
                Instruction::LocalGet(counter),
                Instruction::BrIf(label),
            ],
        }];
        assert_eq!(
            render_lines(&body, &locals),
            vec![
                "loop $L0 (result i32)",
                "  local.get $counter",
                "  local.get $counter",
                "  br_if $L0",
                "end",
            ]
        );
    }

    #[test]
    fn render_switch() {
        let mut locals = Locals::new();
        let selector = locals.add("lbl", ValueType::I32);
        let body = vec![Instruction::Switch {
            selector,
            cases: vec![
                vec![Instruction::Numeric(NumericOp::I32Add)],
                vec![Instruction::Unreachable],
            ],
        }];
        assert_eq!(
            render_lines(&body, &locals),
            vec![
                "block ;; switch",
                "  block ;; out of range",
                "    block ;; case 1",
                "      block ;; case 0",
                "        local.get $lbl",
                "        br_table 0 1 2",
                "      end",
                "      i32.add",
                "      br 2",
                "    end",
                "    unreachable",
                "  end",
                "  unreachable",
                "end",
            ]
        );
    }
}
