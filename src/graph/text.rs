//! Plain text format for method graphs
//!
//! ```text
//! ;; comments and blank lines are ignored
//! method my/pkg/Klass max (II)I -> i32
//! local x i32
//! node start () -> (i32) branch small big
//!   local.get $x
//!   local.get $x
//!   i32.const 10
//!   i32.lt_s
//! node small (i32) -> () return
//!   return
//! node big (i32) -> (i32) seq small
//!   i32.const 10
//!   i32.add
//! ```
//!
//! The first node is the entry. Instructions are indented under their node and are limited to
//! the flat (unstructured) instructions, since that is what translated basic blocks contain.

use super::{Graph, Node, NodeId, NodeKind};
use crate::wasm::{
    FunctionType, Instruction, LocalId, Locals, MethodSignature, NumericOp, ValueType,
};
use std::collections::HashMap;
use std::fmt;

/// Method parsed from the text format
#[derive(Debug)]
pub struct ParsedMethod {
    pub signature: MethodSignature,
    pub locals: Locals,
    pub graph: Graph,
}

#[derive(Debug)]
pub struct ParseError {
    /// Line number (starting at 1)
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Edges of a node, before all of the node names are known
enum PendingKind {
    Sequence(String),
    Branch(String, String),
    Return,
}

pub fn parse_method(source: &str) -> Result<ParsedMethod, ParseError> {
    let mut signature: Option<MethodSignature> = None;
    let mut locals = Locals::new();
    let mut graph = Graph::new();
    let mut node_names: HashMap<String, NodeId> = HashMap::new();
    let mut pending: Vec<(usize, NodeId, PendingKind)> = vec![];
    let mut current_node: Option<NodeId> = None;

    for (line_idx, raw_line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let error = |message: String| ParseError {
            line: line_no,
            message,
        };
        let line = raw_line.trim();
        if line.is_empty() || (line.starts_with(";;") && !raw_line.starts_with(char::is_whitespace))
        {
            continue;
        }

        // Instructions are the only indented lines
        if raw_line.starts_with(char::is_whitespace) {
            let node_id = match current_node {
                Some(node_id) => node_id,
                None => return Err(error("instruction outside of a node".to_string())),
            };
            let insn = parse_instruction(line, &locals).map_err(error)?;
            graph[node_id].body.push(insn);
            continue;
        }

        let (keyword, rest) = split_word(line);
        match keyword {
            "method" => {
                if signature.is_some() {
                    return Err(error("duplicate method line".to_string()));
                }
                signature = Some(parse_signature(rest).map_err(error)?);
            }
            "local" => {
                let (name, type_name) = split_word(rest);
                let value_type = parse_type(type_name).map_err(error)?;
                if locals.lookup(name).is_some() {
                    return Err(error(format!("duplicate local `{}`", name)));
                }
                locals.add(name, value_type);
            }
            "node" => {
                let (name, rest) = split_word(rest);
                if node_names.contains_key(name) {
                    return Err(error(format!("duplicate node `{}`", name)));
                }
                let (input_stack, rest) = parse_parenthesized_types(rest).map_err(error)?;
                let rest = match rest.trim_start().strip_prefix("->") {
                    Some(rest) => rest,
                    None => return Err(error("expected `->` after input stack".to_string())),
                };
                let (output_stack, rest) = parse_parenthesized_types(rest).map_err(error)?;
                let kind = parse_kind(rest).map_err(error)?;
                let node_id = graph.add_node(Node::new(vec![], input_stack, output_stack));
                node_names.insert(name.to_string(), node_id);
                pending.push((line_no, node_id, kind));
                current_node = Some(node_id);
            }
            other => return Err(error(format!("unknown declaration `{}`", other))),
        }
    }

    for (line_no, node_id, kind) in pending {
        let lookup = |name: &str| match node_names.get(name) {
            Some(node_id) => Ok(*node_id),
            None => Err(ParseError {
                line: line_no,
                message: format!("unknown node `{}`", name),
            }),
        };
        let kind = match kind {
            PendingKind::Sequence(next) => NodeKind::Sequence {
                next: lookup(&next)?,
            },
            PendingKind::Branch(if_true, if_false) => NodeKind::Branch {
                if_true: lookup(&if_true)?,
                if_false: lookup(&if_false)?,
            },
            PendingKind::Return => NodeKind::Return,
        };
        graph[node_id].kind = kind;
    }
    graph.recalculate_inputs();

    let signature = match signature {
        Some(signature) => signature,
        None => {
            return Err(ParseError {
                line: source.lines().count(),
                message: "missing method line".to_string(),
            })
        }
    };
    if graph.is_empty() {
        return Err(ParseError {
            line: source.lines().count(),
            message: "method has no nodes".to_string(),
        });
    }

    Ok(ParsedMethod {
        signature,
        locals,
        graph,
    })
}

/// Split off the first whitespace separated word
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], text[idx..].trim_start()),
        None => (text, ""),
    }
}

fn parse_type(name: &str) -> Result<ValueType, String> {
    ValueType::from_name(name).ok_or_else(|| format!("unknown type `{}`", name))
}

fn parse_types(text: &str) -> Result<Vec<ValueType>, String> {
    text.split_whitespace().map(parse_type).collect()
}

/// Parse `(i32 i64)` off of the front of the text
fn parse_parenthesized_types(text: &str) -> Result<(Vec<ValueType>, &str), String> {
    let text = text.trim_start();
    let inner = text
        .strip_prefix('(')
        .ok_or_else(|| "expected `(`".to_string())?;
    let close = inner.find(')').ok_or_else(|| "expected `)`".to_string())?;
    Ok((parse_types(&inner[..close])?, &inner[close + 1..]))
}

fn parse_signature(text: &str) -> Result<MethodSignature, String> {
    let (class, rest) = split_word(text);
    let (name, rest) = split_word(rest);
    let (descriptor, rest) = split_word(rest);
    if descriptor.is_empty() {
        return Err("expected `method <class> <name> <descriptor> -> <results>`".to_string());
    }
    let results = match rest.strip_prefix("->") {
        Some(results) => parse_types(results)?,
        None => return Err("expected `->` before method results".to_string()),
    };
    Ok(MethodSignature {
        class: class.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        results,
    })
}

fn parse_kind(text: &str) -> Result<PendingKind, String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        ["seq", next] => Ok(PendingKind::Sequence(next.to_string())),
        ["branch", if_true, if_false] => Ok(PendingKind::Branch(
            if_true.to_string(),
            if_false.to_string(),
        )),
        ["return"] => Ok(PendingKind::Return),
        _ => Err(format!(
            "expected `seq <next>`, `branch <true> <false>`, or `return` but got `{}`",
            text.trim()
        )),
    }
}

fn parse_local(name: &str, locals: &Locals) -> Result<LocalId, String> {
    let name = name.strip_prefix('$').unwrap_or(name);
    locals
        .lookup(name)
        .ok_or_else(|| format!("unknown local `{}`", name))
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("invalid number `{}`", text))
}

fn parse_instruction(line: &str, locals: &Locals) -> Result<Instruction, String> {
    if let Some(comment) = line.strip_prefix(";;") {
        return Ok(Instruction::Comment(comment.trim().to_string()));
    }
    let (mnemonic, rest) = split_word(line);
    Ok(match mnemonic {
        "i32.const" => Instruction::I32Const(parse_number(rest)?),
        "i64.const" => Instruction::I64Const(parse_number(rest)?),
        "f32.const" => Instruction::F32Const(parse_number(rest)?),
        "f64.const" => Instruction::F64Const(parse_number(rest)?),
        "local.get" => Instruction::LocalGet(parse_local(rest, locals)?),
        "local.set" => Instruction::LocalSet(parse_local(rest, locals)?),
        "drop" => Instruction::Drop,
        "unreachable" => Instruction::Unreachable,
        "return" => Instruction::Return,
        "call" => {
            let (name, mut rest) = split_word(rest);
            let mut func_type = FunctionType {
                inputs: vec![],
                outputs: vec![],
            };
            while let Some(group) = rest.trim_start().strip_prefix('(') {
                let close = group.find(')').ok_or_else(|| "expected `)`".to_string())?;
                let (keyword, types) = split_word(&group[..close]);
                match keyword {
                    "param" => func_type.inputs.extend(parse_types(types)?),
                    "result" => func_type.outputs.extend(parse_types(types)?),
                    other => return Err(format!("unexpected `{}` in call type", other)),
                }
                rest = &group[close + 1..];
            }
            if !rest.trim().is_empty() {
                return Err(format!("unexpected `{}` after call", rest.trim()));
            }
            Instruction::Call {
                name: name.to_string(),
                func_type,
            }
        }
        other => match NumericOp::from_mnemonic(other) {
            Some(op) if rest.is_empty() => Instruction::Numeric(op),
            _ => return Err(format!("unsupported instruction `{}`", line)),
        },
    })
}
