//! A lifter from the textual form of the [`il`](crate::il).
//!
//! The listing is LLVM-flavoured, one instruction per line:
//!
//! ```text
//! ; comment
//! define void @name(i32 %a, %Point* %p) {
//! entry:
//!   %x = alloca i32
//!   store i32 0, %x
//!   %v = load i32, %x
//!   %s = add i32 %v, 3
//!   %c = icmp slt i32 %s, 10
//!   br %c, %then, %exit
//! then:
//!   %r = call i32 @f(%s, %v)
//!   br %exit
//! exit:
//!   %i = phi i32 [0, %entry], [%s, %then]
//!   ret void
//! }
//! ```
//!
//! Value-producing instructions carry a leading type right after the opcode (and predicate). It is
//! the result type, except for comparisons (where it is the operand type, and the result is `i1`)
//! and casts written `sext i32 %v to i64`. `alloca T` produces a `T*`. Any operand may carry an
//! explicit type prefix (`i64 4`, `label %bb`); untyped literals take their type from context.
//! Local names (`%x`) may refer to parameters, results, or block labels, and may be used before
//! they are defined.

use crate::containers::unordered::UnorderedMap;
use crate::il::{
    BlockId, CmpPredicate, Function, FunctionBuilder, InsnId, Instruction, Literal, Op, Param, Program,
    Type, Value,
};
use crate::log::*;

use std::str::FromStr;

use itertools::Itertools;
use thiserror::Error;

/// Failure to lift a textual listing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unknown opcode `{opcode}`")]
    UnknownOpcode { line: usize, opcode: String },
    #[error("line {line}: use of undefined value `%{name}`")]
    UndefinedValue { line: usize, name: String },
    #[error("line {line}: `%{name}` is defined more than once")]
    Redefinition { line: usize, name: String },
    #[error("unexpected end of input inside function @{function}")]
    UnterminatedFunction { function: String },
    #[error("function @{function} is malformed: {reason}")]
    Malformed { function: String, reason: String },
}

fn syntax(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.into(),
    }
}

/// Lift a textual listing into a program on which approximability analysis can be performed.
pub fn lift_from(listing: &str) -> Result<Program, ParseError> {
    let mut prog = Program::default();
    let mut current: Option<PendingFunction> = None;

    for (idx, raw) in listing.lines().enumerate() {
        let line = idx + 1;
        let l = raw.split(';').next().unwrap_or("").trim();
        if l.is_empty() {
            continue;
        }
        match current.take() {
            None => {
                if let Some(rest) = l.strip_prefix("define ") {
                    let rest = rest
                        .trim_end()
                        .strip_suffix('{')
                        .ok_or_else(|| syntax(line, "expected `{` at the end of `define`"))?;
                    let (return_type, name, params) = parse_signature(line, rest)?;
                    current = Some(PendingFunction {
                        name,
                        return_type,
                        params,
                        blocks: vec![],
                    });
                } else if let Some(rest) = l.strip_prefix("declare ") {
                    let (return_type, name, params) = parse_signature(line, rest)?;
                    debug!("Adding declaration"; "name" => &name, "line" => line);
                    prog.functions
                        .push(FunctionBuilder::new(name, return_type, params).build());
                } else if l.starts_with('@')
                    || l.starts_with('%')
                    || l.starts_with("target ")
                    || l.starts_with("source_filename")
                    || l.starts_with("attributes ")
                {
                    trace!("Ignoring top-level line"; "line" => line, "text" => l);
                } else {
                    return Err(syntax(line, format!("unexpected top-level line `{}`", l)));
                }
            }
            Some(mut f) => {
                if l == "}" {
                    prog.functions.push(f.finish()?);
                    continue;
                }
                match l.strip_suffix(':') {
                    Some(label) if is_identifier(label) => {
                        f.blocks.push((line, label.to_owned(), vec![]));
                    }
                    _ => {
                        let ins = parse_instruction(line, l, &f.return_type)?;
                        if f.blocks.is_empty() {
                            f.blocks.push((line, "entry".to_owned(), vec![]));
                        }
                        if let Some((_, _, insns)) = f.blocks.last_mut() {
                            insns.push(ins);
                        }
                    }
                }
                current = Some(f);
            }
        }
    }

    if let Some(f) = current {
        return Err(ParseError::UnterminatedFunction { function: f.name });
    }

    info!("Lifted program"; "functions" => prog.functions.len());
    Ok(prog)
}

/// A function whose body has been read, but whose local names are not yet resolved.
struct PendingFunction {
    name: String,
    return_type: Type,
    params: Vec<Param>,
    /// (line, label, instructions) per block
    blocks: Vec<(usize, String, Vec<PendingInstruction>)>,
}

struct PendingInstruction {
    line: usize,
    op: Op,
    ty: Type,
    predicate: Option<CmpPredicate>,
    name: Option<String>,
    operands: Vec<PendingOperand>,
    incoming_blocks: Vec<String>,
}

enum PendingOperand {
    Resolved(Value),
    Local(String),
}

impl PendingFunction {
    /// Resolve all local names, and build the function.
    fn finish(self) -> Result<Function, ParseError> {
        let mut names: UnorderedMap<String, Value> = Default::default();
        let mut define = |line: usize, name: &str, v: Value| {
            if names.insert(name.to_owned(), v).is_some() {
                Err(ParseError::Redefinition {
                    line,
                    name: name.to_owned(),
                })
            } else {
                Ok(())
            }
        };

        for (i, p) in self.params.iter().enumerate() {
            define(0, &p.name, Value::Argument(i))?;
        }
        let mut next_id = 0;
        for (b, (line, label, insns)) in self.blocks.iter().enumerate() {
            define(*line, label, Value::Block(BlockId(b)))?;
            for ins in insns {
                if let Some(n) = &ins.name {
                    define(ins.line, n, Value::Instruction(InsnId(next_id)))?;
                }
                next_id += 1;
            }
        }

        let resolve = |line: usize, name: &str| {
            names
                .get(name)
                .cloned()
                .ok_or_else(|| ParseError::UndefinedValue {
                    line,
                    name: name.to_owned(),
                })
        };

        let mut builder = FunctionBuilder::new(&self.name, self.return_type, self.params);
        for (_, label, insns) in self.blocks {
            builder.begin_block(label);
            for ins in insns {
                let operands = ins
                    .operands
                    .into_iter()
                    .map(|o| match o {
                        PendingOperand::Resolved(v) => Ok(v),
                        PendingOperand::Local(n) => resolve(ins.line, &n),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let incoming_blocks = ins
                    .incoming_blocks
                    .iter()
                    .map(|n| match resolve(ins.line, n)? {
                        Value::Block(b) => Ok(b),
                        _ => Err(syntax(ins.line, format!("`%{}` is not a block", n))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                builder.add_instruction(Instruction {
                    op: ins.op,
                    ty: ins.ty,
                    predicate: ins.predicate,
                    name: ins.name,
                    operands,
                    incoming_blocks,
                });
            }
        }

        let func = builder.build();
        func.try_confirm_valid()
            .map_err(|reason| ParseError::Malformed {
                function: self.name.clone(),
                reason,
            })?;
        Ok(func)
    }
}

/// Parse `T @name(T %a, T %b)`, ignoring anything after the parameter list
fn parse_signature(line: usize, s: &str) -> Result<(Type, String, Vec<Param>), ParseError> {
    let (ret, rest) = s
        .split_once('@')
        .ok_or_else(|| syntax(line, "expected `@name` in function signature"))?;
    let return_type = match parse_type(ret) {
        Some((t, r)) if r.trim().is_empty() => t,
        _ => return Err(syntax(line, format!("bad return type `{}`", ret.trim()))),
    };
    let (name, rest) = rest
        .split_once('(')
        .ok_or_else(|| syntax(line, "expected `(` after function name"))?;
    let params_text = rest
        .rsplit_once(')')
        .ok_or_else(|| syntax(line, "expected `)` after parameters"))?
        .0;
    let mut params = vec![];
    for (i, p) in split_top_level(params_text).into_iter().enumerate() {
        if p == "..." {
            continue;
        }
        let (ty, rest) =
            parse_type(p).ok_or_else(|| syntax(line, format!("bad parameter `{}`", p)))?;
        let name = match rest.trim() {
            "" => i.to_string(),
            n => n
                .strip_prefix('%')
                .filter(|n| is_identifier(n))
                .ok_or_else(|| syntax(line, format!("bad parameter name `{}`", n)))?
                .to_owned(),
        };
        params.push(Param { name, ty });
    }
    Ok((return_type, name.trim().to_owned(), params))
}

fn parse_instruction(line: usize, text: &str, return_type: &Type) -> Result<PendingInstruction, ParseError> {
    let (name, body) = match text.strip_prefix('%').and_then(|t| t.split_once('=')) {
        Some((n, b)) => {
            let n = n.trim();
            if !is_identifier(n) {
                return Err(syntax(line, format!("bad result name `%{}`", n)));
            }
            (Some(n.to_owned()), b.trim())
        }
        None => (None, text),
    };

    let (opword, rest) = split_word(body);
    let op = Op::from_str(opword).map_err(|_| ParseError::UnknownOpcode {
        line,
        opcode: opword.to_owned(),
    })?;
    let (predicate, rest) = match op {
        Op::ICmp | Op::FCmp => {
            let (p, r) = split_word(rest);
            let p = CmpPredicate::from_str(p)
                .map_err(|_| syntax(line, format!("unknown predicate `{}`", p)))?;
            (Some(p), r)
        }
        _ => (None, rest),
    };

    let produces_value = !matches!(
        op,
        Op::Store | Op::Br | Op::Switch | Op::Ret | Op::Fence | Op::Unreachable
    );
    let (leading, rest) = if produces_value {
        let (t, r) = parse_type(rest)
            .ok_or_else(|| syntax(line, format!("expected a type after `{}`", op)))?;
        let r = r.trim_start();
        (Some(t), r.strip_prefix(',').unwrap_or(r).trim())
    } else {
        (None, rest.trim())
    };

    if produces_value != name.is_some() && op != Op::Call {
        return Err(syntax(
            line,
            if produces_value {
                format!("result of `{}` must be named", op)
            } else {
                format!("`{}` does not produce a value", op)
            },
        ));
    }

    // Type given to untyped literals
    let context = match (op, &leading) {
        (Op::GetElementPtr, _) => Type::Int(64),
        (Op::Ret, _) => return_type.clone(),
        (_, Some(t)) if t.is_integer() || t.is_floating_point() => t.clone(),
        _ => Type::Int(32),
    };
    let operand = |s: &str| parse_operand(s, &context).map_err(|m| syntax(line, m));

    let mut ty = leading.clone().unwrap_or(Type::Void);
    let mut operands = vec![];
    let mut incoming_blocks = vec![];
    match op {
        Op::Alloca => {
            ty = ty.pointer_to();
            operands.push(if rest.is_empty() {
                PendingOperand::Resolved(Value::int(Type::Int(32), 1))
            } else {
                operand(rest)?
            });
        }
        Op::Call => {
            let (callee, args) = rest
                .split_once('(')
                .ok_or_else(|| syntax(line, "expected `(` after callee"))?;
            let args = args
                .rsplit_once(')')
                .ok_or_else(|| syntax(line, "expected `)` after call arguments"))?
                .0;
            for a in split_top_level(args) {
                operands.push(operand(a)?);
            }
            operands.push(operand(callee)?);
        }
        Op::Phi => {
            for item in split_top_level(rest) {
                let (v, bb) = item
                    .strip_prefix('[')
                    .and_then(|i| i.strip_suffix(']'))
                    .and_then(|i| i.split_once(','))
                    .ok_or_else(|| syntax(line, format!("bad phi entry `{}`", item)))?;
                operands.push(operand(v)?);
                let bb = bb.trim().strip_prefix('%').filter(|b| is_identifier(b));
                incoming_blocks.push(
                    bb.ok_or_else(|| syntax(line, format!("bad phi block in `{}`", item)))?
                        .to_owned(),
                );
            }
        }
        Op::Ret if rest.is_empty() || rest == "void" => {}
        _ if op.is_cast() => {
            let (v, to) = match rest.rsplit_once(" to ") {
                Some((v, to)) => {
                    let to = match parse_type(to) {
                        Some((t, r)) if r.trim().is_empty() => t,
                        _ => return Err(syntax(line, format!("bad cast type `{}`", to.trim()))),
                    };
                    (v, Some(to))
                }
                None => (rest, None),
            };
            operands.push(operand(v)?);
            if let Some(to) = to {
                ty = to;
            }
        }
        _ => {
            for o in split_top_level(rest) {
                operands.push(operand(o)?);
            }
        }
    }
    if matches!(op, Op::ICmp | Op::FCmp) {
        ty = Type::Int(1);
    }

    Ok(PendingInstruction {
        line,
        op,
        ty,
        predicate,
        name,
        operands,
        incoming_blocks,
    })
}

/// Parse an operand, with an optional leading type. `context` types untyped literals.
fn parse_operand(text: &str, context: &Type) -> Result<PendingOperand, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty operand".into());
    }
    if let Some((ty, rest)) = parse_type(text) {
        let rest = rest.trim();
        if !rest.is_empty() {
            return parse_atom(rest, &ty);
        }
    }
    parse_atom(text, context)
}

fn parse_atom(text: &str, ty: &Type) -> Result<PendingOperand, String> {
    if let Some(n) = text.strip_prefix('%') {
        return if is_identifier(n) {
            Ok(PendingOperand::Local(n.to_owned()))
        } else {
            Err(format!("bad local name `{}`", text))
        };
    }
    if let Some(n) = text.strip_prefix('@') {
        return if is_identifier(n) {
            Ok(PendingOperand::Resolved(Value::Global(n.to_owned())))
        } else {
            Err(format!("bad global name `{}`", text))
        };
    }
    let constant = |ty: Type, literal: Literal| PendingOperand::Resolved(Value::Constant { ty, literal });
    let float = |v: f64| {
        let ty = if ty.is_floating_point() { ty.clone() } else { Type::Double };
        constant(ty, Literal::Float(v.to_bits()))
    };
    match text {
        "true" => return Ok(constant(Type::Int(1), Literal::Int(1))),
        "false" => return Ok(constant(Type::Int(1), Literal::Int(0))),
        "null" => {
            let ty = match ty {
                Type::Pointer(_) => ty.clone(),
                _ => Type::Int(8).pointer_to(),
            };
            return Ok(constant(ty, Literal::Null));
        }
        "undef" => return Ok(constant(ty.clone(), Literal::Undef)),
        _ => {}
    }
    if let Ok(v) = text.parse::<i128>() {
        return Ok(if ty.is_floating_point() {
            float(v as f64)
        } else {
            constant(ty.clone(), Literal::Int(v))
        });
    }
    if let Ok(v) = text.parse::<f64>() {
        return Ok(float(v));
    }
    Err(format!("cannot parse operand `{}`", text))
}

/// Parse a type from the start of `s`, returning it along with the remaining text
pub(crate) fn parse_type(s: &str) -> Option<(Type, &str)> {
    let s = s.trim_start();
    let (mut ty, mut rest) = if let Some(inner) = s.strip_prefix('[') {
        let (n, rest) = split_word(inner);
        let n: u64 = n.parse().ok()?;
        let rest = rest.trim_start().strip_prefix('x')?;
        let (elem, rest) = parse_type(rest)?;
        (Type::Array(n, Box::new(elem)), rest.trim_start().strip_prefix(']')?)
    } else if let Some(name) = s.strip_prefix('%') {
        let end = name
            .find(|c: char| !is_identifier_char(c))
            .unwrap_or(name.len());
        if end == 0 {
            return None;
        }
        (Type::Named(name[..end].to_owned()), &name[end..])
    } else {
        let end = s.find(|c: char| !c.is_ascii_alphanumeric()).unwrap_or(s.len());
        let word = &s[..end];
        let ty = match word {
            "void" => Type::Void,
            "float" => Type::Float,
            "double" => Type::Double,
            "label" => Type::Label,
            _ => Type::Int(word.strip_prefix('i')?.parse().ok()?),
        };
        if s[end..].starts_with(|c: char| is_identifier_char(c)) {
            return None;
        }
        (ty, &s[end..])
    };
    while let Some(r) = rest.strip_prefix('*') {
        ty = ty.pointer_to();
        rest = r;
    }
    Some((ty, rest))
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-')
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_identifier_char)
}

/// Split off the first whitespace-delimited word
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

/// Split on commas that are not nested inside brackets or parentheses
fn split_top_level(s: &str) -> Vec<&str> {
    if s.trim().is_empty() {
        return vec![];
    }
    let mut depth = 0i32;
    let mut start = 0;
    let mut parts = vec![];
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts.into_iter().map(str::trim).collect_vec()
}
