//! PixSimAssembly compiler (spec §4.4): a single-pass lexer/lowering pass
//! that turns one source into one output string per configured dialect, the
//! only difference between dialect outputs being how pixel literals (`{id}`)
//! are quoted. Modeled on the hand-rolled char-scanning tokenizers in the
//! pack's command-parser crates rather than a parser-generator crate, since
//! the grammar is a flat per-line instruction form, not a recursive one.

mod lexer;

use std::collections::HashMap;

use crate::dialect::DialectId;
use crate::pixel::LookupTable;
use lexer::{tokenize_line, Token};

#[derive(Debug, Clone)]
pub enum CompileError {
    SyntaxError { line: usize, message: String },
    PixelIdError { literal: String },
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::SyntaxError { line, message } => write!(f, "line {line}: {message}"),
            CompileError::PixelIdError { literal } => write!(f, "unknown pixel literal {{{literal}}}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Conditional,
    Loop,
    IterationOrFunction,
}

#[derive(Debug, Clone)]
struct Instruction {
    line: usize,
    call: &'static str,
    args: Vec<String>,
}

#[derive(Debug, Clone)]
enum Emitted {
    Call(Instruction),
    BlockOpen(&'static str, Vec<String>),
    BlockElse,
    BlockElif(Vec<String>),
    BlockClose,
    Break,
    Continue,
}

/// Dialect-agnostic intermediate form: a flat program where pixel literals
/// are still raw identifiers. Emission substitutes them per dialect.
struct Program {
    items: Vec<Emitted>,
}

/// Parses `source` once, validating block structure and instruction arity,
/// then emits one lowered program per entry in `dialects`, substituting each
/// `{identifier}` pixel literal with that dialect's quoted string id.
pub fn compile(source: &str, dialects: &[DialectId], lookup: &LookupTable) -> Result<HashMap<DialectId, String>, CompileError> {
    let program = parse(source)?;

    let mut out = HashMap::new();
    for dialect in dialects {
        let emitted = emit(&program, lookup, dialect)?;
        out.insert(dialect.clone(), emitted);
    }
    Ok(out)
}

fn parse(source: &str) -> Result<Program, CompileError> {
    let mut items = Vec::new();
    let mut block_stack: Vec<BlockKind> = Vec::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize_line(raw_line);
        let Some(first) = tokens.first() else { continue };
        let Token::Bare(instr) = first else {
            return Err(CompileError::SyntaxError {
                line,
                message: "expected an instruction keyword".to_string(),
            });
        };
        let args = &tokens[1..];

        match instr.as_str() {
            "IF" => {
                block_stack.push(BlockKind::Conditional);
                items.push(Emitted::BlockOpen("if", expr_args(args, line)?));
            }
            "ELIF" => {
                require_top(&block_stack, BlockKind::Conditional, line, "ELIF")?;
                items.push(Emitted::BlockElif(expr_args(args, line)?));
            }
            "ELSE" => {
                require_top(&block_stack, BlockKind::Conditional, line, "ELSE")?;
                items.push(Emitted::BlockElse);
            }
            "WHILE" => {
                block_stack.push(BlockKind::Loop);
                items.push(Emitted::BlockOpen("while", expr_args(args, line)?));
            }
            "FOR" => {
                block_stack.push(BlockKind::IterationOrFunction);
                items.push(Emitted::BlockOpen("for", expr_args(args, line)?));
            }
            "FUNCTION" => {
                block_stack.push(BlockKind::IterationOrFunction);
                items.push(Emitted::BlockOpen("function", expr_args(args, line)?));
            }
            "END" => {
                if block_stack.pop().is_none() {
                    return Err(CompileError::SyntaxError {
                        line,
                        message: "END with no open block".to_string(),
                    });
                }
                items.push(Emitted::BlockClose);
            }
            "BREAK" => {
                if !block_stack.contains(&BlockKind::Loop) {
                    return Err(CompileError::SyntaxError {
                        line,
                        message: "BREAK outside a loop".to_string(),
                    });
                }
                items.push(Emitted::Break);
            }
            "CONTINUE" => {
                if !block_stack.contains(&BlockKind::Loop) {
                    return Err(CompileError::SyntaxError {
                        line,
                        message: "CONTINUE outside a loop".to_string(),
                    });
                }
                items.push(Emitted::Continue);
            }
            other => {
                items.push(Emitted::Call(lower_instruction(other, args, line)?));
            }
        }
    }

    if !block_stack.is_empty() {
        return Err(CompileError::SyntaxError {
            line: source.lines().count(),
            message: "unclosed block at end of source".to_string(),
        });
    }

    Ok(Program { items })
}

fn require_top(stack: &[BlockKind], kind: BlockKind, line: usize, instr: &str) -> Result<(), CompileError> {
    match stack.last() {
        Some(top) if *top == kind => Ok(()),
        _ => Err(CompileError::SyntaxError {
            line,
            message: format!("{instr} with no matching open conditional block"),
        }),
    }
}

fn expr_args(tokens: &[Token], line: usize) -> Result<Vec<String>, CompileError> {
    if tokens.is_empty() {
        return Err(CompileError::SyntaxError {
            line,
            message: "expected a condition expression".to_string(),
        });
    }
    Ok(lower_operators(tokens).iter().map(render_token_raw).collect())
}

fn lower_instruction(instr: &str, args: &[Token], line: usize) -> Result<Instruction, CompileError> {
    let (call, min_args, max_args): (&'static str, usize, usize) = match instr {
        "WRITE" => ("setVariable", 2, 2),
        "DEFARR" => ("defArray", 2, 3),
        "WRITEARR" => ("setArray", 3, 3),
        "FNCALL" => ("callFunction", 1, usize::MAX),
        "WAIT" => ("wait", 1, 1),
        "PRINT" => ("print", 1, usize::MAX),
        "SETPX" => ("setPixel", 3, 3),
        "GETPX" => ("getPixel", 2, 2),
        "SETAM" => ("setAmount", 3, 3),
        "GETAM" => ("getAmount", 2, 2),
        "CMOVE" => ("moveCamera", 3, 4),
        "CSHAKE" => ("shakeCamera", 3, 3),
        "WIN" => ("triggerWin", 1, 1),
        "SOUND" => ("playSound", 3, 4),
        "STARTSIM" => ("startSim", 0, 1),
        "STOPSIM" => ("stopSim", 0, 0),
        "TICK" => ("awaitTick", 0, 0),
        other => {
            return Err(CompileError::SyntaxError {
                line,
                message: format!("unknown instruction {other}"),
            })
        }
    };

    let lowered = lower_operators(args);

    if lowered.len() < min_args || lowered.len() > max_args {
        return Err(CompileError::SyntaxError {
            line,
            message: format!("{instr} expects {min_args}..={max_args} args, got {}", lowered.len()),
        });
    }

    Ok(Instruction {
        line,
        call,
        args: lowered.iter().map(render_token_raw).collect(),
    })
}

/// Renders a token back to text for inclusion in a call's argument list,
/// without resolving pixel literals yet (that happens per-dialect in `emit`).
fn render_token_raw(token: &Token) -> String {
    match token {
        Token::Bare(s) | Token::Var(s) | Token::Str(s) | Token::Paren(s) | Token::Op(s) => s.clone(),
        Token::Pixel(s) => format!("{{{s}}}"),
    }
}

/// Folds `^`/`~=`/`~>`/`~<` infix operators into their dialect-neutral target
/// lowering (exponentiation, round, ceil, floor) left-to-right, so `a^b` or
/// `a~=b` becomes a single call token before rendering (spec §4.4).
fn lower_operators(tokens: &[Token]) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Op(op) = &tokens[i] {
            if let Some(func) = lowering_func(op) {
                if let (Some(left), Some(right)) = (out.last(), tokens.get(i + 1)) {
                    let combined = format!("{func}({}, {})", render_token_raw(left), render_token_raw(right));
                    out.pop();
                    out.push(Token::Bare(combined));
                    i += 2;
                    continue;
                }
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn lowering_func(op: &str) -> Option<&'static str> {
    match op {
        "^" => Some("pow"),
        "~=" => Some("round"),
        "~>" => Some("ceil"),
        "~<" => Some("floor"),
        _ => None,
    }
}

fn emit(program: &Program, lookup: &LookupTable, dialect: &DialectId) -> Result<String, CompileError> {
    let mut out = String::new();
    let mut indent = 0usize;

    for item in &program.items {
        match item {
            Emitted::Call(instr) => {
                let args = substitute_pixels(&instr.args, lookup, dialect)?;
                push_line(&mut out, indent, &format!("{}({});", instr.call, args.join(", ")));
            }
            Emitted::BlockOpen(kind, cond) => {
                let cond = substitute_pixels(cond, lookup, dialect)?;
                push_line(&mut out, indent, &format!("{kind} {} {{", cond.join(" ")));
                indent += 1;
            }
            Emitted::BlockElif(cond) => {
                indent -= 1;
                let cond = substitute_pixels(cond, lookup, dialect)?;
                push_line(&mut out, indent, &format!("}} elif {} {{", cond.join(" ")));
                indent += 1;
            }
            Emitted::BlockElse => {
                indent -= 1;
                push_line(&mut out, indent, "} else {");
                indent += 1;
            }
            Emitted::BlockClose => {
                indent -= 1;
                push_line(&mut out, indent, "}");
            }
            Emitted::Break => push_line(&mut out, indent, "break;"),
            Emitted::Continue => push_line(&mut out, indent, "continue;"),
        }
    }

    Ok(out)
}

fn push_line(out: &mut String, indent: usize, text: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push_str(text);
    out.push('\n');
}

/// Replaces every `{identifier}` pixel literal in `args` with the dialect's
/// quoted string id, per the lookup table's "standard" column entry for
/// `identifier`.
fn substitute_pixels(args: &[String], lookup: &LookupTable, dialect: &DialectId) -> Result<Vec<String>, CompileError> {
    args.iter()
        .map(|arg| substitute_pixels_in(arg, lookup, dialect))
        .collect()
}

fn substitute_pixels_in(arg: &str, lookup: &LookupTable, dialect: &DialectId) -> Result<String, CompileError> {
    if !arg.starts_with('{') || !arg.ends_with('}') {
        return Ok(arg.to_string());
    }
    let literal = &arg[1..arg.len() - 1];
    let standard = DialectId::standard();
    let canonical = lookup
        .canonical_for_string(&standard, literal)
        .ok_or_else(|| CompileError::PixelIdError {
            literal: literal.to_string(),
        })?;
    let dialect_string = lookup
        .string_id(canonical, dialect)
        .ok_or_else(|| CompileError::PixelIdError {
            literal: literal.to_string(),
        })?;
    Ok(format!("\"{dialect_string}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> LookupTable {
        LookupTable::parse("id,rps,bps,standard\n1,stone,stn,stone\n").unwrap()
    }

    #[test]
    fn compiles_balanced_blocks() {
        let source = "WRITE <x> 1\nIF <x>==1\nPRINT \"ok\"\nEND";
        let result = compile(source, &[DialectId::from("rps")], &lookup()).unwrap();
        let out = result.get(&DialectId::from("rps")).unwrap();
        assert!(out.contains("setVariable(<x>, 1);"));
        assert!(out.contains("if <x>==1 {"));
        assert!(out.contains("print(\"ok\");"));
    }

    #[test]
    fn rejects_unbalanced_block() {
        let source = "IF <x>==1\nPRINT \"ok\"";
        assert!(matches!(
            compile(source, &[DialectId::from("rps")], &lookup()),
            Err(CompileError::SyntaxError { .. })
        ));
    }

    #[test]
    fn rejects_stray_end() {
        let source = "END";
        assert!(matches!(
            compile(source, &[DialectId::from("rps")], &lookup()),
            Err(CompileError::SyntaxError { .. })
        ));
    }

    #[test]
    fn substitutes_pixel_literal_per_dialect() {
        let source = "SETPX <grid> <i> {stone}";
        let result = compile(source, &[DialectId::from("bps")], &lookup()).unwrap();
        let out = result.get(&DialectId::from("bps")).unwrap();
        assert!(out.contains("\"stn\""));
    }

    #[test]
    fn unknown_pixel_literal_is_an_error() {
        let source = "SETPX <grid> <i> {ghost}";
        assert!(matches!(
            compile(source, &[DialectId::from("rps")], &lookup()),
            Err(CompileError::PixelIdError { .. })
        ));
    }

    #[test]
    fn lowers_caret_to_exponentiation() {
        let source = "WRITE <x> <a>^<b>";
        let result = compile(source, &[DialectId::from("rps")], &lookup()).unwrap();
        let out = result.get(&DialectId::from("rps")).unwrap();
        assert!(out.contains("pow(<a>, <b>)"));
    }

    #[test]
    fn lowers_rounding_operators() {
        let source = "IF <x>~=<y>\nPRINT \"ok\"\nEND";
        let result = compile(source, &[DialectId::from("rps")], &lookup()).unwrap();
        let out = result.get(&DialectId::from("rps")).unwrap();
        assert!(out.contains("round(<x>, <y>)"));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let source = "IF <x>==1\nBREAK\nEND";
        assert!(matches!(
            compile(source, &[DialectId::from("rps")], &lookup()),
            Err(CompileError::SyntaxError { .. })
        ));
    }
}
