use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod emit;
pub mod fold;
pub mod header;
pub mod instr;
pub mod names;
pub mod node;
pub mod switch;
pub mod types;

pub use emit::{RenderContext, render_binary, render_disassembly, render_pseudocode};
pub use fold::{FoldStack, fold_function};
pub use header::{ClassRecord, EventTable, UsecodeHeader, read_class};
pub use instr::{FunctionRun, Instr, Operand, decode_functions, decode_instructions};
pub use names::{GlobalName, NameTables, SymbolTable};
pub use node::{FunctionNode, Node, NodeKind};
pub use switch::collapse_switches;
pub use types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Pseudo,
    Disasm,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    pub collapse_switches: bool,
    pub debug_comments: bool,
    pub class_name: Option<String>,
    pub class_id: u32,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: DecompileMode::Pseudo,
            collapse_switches: true,
            debug_comments: true,
            class_name: None,
            class_id: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeucError {
    #[error("unexpected end of input")]
    Eof,

    #[error("invalid opcode 0x{opcode:02X} at 0x{offset:04X}")]
    InvalidOpcode { offset: u32, opcode: u8 },

    #[error("truncated opcode 0x{opcode:02X} at 0x{offset:04X}")]
    TruncatedOpcode { offset: u32, opcode: u8 },

    #[error("jump at 0x{offset:04X} leaves the code stream")]
    InvalidJump { offset: u32 },

    #[error("jump at 0x{offset:04X} to 0x{target:04X} does not fit in 16 bits")]
    JumpOutOfRange { offset: u32, target: u32 },

    #[error("opcode 0x{opcode:04X} at 0x{offset:04X} needs an operand but the stack is empty")]
    EmptyStack { opcode: u16, offset: u32 },

    #[error("opcode 0x{opcode:04X} at 0x{offset:04X} expected a {expected} operand, found {found}")]
    TypeMismatch { opcode: u16, offset: u32, expected: &'static str, found: Type },

    #[error("intrinsic call at 0x{offset:04X}: arguments do not add up to {arg_bytes} bytes")]
    ArgumentMismatch { offset: u32, arg_bytes: u8 },

    #[error("conditional at 0x{offset:04X} targets 0x{target:04X}, which is not an instruction boundary")]
    MissedJumpTarget { offset: u32, target: u32 },

    #[error("loopnext at 0x{offset:04X} has no open loop to close")]
    UnexpectedLoopNext { offset: u32 },

    #[error("loop at 0x{offset:04X} is never closed by a loopnext")]
    MissingLoopNext { offset: u32 },

    #[error("structural marker 0x{opcode:04X} at 0x{offset:04X} inside a function body")]
    UnexpectedMarker { opcode: u16, offset: u32 },

    #[error("expected {expected} marker, found opcode 0x{opcode:04X} at 0x{offset:04X}")]
    MissingMarker { expected: &'static str, opcode: u16, offset: u32 },

    #[error("malformed set info at 0x{offset:04X}: {reason}")]
    InvalidSetInfo { offset: u32, reason: &'static str },

    #[error("{remaining} node(s) left on the fold stack after function at 0x{offset:04X}")]
    StackNotEmpty { offset: u32, remaining: usize },

    #[error("end marker at 0x{offset:04X} without a function to close")]
    OrphanEnd { offset: u32 },

    #[error("no function was folded")]
    NoFunction,

    #[error("function at 0x{offset:04X} is missing its {missing} marker")]
    IncompleteFunction { offset: u32, missing: &'static str },

    #[error("invalid class header: size field {size} is too small")]
    InvalidHeader { size: u32 },

    #[error("truncated class record: need {expected} bytes, have {actual}")]
    TruncatedClass { expected: usize, actual: usize },

    #[error("symbol table line {line}: {reason}")]
    InvalidSymbol { line: usize, reason: String },

    #[error("function at 0x{start:04X}: {source}")]
    InFunction { start: u32, source: Box<DeucError> },
}

impl DeucError {
    fn in_function(start: u32, e: DeucError) -> Self {
        DeucError::InFunction { start, source: Box::new(e) }
    }
}

pub struct FoldedClass<'a> {
    pub class: ClassRecord<'a>,
    pub functions: Vec<FoldedFunction>,
}

pub struct FoldedFunction {
    pub start: u32,
    pub range: std::ops::Range<usize>,
    pub result: Result<FunctionNode, DeucError>,
}

/// Decodes and folds every function of a class record. A function that fails to
/// decode or fold keeps its error; the remaining functions are still folded.
pub fn fold_class<'a>(bytes: &'a [u8], options: &DecompileOptions) -> Result<FoldedClass<'a>, DeucError> {
    let class = read_class(bytes)?;
    let runs = decode_functions(class.code, &class.events.entries);
    info!(functions = runs.len(), code_len = class.code.len(), "decoded class");

    // a symbol info marker names the class for every function after it
    let mut class_name = options.class_name.clone();
    let mut functions = Vec::with_capacity(runs.len());
    for run in runs {
        let FunctionRun { start, range, instrs } = run;
        let result = instrs
            .and_then(|instrs| fold_function(instrs, options.collapse_switches))
            .map(|mut func| {
                if options.class_name.is_none() && func.class_name.is_some() {
                    class_name = func.class_name.clone();
                } else {
                    func.class_name = class_name.clone();
                }
                func.class_id = options.class_id;
                func.event = class.events.event_at(func.start_offset);
                func
            })
            .map_err(|e| DeucError::in_function(start, e));
        if let Err(e) = &result {
            warn!(start, "{e}");
        }
        functions.push(FoldedFunction { start, range, result });
    }
    Ok(FoldedClass { class, functions })
}

/// Renders every function of a class record. Text modes isolate failed functions
/// behind an error comment; binary mode has no such escape and fails outright.
pub fn decompile_with(
    bytes: &[u8],
    options: &DecompileOptions,
    names: NameTables<'_>,
    symbols: &SymbolTable,
) -> Result<Vec<u8>, DeucError> {
    let folded = fold_class(bytes, options)?;
    let ctx = RenderContext { names, symbols, debug_comments: options.debug_comments };

    if options.mode == DecompileMode::Binary {
        let mut out = Vec::with_capacity(folded.class.code.len());
        for f in folded.functions {
            out.extend(render_binary(&f.result?).map_err(|e| DeucError::in_function(f.start, e))?);
        }
        return Ok(out);
    }

    let mut out = String::new();
    for f in &folded.functions {
        let rendered = f.result.as_ref().map_err(|e| e.to_string()).and_then(|func| {
            let text = match options.mode {
                DecompileMode::Disasm => render_disassembly(func, &ctx),
                _ => render_pseudocode(func, &ctx),
            };
            text.map_err(|e| DeucError::in_function(f.start, e).to_string())
        });
        let s = match rendered {
            Ok(s) => s,
            Err(e) => format!("// decompilation error: {}\n", e),
        };
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&s);
    }
    Ok(out.into_bytes())
}

pub fn decompile_with_options(bytes: &[u8], options: &DecompileOptions) -> Result<Vec<u8>, DeucError> {
    let symbols = SymbolTable::new();
    decompile_with(bytes, options, NameTables::u8(), &symbols)
}

pub fn decompile(bytes: &[u8]) -> Result<String, DeucError> {
    let out = decompile_with_options(bytes, &DecompileOptions::default())?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTripReport {
    pub checked: usize,
    pub mismatches: Vec<u32>,
    pub failed: Vec<(u32, String)>,
}

impl RoundTripReport {
    pub fn is_exact(&self) -> bool {
        self.mismatches.is_empty() && self.failed.is_empty()
    }
}

pub fn verify_roundtrip(bytes: &[u8]) -> Result<RoundTripReport, DeucError> {
    let folded = fold_class(bytes, &DecompileOptions::default())?;
    let mut report = RoundTripReport::default();
    for f in folded.functions {
        report.checked += 1;
        let encoded = match f.result.and_then(|func| render_binary(&func)) {
            Ok(b) => b,
            Err(e) => {
                report.failed.push((f.start, e.to_string()));
                continue;
            }
        };
        if folded.class.code.get(f.range.clone()) != Some(encoded.as_slice()) {
            warn!(start = f.start, "re-encoded function differs from the original");
            report.mismatches.push(f.start);
        }
    }
    debug!(checked = report.checked, mismatches = report.mismatches.len(), "round trip done");
    Ok(report)
}
