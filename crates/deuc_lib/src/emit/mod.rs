//! Output surfaces for a folded function.
//!
//! The disassembly and binary emitters both work off [`stream`], which walks the
//! tree back into the instruction sequence it was folded from. Pseudocode walks
//! the tree directly.

use crate::DeucError;
use crate::instr::*;
use crate::node::*;
use crate::types::{DataType, PopTarget};

pub mod binary;
pub mod disasm;
pub mod pseudo;

pub use binary::render_binary;
pub use disasm::render_disassembly;
pub use pseudo::{RenderContext, render_pseudocode};

pub fn stream(func: &FunctionNode) -> Result<Vec<Instr>, DeucError> {
    if let Some(missing) = func.missing_marker() {
        return Err(DeucError::IncompleteFunction { offset: func.start_offset, missing });
    }
    let mut out = Vec::new();
    out.push(Instr::new(func.start_offset, OP_INIT, Operand::U8(func.locals_size)));
    if let Some(info) = &func.set_info {
        set_info(info, &mut out)?;
    }
    if let Some(at) = func.procexclude_offset {
        out.push(Instr::new(at, OP_PROC_EXCLUDE, Operand::None));
    }
    nodes(&func.body, &mut out)?;
    if let Some(at) = func.ret_offset {
        out.push(Instr::new(at, OP_RET, Operand::None));
    }
    if let Some(at) = func.end_offset {
        out.push(Instr::new(at, OP_END, Operand::None));
    }
    Ok(out)
}

fn set_info(info: &SetInfo, out: &mut Vec<Instr>) -> Result<(), DeucError> {
    node(&info.process_type, out)?;
    node(&info.this_ptr, out)?;
    out.push(Instr::new(info.at, OP_SET_INFO, Operand::None));
    Ok(())
}

fn nodes(body: &[Node], out: &mut Vec<Instr>) -> Result<(), DeucError> {
    for n in body {
        node(n, out)?;
    }
    Ok(())
}

fn rel(at: u32, size: u32, target: u32) -> Result<i16, DeucError> {
    let rel = target as i64 - (at as i64 + size as i64);
    i16::try_from(rel).map_err(|_| DeucError::JumpOutOfRange { offset: at, target })
}

fn push_operand(d: &DataType) -> Operand {
    match d {
        DataType::Byte(v) => Operand::Byte(*v),
        DataType::Word(v) => Operand::Word(*v),
        DataType::Dword(v) => Operand::Dword(*v),
        DataType::Str(s) => Operand::Str(s.clone()),
        DataType::LocalByte(s) | DataType::LocalWord(s) | DataType::LocalDword(s) => Operand::Slot(*s),
        DataType::Global { offset, size } => Operand::Global { offset: *offset, size: *size },
    }
}

fn pop_operand(t: PopTarget) -> Operand {
    match t {
        PopTarget::LocalByte(s) | PopTarget::LocalWord(s) | PopTarget::LocalDword(s) => Operand::Slot(s),
        PopTarget::Global { offset, size } => Operand::Global { offset, size },
        PopTarget::Temp => Operand::None,
    }
}

fn loop_next(offset: u32, next: Option<u32>, out: &mut Vec<Instr>) -> Result<(), DeucError> {
    let at = next.ok_or(DeucError::MissingLoopNext { offset })?;
    out.push(Instr::new(at, OP_LOOPNEXT, Operand::None));
    Ok(())
}

fn node(n: &Node, out: &mut Vec<Instr>) -> Result<(), DeucError> {
    let offset = n.offset;
    match &n.kind {
        NodeKind::LineNumber { line } => out.push(Instr::new(offset, OP_LINE_NUMBER, Operand::U16(*line))),
        NodeKind::SymbolInfo { rel, name } => {
            out.push(Instr::new(offset, OP_SYMBOL_INFO, Operand::SymbolInfo { rel: *rel, name: *name }))
        }
        NodeKind::Suspend => out.push(Instr::new(offset, OP_SUSPEND, Operand::None)),
        NodeKind::Init { locals } => out.push(Instr::new(offset, OP_INIT, Operand::U8(*locals))),
        NodeKind::Ret => out.push(Instr::new(offset, OP_RET, Operand::None)),
        NodeKind::ProcExclude => out.push(Instr::new(offset, OP_PROC_EXCLUDE, Operand::None)),
        NodeKind::SetInfo(info) => set_info(info, out)?,
        NodeKind::Push(d) => out.push(Instr::new(offset, push_opcode(d), push_operand(d))),
        NodeKind::Pop { at, target, value } => {
            node(value, out)?;
            out.push(Instr::new(*at, pop_opcode(*target), pop_operand(*target)));
        }
        NodeKind::BinOp { at, op, lhs, rhs } => {
            node(lhs, out)?;
            node(rhs, out)?;
            out.push(Instr::new(*at, op.opcode(), Operand::None));
        }
        NodeKind::Not { at, value } => {
            node(value, out)?;
            out.push(Instr::new(*at, OP_NOT, Operand::None));
        }
        NodeKind::PushIndirect { at, size, ptr } => {
            node(ptr, out)?;
            out.push(Instr::new(*at, OP_PUSH_INDIRECT, Operand::U8(*size)));
        }
        NodeKind::Calli { at, arg_bytes, intrinsic, args } => {
            nodes(args, out)?;
            let operand = Operand::Calli { arg_bytes: *arg_bytes, intrinsic: *intrinsic };
            out.push(Instr::new(*at, OP_CALLI, operand));
        }
        NodeKind::RetVal { at, dword, call } => {
            node(call, out)?;
            let op = if *dword { OP_RETVAL_DWORD } else { OP_RETVAL_WORD };
            out.push(Instr::new(*at, op, Operand::None));
        }
        NodeKind::Jmp { target } => {
            out.push(Instr::new(offset, OP_JMP, Operand::Jump(rel(offset, 3, *target)?)));
        }
        NodeKind::If(i) => {
            if let Some(cond) = &i.cond {
                node(cond, out)?;
            }
            out.push(Instr::new(i.at, i.opcode(), Operand::Jump(rel(i.at, 3, i.target)?)));
            nodes(&i.body, out)?;
        }
        NodeKind::LoopScript { token } => out.push(Instr::new(offset, OP_LOOPSCR, Operand::U8(*token))),
        NodeKind::Loop(l) => {
            for t in &l.script {
                out.push(Instr::new(t.offset, OP_LOOPSCR, Operand::U8(t.token)));
            }
            let operand = Operand::Loop { slot: l.slot, str_size: l.str_size, search_type: l.search_type };
            out.push(Instr::new(l.at, OP_LOOP, operand));
            nodes(&l.body, out)?;
            loop_next(offset, l.next_offset, out)?;
        }
        NodeKind::Foreach(f) => {
            node(&f.list, out)?;
            let operand = Operand::Foreach { slot: f.slot, elem_size: f.elem_size, rel: rel(f.at, 5, f.target)? };
            out.push(Instr::new(f.at, f.opcode(), operand));
            nodes(&f.body, out)?;
            loop_next(offset, f.next_offset, out)?;
        }
        NodeKind::Switch(s) => nodes(&s.originals, out)?,
        NodeKind::Function(_) => {
            return Err(DeucError::UnexpectedMarker { opcode: SYNTH_FUNCTION, offset });
        }
    }
    Ok(())
}
