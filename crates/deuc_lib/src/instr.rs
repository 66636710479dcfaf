use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DeucError;

pub const OP_POP_BYTE: u8 = 0x00;
pub const OP_POP_WORD: u8 = 0x01;
pub const OP_POP_DWORD: u8 = 0x02;
pub const OP_PUSH_BYTE: u8 = 0x0A;
pub const OP_PUSH_WORD: u8 = 0x0B;
pub const OP_PUSH_DWORD: u8 = 0x0C;
pub const OP_PUSH_STRING: u8 = 0x0D;
pub const OP_CALLI: u8 = 0x0F;
pub const OP_POP_TEMP: u8 = 0x12;
pub const OP_ADD: u8 = 0x14;
pub const OP_SUB: u8 = 0x1C;
pub const OP_MUL: u8 = 0x1E;
pub const OP_DIV: u8 = 0x20;
pub const OP_MOD: u8 = 0x22;
pub const OP_CMP: u8 = 0x24;
pub const OP_LT: u8 = 0x28;
pub const OP_LE: u8 = 0x2A;
pub const OP_GT: u8 = 0x2C;
pub const OP_GE: u8 = 0x2E;
pub const OP_NOT: u8 = 0x30;
pub const OP_AND: u8 = 0x32;
pub const OP_OR: u8 = 0x34;
pub const OP_NE: u8 = 0x36;
pub const OP_PUSH_LOCAL_BYTE: u8 = 0x3E;
pub const OP_PUSH_LOCAL_WORD: u8 = 0x3F;
pub const OP_PUSH_LOCAL_DWORD: u8 = 0x40;
pub const OP_PUSH_INDIRECT: u8 = 0x4C;
pub const OP_PUSH_GLOBAL: u8 = 0x4E;
pub const OP_POP_GLOBAL: u8 = 0x4F;
pub const OP_RET: u8 = 0x50;
pub const OP_JNE: u8 = 0x51;
pub const OP_JMP: u8 = 0x52;
pub const OP_SUSPEND: u8 = 0x53;
pub const OP_INIT: u8 = 0x5A;
pub const OP_LINE_NUMBER: u8 = 0x5B;
pub const OP_SYMBOL_INFO: u8 = 0x5C;
pub const OP_RETVAL_WORD: u8 = 0x5E;
pub const OP_RETVAL_DWORD: u8 = 0x5F;
pub const OP_LOOP: u8 = 0x70;
pub const OP_LOOPNEXT: u8 = 0x73;
pub const OP_LOOPSCR: u8 = 0x74;
pub const OP_FOREACH_LIST: u8 = 0x75;
pub const OP_FOREACH_SLIST: u8 = 0x76;
pub const OP_SET_INFO: u8 = 0x77;
pub const OP_PROC_EXCLUDE: u8 = 0x78;
pub const OP_END: u8 = 0x7A;

pub const SYMBOL_NAME_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Slot(i8),
    Byte(i8),
    Word(i16),
    Dword(u32),
    Str(Vec<u8>),
    U8(u8),
    U16(u16),
    Calli { arg_bytes: u8, intrinsic: u16 },
    Global { offset: u16, size: u8 },
    Jump(i16),
    SymbolInfo { rel: u16, name: [u8; SYMBOL_NAME_LEN] },
    Loop { slot: i8, str_size: u8, search_type: u8 },
    Foreach { slot: i8, elem_size: u8, rel: i16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub offset: u32,
    pub opcode: u8,
    pub operand: Operand,
}

impl Instr {
    pub fn new(offset: u32, opcode: u8, operand: Operand) -> Self {
        Self { offset, opcode, operand }
    }

    pub fn size(&self) -> u32 {
        let operands = match &self.operand {
            Operand::None => 0,
            Operand::Slot(_) | Operand::Byte(_) | Operand::U8(_) => 1,
            Operand::Word(_) | Operand::U16(_) | Operand::Jump(_) => 2,
            Operand::Calli { .. } | Operand::Global { .. } | Operand::Loop { .. } => 3,
            Operand::Dword(_) | Operand::Foreach { .. } => 4,
            Operand::Str(s) => 2 + s.len() as u32,
            Operand::SymbolInfo { .. } => 2 + SYMBOL_NAME_LEN as u32,
        };
        1 + operands
    }

    pub fn jump_target(&self) -> Option<u32> {
        let rel = match self.operand {
            Operand::Jump(rel) | Operand::Foreach { rel, .. } => rel,
            _ => return None,
        };
        let t = self.offset as i64 + self.size() as i64 + rel as i64;
        u32::try_from(t).ok()
    }

    pub fn mnemonic(&self) -> &'static str {
        mnemonic(self.opcode)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        match &self.operand {
            Operand::None => {}
            Operand::Slot(v) | Operand::Byte(v) => out.push(*v as u8),
            Operand::U8(v) => out.push(*v),
            Operand::Word(v) => put_u16(out, *v as u16),
            Operand::U16(v) => put_u16(out, *v),
            Operand::Jump(rel) => put_u16(out, *rel as u16),
            Operand::Dword(v) => put_u32(out, *v),
            Operand::Str(s) => {
                put_u16(out, s.len() as u16);
                out.extend_from_slice(s);
            }
            Operand::Calli { arg_bytes, intrinsic } => {
                out.push(*arg_bytes);
                put_u16(out, *intrinsic);
            }
            Operand::Global { offset, size } => {
                put_u16(out, *offset);
                out.push(*size);
            }
            Operand::SymbolInfo { rel, name } => {
                put_u16(out, *rel);
                out.extend_from_slice(name);
            }
            Operand::Loop { slot, str_size, search_type } => {
                out.push(*slot as u8);
                out.push(*str_size);
                out.push(*search_type);
            }
            Operand::Foreach { slot, elem_size, rel } => {
                out.push(*slot as u8);
                out.push(*elem_size);
                put_u16(out, *rel as u16);
            }
        }
    }
}

pub fn mnemonic(opcode: u8) -> &'static str {
    match opcode {
        OP_POP_BYTE => "pop byte",
        OP_POP_WORD => "pop",
        OP_POP_DWORD => "pop dword",
        OP_PUSH_BYTE => "push byte",
        OP_PUSH_WORD => "push",
        OP_PUSH_DWORD => "push dword",
        OP_PUSH_STRING => "push string",
        OP_CALLI => "calli",
        OP_POP_TEMP => "pop temp",
        OP_ADD => "add",
        OP_SUB => "sub",
        OP_MUL => "mul",
        OP_DIV => "div",
        OP_MOD => "mod",
        OP_CMP => "cmp",
        OP_LT => "lt",
        OP_LE => "le",
        OP_GT => "gt",
        OP_GE => "ge",
        OP_NOT => "not",
        OP_AND => "and",
        OP_OR => "or",
        OP_NE => "ne",
        OP_PUSH_LOCAL_BYTE => "push byte",
        OP_PUSH_LOCAL_WORD => "push",
        OP_PUSH_LOCAL_DWORD => "push dword",
        OP_PUSH_INDIRECT => "push indirect",
        OP_PUSH_GLOBAL => "push global",
        OP_POP_GLOBAL => "pop global",
        OP_RET => "ret",
        OP_JNE => "jne",
        OP_JMP => "jmp",
        OP_SUSPEND => "suspend",
        OP_INIT => "init",
        OP_LINE_NUMBER => "line number",
        OP_SYMBOL_INFO => "symbol info",
        OP_RETVAL_WORD => "push retval",
        OP_RETVAL_DWORD => "push dword retval",
        OP_LOOP => "loop",
        OP_LOOPNEXT => "loopnext",
        OP_LOOPSCR => "loopscr",
        OP_FOREACH_LIST => "foreach list",
        OP_FOREACH_SLIST => "foreach slist",
        OP_SET_INFO => "set info",
        OP_PROC_EXCLUDE => "process exclude",
        OP_END => "end",
        _ => "???",
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    let mut b = [0u8; 2];
    LittleEndian::write_u16(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, DeucError> {
        if self.remaining() < 1 {
            return Err(DeucError::Eof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn get_i8(&mut self) -> Result<i8, DeucError> {
        Ok(self.get_u8()? as i8)
    }

    pub(crate) fn get_u16(&mut self) -> Result<u16, DeucError> {
        if self.remaining() < 2 {
            return Err(DeucError::Eof);
        }
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, DeucError> {
        if self.remaining() < 4 {
            return Err(DeucError::Eof);
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DeucError> {
        if self.remaining() < n {
            return Err(DeucError::Eof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

fn read_operand(opcode: u8, r: &mut Reader<'_>) -> Result<Option<Operand>, DeucError> {
    let operand = match opcode {
        OP_POP_BYTE | OP_POP_WORD | OP_POP_DWORD | OP_PUSH_LOCAL_BYTE | OP_PUSH_LOCAL_WORD
        | OP_PUSH_LOCAL_DWORD => Operand::Slot(r.get_i8()?),
        OP_PUSH_BYTE => Operand::Byte(r.get_i8()?),
        OP_PUSH_WORD => Operand::Word(r.get_u16()? as i16),
        OP_PUSH_DWORD => Operand::Dword(r.get_u32()?),
        OP_PUSH_STRING => {
            let len = r.get_u16()? as usize;
            Operand::Str(r.get_bytes(len)?.to_vec())
        }
        OP_CALLI => {
            let arg_bytes = r.get_u8()?;
            let intrinsic = r.get_u16()?;
            Operand::Calli { arg_bytes, intrinsic }
        }
        OP_PUSH_GLOBAL | OP_POP_GLOBAL => {
            let offset = r.get_u16()?;
            let size = r.get_u8()?;
            Operand::Global { offset, size }
        }
        OP_PUSH_INDIRECT | OP_INIT | OP_LOOPSCR => Operand::U8(r.get_u8()?),
        OP_LINE_NUMBER => Operand::U16(r.get_u16()?),
        OP_JNE | OP_JMP => Operand::Jump(r.get_u16()? as i16),
        OP_SYMBOL_INFO => {
            let rel = r.get_u16()?;
            let mut name = [0u8; SYMBOL_NAME_LEN];
            name.copy_from_slice(r.get_bytes(SYMBOL_NAME_LEN)?);
            Operand::SymbolInfo { rel, name }
        }
        OP_LOOP => {
            let slot = r.get_i8()?;
            let str_size = r.get_u8()?;
            let search_type = r.get_u8()?;
            Operand::Loop { slot, str_size, search_type }
        }
        OP_FOREACH_LIST | OP_FOREACH_SLIST => {
            let slot = r.get_i8()?;
            let elem_size = r.get_u8()?;
            let rel = r.get_u16()? as i16;
            Operand::Foreach { slot, elem_size, rel }
        }
        OP_POP_TEMP | OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_CMP | OP_LT | OP_LE | OP_GT
        | OP_GE | OP_NOT | OP_AND | OP_OR | OP_NE | OP_RET | OP_SUSPEND | OP_RETVAL_WORD
        | OP_RETVAL_DWORD | OP_LOOPNEXT | OP_SET_INFO | OP_PROC_EXCLUDE | OP_END => Operand::None,
        _ => return Ok(None),
    };
    Ok(Some(operand))
}

fn decode_one(r: &mut Reader<'_>) -> Result<Instr, DeucError> {
    let offset = r.pos() as u32;
    let opcode = r.get_u8()?;
    let operand = match read_operand(opcode, r) {
        Ok(Some(operand)) => operand,
        Ok(None) => return Err(DeucError::InvalidOpcode { offset, opcode }),
        Err(DeucError::Eof) => return Err(DeucError::TruncatedOpcode { offset, opcode }),
        Err(e) => return Err(e),
    };
    let ins = Instr { offset, opcode, operand };
    if matches!(ins.operand, Operand::Jump(_) | Operand::Foreach { .. }) && ins.jump_target().is_none() {
        return Err(DeucError::InvalidJump { offset });
    }
    Ok(ins)
}

/// Decodes a code stream into instructions. Offsets are relative to the start of `code`.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instr>, DeucError> {
    let mut r = Reader::new(code);
    let mut out = Vec::new();
    while r.remaining() > 0 {
        out.push(decode_one(&mut r)?);
    }
    Ok(out)
}

#[derive(Debug)]
pub struct FunctionRun {
    pub start: u32,
    pub range: Range<usize>,
    pub instrs: Result<Vec<Instr>, DeucError>,
}

fn resume_point(code: &[u8], known_starts: &[u32], after: usize) -> usize {
    let known = known_starts.iter().map(|&p| p as usize).filter(|&p| p > after && p < code.len()).min();
    known
        .or_else(|| code.get(after + 1..)?.iter().position(|&b| b == OP_INIT).map(|i| after + 1 + i))
        .unwrap_or(code.len())
}

/// Decodes a code stream function by function. A function that fails to decode
/// is skipped up to the next entry of `known_starts` (the event table), or to
/// the next init opcode when no entry lies ahead. Trailing instructions after
/// the last end marker form a final, unterminated run.
pub fn decode_functions(code: &[u8], known_starts: &[u32]) -> Vec<FunctionRun> {
    let mut runs = Vec::new();
    let mut r = Reader::new(code);
    while r.remaining() > 0 {
        let start = r.pos();
        let mut instrs = Vec::new();
        let mut failed = None;
        while r.remaining() > 0 {
            let at = r.pos();
            match decode_one(&mut r) {
                Ok(ins) => {
                    let is_end = ins.opcode == OP_END;
                    instrs.push(ins);
                    if is_end {
                        break;
                    }
                }
                Err(e) => {
                    failed = Some((at, e));
                    break;
                }
            }
        }
        let instrs = match failed {
            None => Ok(instrs),
            Some((at, e)) => {
                let resume = resume_point(code, known_starts, at);
                debug!(start, failed_at = at, resume, "skipping undecodable function");
                r.seek(resume);
                Err(e)
            }
        };
        runs.push(FunctionRun { start: start as u32, range: start..r.pos(), instrs });
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_operands_little_endian() {
        let code = [OP_INIT, 0x04, OP_PUSH_WORD, 0xF0, 0x00, OP_PUSH_DWORD, 0x78, 0x56, 0x34, 0x12];
        let instrs = decode_instructions(&code).unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[0].operand, Operand::U8(4));
        assert_eq!(instrs[1].offset, 2);
        assert_eq!(instrs[1].operand, Operand::Word(0xF0));
        assert_eq!(instrs[2].operand, Operand::Dword(0x1234_5678));
    }

    #[test]
    fn jump_targets_are_relative_to_the_next_instruction() {
        let code = [OP_PUSH_BYTE, 1, OP_JNE, 0x02, 0x00];
        let instrs = decode_instructions(&code).unwrap();
        assert_eq!(instrs[1].jump_target(), Some(2 + 3 + 2));

        let back = Instr::new(10, OP_JMP, Operand::Jump(-13));
        assert_eq!(back.jump_target(), Some(0));
    }

    #[test]
    fn rejects_unknown_and_truncated_opcodes() {
        assert!(matches!(
            decode_instructions(&[OP_RET, 0xFE]),
            Err(DeucError::InvalidOpcode { offset: 1, opcode: 0xFE })
        ));
        assert!(matches!(
            decode_instructions(&[OP_PUSH_WORD, 0x01]),
            Err(DeucError::TruncatedOpcode { offset: 0, opcode: OP_PUSH_WORD })
        ));
        assert!(matches!(decode_instructions(&[OP_JMP, 0xF0, 0xFF]), Err(DeucError::InvalidJump { offset: 0 })));
    }

    #[test]
    fn encode_inverts_decode() {
        let code = [
            OP_SYMBOL_INFO, 0x10, 0x00, b'A', b'V', b'A', b'T', b'A', b'R', 0, 0, 0,
            OP_PUSH_STRING, 0x02, 0x00, b'h', b'i',
            OP_CALLI, 0x02, 0x01, 0x00,
            OP_FOREACH_SLIST, 0xFE, 0x02, 0x10, 0x00,
        ];
        let instrs = decode_instructions(&code).unwrap();
        let mut out = Vec::new();
        for ins in &instrs {
            assert_eq!(ins.size() as usize, {
                let before = out.len();
                ins.encode(&mut out);
                out.len() - before
            });
        }
        assert_eq!(out, code);
    }

    #[test]
    fn splits_after_each_end_marker() {
        let code = [OP_INIT, 0, OP_RET, OP_END, OP_INIT, 0, OP_RET, OP_END, OP_INIT, 0];
        let runs = decode_functions(&code, &[]);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].start, 4);
        assert_eq!(runs[1].range, 4..8);
        assert_eq!(runs[2].instrs.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn undecodable_function_resumes_at_next_init() {
        let code = [OP_INIT, 0, 0x65, 0x02, OP_RET, OP_END, OP_INIT, 0, OP_RET, OP_END];
        let runs = decode_functions(&code, &[]);
        assert_eq!(runs.len(), 2);
        assert!(matches!(runs[0].instrs, Err(DeucError::InvalidOpcode { offset: 2, opcode: 0x65 })));
        assert_eq!(runs[0].range, 0..6);
        assert_eq!(runs[1].start, 6);
        assert_eq!(runs[1].instrs.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn undecodable_function_prefers_known_starts() {
        // the 0x5A operand byte would be mistaken for an init without the event entry
        let code = [OP_INIT, 0, 0x65, OP_INIT, OP_RET, OP_END, OP_INIT, 0, OP_RET, OP_END];
        let runs = decode_functions(&code, &[0, 6, 0xFFFF]);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].instrs.is_err());
        assert_eq!(runs[1].start, 6);
        assert!(runs[1].instrs.is_ok());
    }
}
