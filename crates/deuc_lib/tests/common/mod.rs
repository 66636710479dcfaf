#![allow(dead_code)]

use deuc_lib::instr::*;

/// Builds usecode byte streams with forward jumps patched in place.
#[derive(Default)]
pub struct Code {
    pub bytes: Vec<u8>,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn raw(&mut self, b: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(b);
        self
    }

    /// init, set info (process type, this pointer) and optionally process exclude.
    pub fn prologue(&mut self, locals: u8, process_type: u16, procexclude: bool) -> &mut Self {
        let pt = process_type.to_le_bytes();
        self.raw(&[OP_INIT, locals, OP_PUSH_WORD, pt[0], pt[1], OP_PUSH_LOCAL_DWORD, 0x06, OP_PUSH_INDIRECT, 0x04, OP_SET_INFO]);
        if procexclude {
            self.raw(&[OP_PROC_EXCLUDE]);
        }
        self
    }

    pub fn epilogue(&mut self) -> &mut Self {
        self.raw(&[OP_RET, OP_END])
    }

    pub fn push_byte(&mut self, v: i8) -> &mut Self {
        self.raw(&[OP_PUSH_BYTE, v as u8])
    }

    pub fn push_local(&mut self, slot: i8) -> &mut Self {
        self.raw(&[OP_PUSH_LOCAL_WORD, slot as u8])
    }

    pub fn suspend(&mut self) -> &mut Self {
        self.raw(&[OP_SUSPEND])
    }

    /// Emits a jump with a placeholder displacement and returns its position.
    pub fn jump(&mut self, op: u8) -> usize {
        let at = self.bytes.len();
        self.raw(&[op, 0, 0]);
        at
    }

    /// Points the jump emitted at `at` to the current position.
    pub fn land(&mut self, at: usize) -> &mut Self {
        let rel = (self.bytes.len() as i64 - (at as i64 + 3)) as i16;
        let b = rel.to_le_bytes();
        self.bytes[at + 1] = b[0];
        self.bytes[at + 2] = b[1];
        self
    }

    /// Emits a foreach header with a placeholder target and returns its position.
    pub fn foreach(&mut self, op: u8, slot: i8, elem_size: u8) -> usize {
        let at = self.bytes.len();
        self.raw(&[op, slot as u8, elem_size, 0, 0]);
        at
    }

    pub fn land_foreach(&mut self, at: usize) -> &mut Self {
        let rel = (self.bytes.len() as i64 - (at as i64 + 5)) as i16;
        let b = rel.to_le_bytes();
        self.bytes[at + 3] = b[0];
        self.bytes[at + 4] = b[1];
        self
    }

    /// `if (local == value) { body }`, returning the position of a trailing jmp when `jump_out` is set.
    pub fn eq_if(&mut self, slot: i8, value: i8, jump_out: bool, body: impl FnOnce(&mut Code)) -> Option<usize> {
        self.push_local(slot).push_byte(value).raw(&[OP_CMP]);
        let jne = self.jump(OP_JNE);
        body(self);
        let out = jump_out.then(|| self.jump(OP_JMP));
        self.land(jne);
        out
    }
}

/// Wraps code in a class record: 12 byte header and the 32 entry event table.
pub fn class_record(code: &[u8], events: &[(usize, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(0u32.to_le_bytes());
    out.extend((12 + 128 + code.len() as u32).to_le_bytes());
    out.extend(0u32.to_le_bytes());
    let mut table = [0xFFFFu32; 32];
    for (slot, offset) in events {
        table[*slot] = *offset;
    }
    for offset in table {
        out.extend(offset.to_le_bytes());
    }
    out.extend_from_slice(code);
    out
}
