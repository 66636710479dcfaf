//! Class record layout: a 12 byte header, the 32 entry event table, then code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DeucError;
use crate::instr::Reader;

pub const HEADER_SIZE: u32 = 12;
pub const EVENT_COUNT: usize = 32;
pub const EVENT_TABLE_SIZE: u32 = EVENT_COUNT as u32 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsecodeHeader {
    pub unknown1: u32,
    /// Size field minus the header itself: event table plus code.
    pub max_offset: u32,
    pub unknown2: u32,
}

impl UsecodeHeader {
    pub fn code_len(&self) -> u32 {
        self.max_offset.saturating_sub(EVENT_TABLE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    pub entries: Vec<u32>,
    by_offset: BTreeMap<u32, u32>,
}

impl EventTable {
    pub fn new(entries: Vec<u32>) -> Self {
        let mut by_offset = BTreeMap::new();
        // several slots may share an offset; the highest index wins
        for (i, offset) in entries.iter().enumerate() {
            by_offset.insert(*offset, i as u32);
        }
        Self { entries, by_offset }
    }

    pub fn event_at(&self, offset: u32) -> Option<u32> {
        self.by_offset.get(&offset).copied()
    }
}

#[derive(Debug, Clone)]
pub struct ClassRecord<'a> {
    pub header: UsecodeHeader,
    pub events: EventTable,
    pub code: &'a [u8],
}

fn read_header(r: &mut Reader<'_>) -> Result<UsecodeHeader, DeucError> {
    let unknown1 = r.get_u32()?;
    let size = r.get_u32()?;
    let unknown2 = r.get_u32()?;
    let max_offset = size.checked_sub(HEADER_SIZE).ok_or(DeucError::InvalidHeader { size })?;
    if max_offset < EVENT_TABLE_SIZE {
        return Err(DeucError::InvalidHeader { size });
    }
    Ok(UsecodeHeader { unknown1, max_offset, unknown2 })
}

fn read_events(r: &mut Reader<'_>) -> Result<EventTable, DeucError> {
    let mut entries = Vec::with_capacity(EVENT_COUNT);
    for _ in 0..EVENT_COUNT {
        entries.push(r.get_u32()?);
    }
    Ok(EventTable::new(entries))
}

/// Splits a class record into header, event table and code. Code offsets are
/// relative to the first byte after the event table.
pub fn read_class(bytes: &[u8]) -> Result<ClassRecord<'_>, DeucError> {
    let mut r = Reader::new(bytes);
    let header = read_header(&mut r).map_err(|e| match e {
        DeucError::Eof => DeucError::TruncatedClass { expected: HEADER_SIZE as usize, actual: bytes.len() },
        e => e,
    })?;
    let events = read_events(&mut r).map_err(|e| match e {
        DeucError::Eof => DeucError::TruncatedClass {
            expected: (HEADER_SIZE + EVENT_TABLE_SIZE) as usize,
            actual: bytes.len(),
        },
        e => e,
    })?;

    let code_len = header.code_len() as usize;
    let code = r.get_bytes(code_len).map_err(|_| DeucError::TruncatedClass {
        expected: r.pos() + code_len,
        actual: bytes.len(),
    })?;
    if r.remaining() > 0 {
        debug!(trailing = r.remaining(), "ignoring bytes past the class record");
    }
    Ok(ClassRecord { header, events, code })
}
