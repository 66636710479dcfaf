use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Void,
    Word,
    Dword,
    Invalid,
}

impl Type {
    pub fn is_value(self) -> bool {
        matches!(self, Type::Word | Type::Dword)
    }

    /// Bytes a value of this type occupies on the usecode stack.
    pub fn stack_size(self) -> u32 {
        match self {
            Type::Word => 2,
            Type::Dword => 4,
            Type::Void | Type::Invalid => 0,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Word => write!(f, "word"),
            Type::Dword => write!(f, "dword"),
            Type::Invalid => write!(f, "invalid"),
        }
    }
}

/// What a push instruction places on the stack: an immediate or a variable slot.
///
/// Two pushes read the same variable exactly when their `DataType`s compare equal,
/// which is what the switch recognizer relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Byte(i8),
    Word(i16),
    Dword(u32),
    Str(Vec<u8>),
    LocalByte(i8),
    LocalWord(i8),
    LocalDword(i8),
    Global { offset: u16, size: u8 },
}

impl DataType {
    pub fn rtype(&self) -> Type {
        match self {
            DataType::Dword(_) | DataType::LocalDword(_) => Type::Dword,
            // bytes are sign extended to a full stack word
            DataType::Byte(_)
            | DataType::Word(_)
            | DataType::Str(_)
            | DataType::LocalByte(_)
            | DataType::LocalWord(_)
            | DataType::Global { .. } => Type::Word,
        }
    }

    pub fn is_slot(&self) -> bool {
        matches!(
            self,
            DataType::LocalByte(_) | DataType::LocalWord(_) | DataType::LocalDword(_) | DataType::Global { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopTarget {
    LocalByte(i8),
    LocalWord(i8),
    LocalDword(i8),
    Global { offset: u16, size: u8 },
    Temp,
}

/// Name of a BP-relative slot: parameters live above BP, locals below.
pub fn slot_name(slot: i8) -> String {
    if slot < 0 {
        format!("var_{:02X}", slot.unsigned_abs())
    } else {
        format!("arg_{:02X}", slot)
    }
}

pub fn slot_asm(slot: i8) -> String {
    if slot < 0 {
        format!("[BP-{:02X}h]", slot.unsigned_abs())
    } else {
        format!("[BP+{:02X}h]", slot)
    }
}
