//! Request opcodes

/// Opcodes understood by the engine.
///
/// `SortRange` is the per-shard leg of a sorted multi-get and lives in the
/// vendor range of the opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Flush = 0x08,
    GetQ = 0x09,
    NoOp = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    SortRange = 0xd0,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let opcode = match value {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x05 => Opcode::Increment,
            0x06 => Opcode::Decrement,
            0x08 => Opcode::Flush,
            0x09 => Opcode::GetQ,
            0x0a => Opcode::NoOp,
            0x0b => Opcode::Version,
            0x0c => Opcode::GetK,
            0x0d => Opcode::GetKQ,
            0x0e => Opcode::Append,
            0x0f => Opcode::Prepend,
            0x11 => Opcode::SetQ,
            0x12 => Opcode::AddQ,
            0x13 => Opcode::ReplaceQ,
            0x20 => Opcode::SaslListMechs,
            0x21 => Opcode::SaslAuth,
            0x22 => Opcode::SaslStep,
            0xd0 => Opcode::SortRange,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Quiet counterpart used inside pipelined batches, if one exists.
    pub fn quiet(self) -> Option<Self> {
        match self {
            Opcode::Get | Opcode::GetK | Opcode::GetQ | Opcode::GetKQ => Some(Opcode::GetKQ),
            Opcode::Set | Opcode::SetQ => Some(Opcode::SetQ),
            Opcode::Add | Opcode::AddQ => Some(Opcode::AddQ),
            Opcode::Replace | Opcode::ReplaceQ => Some(Opcode::ReplaceQ),
            _ => None,
        }
    }

    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Opcode::GetQ | Opcode::GetKQ | Opcode::SetQ | Opcode::AddQ | Opcode::ReplaceQ
        )
    }
}
