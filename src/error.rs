use std::fmt::{Display, Formatter};

/// Everything that can go wrong while decoding the debug sections.
///
/// All of these are fatal: the dump aborts on the first one. The
/// `Structural` variant covers the invariants a conforming DWARF producer
/// never violates (duplicate abbreviation codes, nesting underflow, file
/// indices outside the file table, and so on).
#[derive(Debug, PartialEq)]
pub enum Error {
    OutOfBounds { needed: usize, available: usize },
    MalformedLeb128,
    UnsupportedVersion(u16),
    UnknownChildrenFlag(u8),
    UnimplementedForm(u64),
    UnimplementedOpcode { context: &'static str, opcode: u8 },
    UnknownTag(u64),
    UnknownAttribute(u64),
    Structural(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::OutOfBounds { needed, available } =>
                write!(f, "read of {} bytes overruns the section, {} left", needed, available),
            Error::MalformedLeb128 =>
                write!(f, "malformed LEB128 integer (wrong padding)"),
            Error::UnsupportedVersion(version) =>
                write!(f, "unsupported .debug_line version {}, only DWARF 3 is handled", version),
            Error::UnknownChildrenFlag(flag) =>
                write!(f, "bad DW_CHILDREN value, {}", flag),
            Error::UnimplementedForm(form) =>
                write!(f, "attribute form {:#x} is not implemented", form),
            Error::UnimplementedOpcode { context, opcode } =>
                write!(f, "{} opcode {:#x} is not implemented", context, opcode),
            Error::UnknownTag(tag) =>
                write!(f, "bad DIE tag {:#x}", tag),
            Error::UnknownAttribute(name) =>
                write!(f, "bad attribute name {:#x}", name),
            Error::Structural(message) =>
                write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {}
