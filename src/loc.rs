use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use tracing::trace;

use crate::error::{Error, Result};
use crate::stream::ByteStream;

const DW_OP_REG0: u8 = 0x50;
const DW_OP_REG31: u8 = 0x6f;
const DW_OP_REGX: u8 = 0x90;
const DW_OP_FBREG: u8 = 0x91;
const DW_OP_GNU_ENTRY_VALUE: u8 = 0xf3;

/// One decoded DWARF expression operation. Only the opcodes a compiler
/// emits for simple variable locations are decoded; everything else is
/// rejected as unimplemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocOp {
    /// `DW_OP_fbreg`: signed offset from the frame base.
    FrameOffset(i64),
    /// `DW_OP_reg0` .. `DW_OP_reg31`: the value lives in a register.
    Reg(u8),
    /// `DW_OP_regx`: register named by an operand.
    RegX(u64),
    /// `DW_OP_GNU_entry_value`: a sub-expression evaluated in the state the
    /// function was entered with.
    EntryValue(LocExpr),
}

impl LocOp {
    fn decode(stream: &mut ByteStream<'_>) -> Result<LocOp> {
        let opcode = stream.read_u8()?;
        match opcode {
            DW_OP_FBREG => {
                let offset = stream.read_leb128(true, 64)? as i64;
                Ok(LocOp::FrameOffset(offset))
            }
            DW_OP_REG0..=DW_OP_REG31 => Ok(LocOp::Reg(opcode - DW_OP_REG0)),
            DW_OP_REGX => Ok(LocOp::RegX(stream.read_leb128(false, 64)?)),
            DW_OP_GNU_ENTRY_VALUE => {
                let length = stream.read_leb128(false, 64)? as usize;
                let nested = stream.read_bytes(length)?;
                Ok(LocOp::EntryValue(LocExpr::decode(nested)?))
            }
            _ => Err(Error::UnimplementedOpcode { context: "DWARF expression", opcode }),
        }
    }
}

impl Display for LocOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LocOp::FrameOffset(offset) => write!(f, "({} {})", op_str(DW_OP_FBREG), offset),
            LocOp::Reg(reg) => write!(f, "({})", op_str(DW_OP_REG0 + reg)),
            LocOp::RegX(reg) => write!(f, "({} {})", op_str(DW_OP_REGX), reg),
            LocOp::EntryValue(expr) => write!(f, "({}: {})", op_str(DW_OP_GNU_ENTRY_VALUE), expr),
        }
    }
}

fn op_str(opcode: u8) -> Cow<'static, str> {
    opcode_name(opcode).unwrap_or_else(|| Cow::Owned(format!("DW_OP_{:#04x}", opcode)))
}

/// A decoded DWARF location expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocExpr {
    pub ops: Vec<LocOp>,
}

impl LocExpr {
    /// Decodes `bytes` as a complete expression stream; the whole slice
    /// must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<LocExpr> {
        let mut stream = ByteStream::new(bytes);
        let mut ops = Vec::new();
        while !stream.reached_end() {
            ops.push(LocOp::decode(&mut stream)?);
        }
        Ok(LocExpr { ops })
    }
}

impl Display for LocExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", op)?;
        }
        Ok(())
    }
}

/// One `.debug_loc` entry: a pc range and the expression that locates the
/// variable while the pc is inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocEntry {
    pub start_pc: u64,
    pub end_pc: u64,
    pub expr: LocExpr,
}

impl Display for LocEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#x}, {:#x}): {}", self.start_pc, self.end_pc, self.expr)
    }
}

/// The `.debug_loc` section, read lazily: attributes hand us an offset and
/// we decode the location list found there.
pub struct DebugLoc<'a> {
    bytes: &'a [u8],
}

impl<'a> DebugLoc<'a> {
    pub fn new(bytes: &'a [u8]) -> DebugLoc<'a> {
        DebugLoc { bytes }
    }

    /// Decodes the location list starting at `offset`: address pairs are
    /// read as u64 regardless of the ELF class, and a `(0, 0)` pair
    /// terminates the list.
    pub fn entries_at(&self, offset: usize) -> Result<Vec<LocEntry>> {
        if offset >= self.bytes.len() {
            return Err(Error::Structural(format!(
                "location list offset {:#x} outside .debug_loc", offset
            )));
        }
        let mut stream = ByteStream::new(&self.bytes[offset..]);
        let mut entries = Vec::new();
        loop {
            let start_pc = stream.read_u64()?;
            let end_pc = stream.read_u64()?;
            if start_pc == 0 && end_pc == 0 {
                break;
            }
            let length = stream.read_u16()? as usize;
            let expr = LocExpr::decode(stream.read_bytes(length)?)?;
            trace!(start_pc, end_pc, "location list entry");
            entries.push(LocEntry { start_pc, end_pc, expr });
        }
        Ok(entries)
    }
}

/// The DWARF spelling of an expression opcode, for dump output. The whole
/// v3 enumeration is recognized here even though only a few opcodes are
/// decoded.
pub fn opcode_name(opcode: u8) -> Option<Cow<'static, str>> {
    let fixed = match opcode {
        0x03 => "DW_OP_addr",
        0x06 => "DW_OP_deref",
        0x08 => "DW_OP_const1u",
        0x09 => "DW_OP_const1s",
        0x0a => "DW_OP_const2u",
        0x0b => "DW_OP_const2s",
        0x0c => "DW_OP_const4u",
        0x0d => "DW_OP_const4s",
        0x0e => "DW_OP_const8u",
        0x0f => "DW_OP_const8s",
        0x10 => "DW_OP_constu",
        0x11 => "DW_OP_consts",
        0x12 => "DW_OP_dup",
        0x13 => "DW_OP_drop",
        0x14 => "DW_OP_over",
        0x15 => "DW_OP_pick",
        0x16 => "DW_OP_swap",
        0x17 => "DW_OP_rot",
        0x18 => "DW_OP_xderef",
        0x19 => "DW_OP_abs",
        0x1a => "DW_OP_and",
        0x1b => "DW_OP_div",
        0x1c => "DW_OP_minus",
        0x1d => "DW_OP_mod",
        0x1e => "DW_OP_mul",
        0x1f => "DW_OP_neg",
        0x20 => "DW_OP_not",
        0x21 => "DW_OP_or",
        0x22 => "DW_OP_plus",
        0x23 => "DW_OP_plus_uconst",
        0x24 => "DW_OP_shl",
        0x25 => "DW_OP_shr",
        0x26 => "DW_OP_shra",
        0x27 => "DW_OP_xor",
        0x28 => "DW_OP_bra",
        0x29 => "DW_OP_eq",
        0x2a => "DW_OP_ge",
        0x2b => "DW_OP_gt",
        0x2c => "DW_OP_le",
        0x2d => "DW_OP_lt",
        0x2e => "DW_OP_ne",
        0x2f => "DW_OP_skip",
        DW_OP_REGX => "DW_OP_regx",
        DW_OP_FBREG => "DW_OP_fbreg",
        0x92 => "DW_OP_bregx",
        0x93 => "DW_OP_piece",
        0x94 => "DW_OP_deref_size",
        0x95 => "DW_OP_xderef_size",
        0x96 => "DW_OP_nop",
        0x97 => "DW_OP_push_object_address",
        0x98 => "DW_OP_call2",
        0x99 => "DW_OP_call4",
        0x9a => "DW_OP_call_ref",
        0x9b => "DW_OP_form_tls_address",
        0x9c => "DW_OP_call_frame_cfa",
        0x9d => "DW_OP_bit_piece",
        DW_OP_GNU_ENTRY_VALUE => "DW_OP_GNU_entry_value",
        _ => "",
    };
    if !fixed.is_empty() {
        return Some(Cow::Borrowed(fixed));
    }
    match opcode {
        0x30..=0x4f => Some(Cow::Owned(format!("DW_OP_lit{}", opcode - 0x30))),
        0x50..=0x6f => Some(Cow::Owned(format!("DW_OP_reg{}", opcode - DW_OP_REG0))),
        0x70..=0x8f => Some(Cow::Owned(format!("DW_OP_breg{}", opcode - 0x70))),
        _ => None,
    }
}
