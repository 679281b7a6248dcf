use std::fmt::{Display, Formatter};

use tracing::{debug, trace};

use crate::elf::Width;
use crate::error::{Error, Result};
use crate::stream::ByteStream;

// Standard opcodes
const DW_LNS_COPY: u8 = 1;
const DW_LNS_ADVANCE_PC: u8 = 2;
const DW_LNS_ADVANCE_LINE: u8 = 3;
const DW_LNS_SET_FILE: u8 = 4;
const DW_LNS_SET_COLUMN: u8 = 5;
const DW_LNS_NEGATE_STMT: u8 = 6;
const DW_LNS_SET_BASIC_BLOCK: u8 = 7;
const DW_LNS_CONST_ADD_PC: u8 = 8;
const DW_LNS_FIXED_ADVANCE_PC: u8 = 9;
const DW_LNS_SET_EPILOGUE_BEGIN: u8 = 11;

// Extended opcodes, introduced by a zero opcode byte
const DW_LNE_END_SEQUENCE: u8 = 1;
const DW_LNE_SET_ADDRESS: u8 = 2;
const DW_LNE_SET_DISCRIMINATOR: u8 = 4;

/// An entry of the file name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry<'a> {
    pub name: &'a str,
    pub dir_index: u64,
    pub mtime: u64,
    pub size: u64,
}

/// One `.debug_line` unit: the parsed header plus the program bytes.
///
/// Only DWARF 3 units are accepted. The columns this tool does not dump
/// (`column`, `is_stmt`, and friends) are decoded syntactically and
/// dropped.
pub struct LineUnit<'a> {
    pub unit_length: u32,
    pub version: u16,
    pub header_length: u32,
    pub minimum_instruction_length: u8,
    pub default_is_stmt: u8,
    pub line_base: i8,
    pub line_range: u8,
    pub opcode_base: u8,
    pub standard_opcode_lengths: Vec<u8>,
    pub include_directories: Vec<&'a str>,
    pub file_names: Vec<FileEntry<'a>>,
    program: &'a [u8],
    program_limit: usize,
}

impl<'a> LineUnit<'a> {
    /// Parses the unit at the start of a `.debug_line` section occurrence.
    pub fn parse(bytes: &'a [u8]) -> Result<LineUnit<'a>> {
        let mut stream = ByteStream::new(bytes);

        let unit_length = stream.read_u32()?;
        if unit_length as usize >= bytes.len() {
            return Err(Error::Structural(format!("wrong unit_length {}", unit_length)));
        }
        let version = stream.read_u16()?;
        if version != 3 {
            return Err(Error::UnsupportedVersion(version));
        }
        let header_length = stream.read_u32()?;
        if header_length > unit_length {
            return Err(Error::Structural(format!(
                "header_length {} larger than unit_length {}", header_length, unit_length
            )));
        }
        let minimum_instruction_length = stream.read_u8()?;
        let default_is_stmt = stream.read_u8()?;
        let line_base = stream.read_i8()?;
        let line_range = stream.read_u8()?;
        if line_range == 0 {
            return Err(Error::Structural("line_range must be larger than 0".into()));
        }
        let opcode_base = stream.read_u8()?;
        if opcode_base == 0 {
            return Err(Error::Structural("opcode_base must be larger than 0".into()));
        }

        let mut standard_opcode_lengths = Vec::with_capacity(opcode_base as usize - 1);
        for _ in 1..opcode_base {
            standard_opcode_lengths.push(stream.read_u8()?);
        }

        let include_directories = stream.read_string_table()?;

        let mut file_names = vec![];
        loop {
            let name = stream.read_cstr()?;
            if name.is_empty() {
                break;
            }
            let dir_index = stream.read_leb128(false, 64)?;
            let mtime = stream.read_leb128(false, 64)?;
            let size = stream.read_leb128(false, 64)?;
            file_names.push(FileEntry { name, dir_index, mtime, size });
        }

        debug!(unit_length, files = file_names.len(), "line number program");

        let program_start = stream.offset();
        // The executed range ends one byte short of the unit; that is what
        // the producer this dump was built against emits.
        let program_limit = (unit_length as usize + 3).saturating_sub(program_start);
        let program = &bytes[program_start..];

        Ok(LineUnit {
            unit_length,
            version,
            header_length,
            minimum_instruction_length,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
            include_directories,
            file_names,
            program,
            program_limit,
        })
    }

    /// Runs the line number program, yielding one step per opcode.
    pub fn execute<'u>(&'u self, width: Width) -> LineProgram<'u, 'a> {
        LineProgram {
            unit: self,
            stream: ByteStream::new(self.program),
            limit: self.program_limit.min(self.program.len()),
            width,
            regs: Registers::initial(),
            done: false,
        }
    }
}

impl Display for LineUnit<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "unit_length: {:#x}, version: {}, header_length: {:#x}",
            self.unit_length, self.version, self.header_length
        )?;
        writeln!(
            f,
            "minimum_instruction_length: {}, default_is_stmt: {}, line_base: {}, line_range: {}, opcode_base: {}",
            self.minimum_instruction_length,
            self.default_is_stmt,
            self.line_base,
            self.line_range,
            self.opcode_base
        )?;
        writeln!(f, "include directories:")?;
        for dir in &self.include_directories {
            writeln!(f, "\t{}", dir)?;
        }
        writeln!(f, "file name table:")?;
        for (i, file) in self.file_names.iter().enumerate() {
            writeln!(
                f,
                "\t{}\t{}\t{}\t{}\t{}",
                i + 1, file.dir_index, file.mtime, file.size, file.name
            )?;
        }
        if let Some(first) = self.file_names.first() {
            writeln!(f, "start with file 1 {}", first.name)?;
        }
        Ok(())
    }
}

/// The line machine registers this tool keeps. `file` is 1-based into the
/// unit's file name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub address: u64,
    pub file: u64,
    pub line: i32,
}

impl Registers {
    fn initial() -> Registers {
        Registers { address: 0, file: 1, line: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind<'a> {
    Special(u8),
    Copy,
    AdvancePc(u64),
    AdvanceLine(i32),
    SetFile { index: u64, name: &'a str },
    SetColumn(u64),
    NegateStmt,
    SetBasicBlock,
    ConstAddPc,
    FixedAdvancePc(u16),
    SetEpilogueBegin,
    EndSequence,
    SetAddress(u64),
    SetDiscriminator(u64),
}

/// The increments applied after an opcode, when either was non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub address_increment: u64,
    pub line_increment: i32,
}

/// One executed opcode: what it was, what it advanced, and the register
/// state afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step<'a> {
    pub kind: StepKind<'a>,
    pub advance: Option<Advance>,
    pub registers: Registers,
}

impl Display for Step<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StepKind::Special(opcode) => write!(f, "special opcode {}", opcode)?,
            StepKind::Copy => write!(f, "DW_LNS_copy")?,
            StepKind::AdvancePc(n) => write!(f, "DW_LNS_advance_pc {}", n)?,
            StepKind::AdvanceLine(n) => write!(f, "DW_LNS_advance_line {}", n)?,
            StepKind::SetFile { index, name } =>
                write!(f, "DW_LNS_set_file {} ({})", index, name)?,
            StepKind::SetColumn(column) => write!(f, "DW_LNS_set_column {}", column)?,
            StepKind::NegateStmt => write!(f, "DW_LNS_negate_stmt")?,
            StepKind::SetBasicBlock => write!(f, "DW_LNS_set_basic_block")?,
            StepKind::ConstAddPc => write!(f, "DW_LNS_const_add_pc")?,
            StepKind::FixedAdvancePc(n) => write!(f, "DW_LNS_fixed_advance_pc {}", n)?,
            StepKind::SetEpilogueBegin => write!(f, "DW_LNS_set_epilogue_begin")?,
            StepKind::EndSequence => write!(f, "DW_LNE_end_sequence")?,
            StepKind::SetAddress(addr) => write!(f, "DW_LNE_set_address {:#x}", addr)?,
            StepKind::SetDiscriminator(d) => write!(f, "DW_LNE_set_discriminator {}", d)?,
        }
        if let Some(advance) = self.advance {
            write!(
                f,
                ": address += {} -> {:#x}, line += {} -> {}",
                advance.address_increment,
                self.registers.address,
                advance.line_increment,
                self.registers.line
            )?;
        }
        Ok(())
    }
}

/// Iterator that interprets the program bytes, one opcode per `next`.
pub struct LineProgram<'u, 'a> {
    unit: &'u LineUnit<'a>,
    stream: ByteStream<'a>,
    limit: usize,
    width: Width,
    regs: Registers,
    done: bool,
}

impl<'u, 'a> LineProgram<'u, 'a> {
    fn step(&mut self) -> Result<Step<'a>> {
        let opcode = self.stream.read_u8()?;
        let mut address_increment: u64 = 0;
        let mut line_increment: i32 = 0;

        let kind = if opcode >= self.unit.opcode_base {
            let adjusted = opcode - self.unit.opcode_base;
            address_increment = u64::from(adjusted / self.unit.line_range)
                * u64::from(self.unit.minimum_instruction_length);
            line_increment =
                i32::from(self.unit.line_base) + i32::from(adjusted % self.unit.line_range);
            StepKind::Special(opcode)
        } else if opcode > 0 {
            match opcode {
                DW_LNS_COPY => StepKind::Copy,
                DW_LNS_ADVANCE_PC => {
                    let operand = self.stream.read_leb128(false, 64)?;
                    address_increment =
                        operand * u64::from(self.unit.minimum_instruction_length);
                    StepKind::AdvancePc(operand)
                }
                DW_LNS_ADVANCE_LINE => {
                    let operand = self.stream.read_leb128(true, 64)? as i64;
                    line_increment = operand as i32;
                    StepKind::AdvanceLine(line_increment)
                }
                DW_LNS_SET_FILE => {
                    let index = self.stream.read_leb128(false, 64)?;
                    if index < 1 || index > self.unit.file_names.len() as u64 {
                        return Err(Error::Structural(format!(
                            "file index {} outside the file name table", index
                        )));
                    }
                    self.regs.file = index;
                    // The table is 1-based; entry 1 sits at vector index 0.
                    let name = self.unit.file_names[index as usize - 1].name;
                    StepKind::SetFile { index, name }
                }
                DW_LNS_SET_COLUMN => {
                    let declared = self.unit.standard_opcode_lengths[opcode as usize - 1];
                    if declared != 1 {
                        return Err(Error::Structural(format!(
                            "DW_LNS_set_column declares {} operands, expected 1", declared
                        )));
                    }
                    StepKind::SetColumn(self.stream.read_leb128(false, 64)?)
                }
                DW_LNS_NEGATE_STMT => StepKind::NegateStmt,
                DW_LNS_SET_BASIC_BLOCK => StepKind::SetBasicBlock,
                DW_LNS_CONST_ADD_PC => {
                    address_increment =
                        u64::from((255 - self.unit.opcode_base) / self.unit.line_range)
                            * u64::from(self.unit.minimum_instruction_length);
                    StepKind::ConstAddPc
                }
                DW_LNS_FIXED_ADVANCE_PC => {
                    // The one standard operand that is not LEB128.
                    let operand = self.stream.read_u16()?;
                    address_increment = u64::from(operand);
                    StepKind::FixedAdvancePc(operand)
                }
                DW_LNS_SET_EPILOGUE_BEGIN => StepKind::SetEpilogueBegin,
                _ => return Err(Error::UnimplementedOpcode {
                    context: "standard line",
                    opcode,
                }),
            }
        } else {
            let declared_length = self.stream.read_leb128(false, 64)?;
            let sub_opcode = self.stream.read_u8()?;
            trace!(sub_opcode, declared_length, "extended opcode");
            match sub_opcode {
                DW_LNE_END_SEQUENCE => {
                    self.regs = Registers::initial();
                    StepKind::EndSequence
                }
                DW_LNE_SET_ADDRESS => {
                    let address = self.stream.read_address(self.width)?;
                    self.regs.address = address;
                    StepKind::SetAddress(address)
                }
                DW_LNE_SET_DISCRIMINATOR => {
                    StepKind::SetDiscriminator(self.stream.read_leb128(false, 64)?)
                }
                _ => return Err(Error::UnimplementedOpcode {
                    context: "extended line",
                    opcode: sub_opcode,
                }),
            }
        };

        let advance = if address_increment != 0 || line_increment != 0 {
            self.regs.address = self.regs.address.wrapping_add(address_increment);
            self.regs.line = self.regs.line.wrapping_add(line_increment);
            Some(Advance { address_increment, line_increment })
        } else {
            None
        };

        Ok(Step { kind, advance, registers: self.regs })
    }
}

impl<'u, 'a> Iterator for LineProgram<'u, 'a> {
    type Item = Result<Step<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.stream.offset() >= self.limit {
            return None;
        }
        let step = self.step();
        if step.is_err() {
            self.done = true;
        }
        Some(step)
    }
}
