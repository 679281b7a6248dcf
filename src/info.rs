use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use tracing::{debug, trace};

use crate::abbrev::{AbbrevTable, AttrName, AttrSpec, Form, Tag};
use crate::elf::Width;
use crate::error::{Error, Result};
use crate::loc::{DebugLoc, LocEntry, LocExpr};
use crate::stream::ByteStream;

// Compilation unit header
#[derive(Debug, Clone, Copy)]
pub struct UnitHeader {
    pub unit_length: u32,
    pub version: u16,
    pub debug_abbrev_offset: u32,
    pub address_size: u8,
}

impl Display for UnitHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "length = {:#010x}, version = {:#06x}, abbr_offset = {:#010x}, address_size = {:#04x}",
            self.unit_length, self.version, self.debug_abbrev_offset, self.address_size)
    }
}

/// A decoded attribute value, ready for dumping.
///
/// Values that need other sections (`strp`, loclists) or a second pass
/// (type references) are resolved while the unit is walked, so printing
/// later is pure formatting.
#[derive(Debug, PartialEq)]
pub enum AttrValue<'a> {
    Str(&'a str),
    Data(u64),
    Addr(u64),
    Flag(u8),
    Ref(u64),
    TypeRef { offset: u32, resolved: Option<&'a str> },
    Expr(LocExpr),
    Block(&'a [u8]),
    LocList { offset: u32, entries: Vec<LocEntry> },
}

impl Display for AttrValue<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{}", s),
            AttrValue::Data(value) => write!(f, "{:#x}", value),
            AttrValue::Addr(addr) => write!(f, "{:#x}", addr),
            AttrValue::Flag(flag) => write!(f, "{:#x}", flag),
            AttrValue::Ref(offset) => write!(f, "{:#x}", offset),
            AttrValue::TypeRef { offset, resolved } => {
                write!(f, "{:#x}", offset)?;
                match resolved {
                    Some(name) if !name.is_empty() => write!(f, " ({})", name),
                    _ => Ok(()),
                }
            }
            AttrValue::Expr(expr) => write!(f, "{}", expr),
            AttrValue::Block(data) => {
                write!(f, "{:#x} bytes:", data.len())?;
                for byte in *data {
                    write!(f, " {:#x}", byte)?;
                }
                Ok(())
            }
            AttrValue::LocList { offset, entries } => {
                write!(f, "(.debug_loc+{:#x})", offset)?;
                for entry in entries {
                    write!(f, " {}", entry)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Attr<'a> {
    pub name: AttrName,
    pub form: Form,
    pub value: AttrValue<'a>,
}

/// One DIE in the unit's arena. `children` holds arena indices; index
/// order is depth-first pre-order, so the root is always index 0.
#[derive(Debug)]
pub struct Die<'a> {
    /// Byte offset of the DIE's abbreviation code within `.debug_info`.
    pub offset: usize,
    pub code: u64,
    pub tag: Tag,
    pub attrs: Vec<Attr<'a>>,
    pub children: Vec<u32>,
}

/// Per-DIE metadata kept during one unit walk, for resolving
/// `DW_AT_type` back-references.
struct DieRecord<'a> {
    tag: Tag,
    name: Option<&'a str>,
}

#[derive(Debug)]
pub struct CompileUnit<'a> {
    pub header: UnitHeader,
    pub dies: Vec<Die<'a>>,
}

/// The `.debug_info` decoder, configured once with the sections it may
/// need to consult while walking units.
pub struct DebugInfo<'a> {
    bytes: &'a [u8],
    width: Width,
    debug_str: Option<&'a [u8]>,
    debug_loc: Option<DebugLoc<'a>>,
}

impl<'a> DebugInfo<'a> {
    pub fn new(
        bytes: &'a [u8],
        width: Width,
        debug_str: Option<&'a [u8]>,
        debug_loc: Option<DebugLoc<'a>>,
    ) -> DebugInfo<'a> {
        DebugInfo { bytes, width, debug_str, debug_loc }
    }

    /// Walks every compilation unit in the section.
    pub fn parse_units(&self, abbrevs: &BTreeMap<usize, AbbrevTable>) -> Result<Vec<CompileUnit<'a>>> {
        let mut stream = ByteStream::new(self.bytes);
        let mut units = vec![];
        while !stream.reached_end() {
            units.push(self.parse_unit(&mut stream, abbrevs)?);
        }
        Ok(units)
    }

    fn parse_unit(
        &self,
        stream: &mut ByteStream<'a>,
        abbrevs: &BTreeMap<usize, AbbrevTable>,
    ) -> Result<CompileUnit<'a>> {
        let unit_length = stream.read_u32()?;
        let unit_start = stream.offset();
        let version = stream.read_u16()?;
        let debug_abbrev_offset = stream.read_u32()?;
        let address_size = stream.read_u8()?;
        let header = UnitHeader { unit_length, version, debug_abbrev_offset, address_size };
        debug!(unit_start, unit_length, version, "compilation unit");

        // version + abbrev offset + address size take 7 of the counted bytes.
        if (unit_length as usize) < 7 {
            return Err(Error::Structural(format!(
                "compilation unit length {} too small", unit_length
            )));
        }
        let unit_end = unit_start + unit_length as usize;
        if unit_end > self.bytes.len() {
            return Err(Error::Structural(format!(
                "compilation unit length {} overruns .debug_info", unit_length
            )));
        }
        let table = abbrevs.get(&(debug_abbrev_offset as usize)).ok_or_else(|| {
            Error::Structural(format!(
                "no abbreviation table at .debug_abbrev offset {:#x}", debug_abbrev_offset
            ))
        })?;

        let mut dies: Vec<Die<'a>> = vec![];
        let mut records: HashMap<usize, DieRecord<'a>> = HashMap::new();
        let mut parent_stack: Vec<u32> = vec![];
        let mut root_closed = false;

        while stream.offset() < unit_end {
            let die_offset = stream.offset();
            let code = stream.read_leb128(false, 64)?;
            if code == 0 {
                // A null entry closes the current nesting level. Exactly
                // one lands on an already-empty stack: the closer of the
                // unit's outermost sibling chain.
                if parent_stack.pop().is_none() {
                    if dies.is_empty() {
                        return Err(Error::Structural(
                            "DIE nesting closed before any DIE was read".into(),
                        ));
                    }
                    if root_closed {
                        return Err(Error::Structural(
                            "stray null entry after the unit's root chain was closed".into(),
                        ));
                    }
                    root_closed = true;
                }
                continue;
            }
            let entry = table.get(code).ok_or_else(|| {
                Error::Structural(format!("abbreviation code {} not in the unit's table", code))
            })?;

            let mut name = None;
            let mut attrs = Vec::with_capacity(entry.attrs.len());
            for spec in &entry.attrs {
                let value = self.decode_attr(stream, spec, &records)?;
                if spec.name == AttrName::Name {
                    if let AttrValue::Str(s) = value {
                        name = Some(s);
                    }
                }
                attrs.push(Attr { name: spec.name, form: spec.form, value });
            }

            let index = dies.len() as u32;
            trace!(index, offset = die_offset, tag = entry.tag.name(), "die");
            if index == 0 {
                parent_stack.push(index);
            } else {
                let parent = *parent_stack.last().ok_or_else(|| {
                    Error::Structural("DIE found after the unit's root chain was closed".into())
                })?;
                dies[parent as usize].children.push(index);
                if entry.has_children {
                    parent_stack.push(index);
                }
            }
            records.insert(die_offset, DieRecord { tag: entry.tag, name });
            dies.push(Die { offset: die_offset, code, tag: entry.tag, attrs, children: vec![] });
        }

        Ok(CompileUnit { header, dies })
    }

    fn decode_attr(
        &self,
        stream: &mut ByteStream<'a>,
        spec: &AttrSpec,
        records: &HashMap<usize, DieRecord<'a>>,
    ) -> Result<AttrValue<'a>> {
        match spec.form {
            Form::Strp => {
                let offset = stream.read_u32()? as usize;
                let debug_str = self.debug_str.ok_or_else(|| {
                    Error::Structural("DW_FORM_strp used but there is no .debug_str section".into())
                })?;
                if offset >= debug_str.len() {
                    return Err(Error::Structural(format!(
                        "string offset {:#x} outside .debug_str", offset
                    )));
                }
                ByteStream::new(&debug_str[offset..]).read_cstr().map(AttrValue::Str)
            }
            Form::String => stream.read_cstr().map(AttrValue::Str),
            Form::Data1 => Ok(AttrValue::Data(u64::from(stream.read_u8()?))),
            Form::Data2 => Ok(AttrValue::Data(u64::from(stream.read_u16()?))),
            Form::Data4 => {
                let value = stream.read_u32()?;
                if spec.name == AttrName::Location {
                    // The constant is an offset into .debug_loc naming a
                    // location list.
                    let debug_loc = self.debug_loc.as_ref().ok_or_else(|| {
                        Error::Structural(
                            "DW_AT_location names a location list but there is no .debug_loc section".into(),
                        )
                    })?;
                    let entries = debug_loc.entries_at(value as usize)?;
                    Ok(AttrValue::LocList { offset: value, entries })
                } else {
                    Ok(AttrValue::Data(u64::from(value)))
                }
            }
            Form::Addr => Ok(AttrValue::Addr(stream.read_address(self.width)?)),
            Form::Flag => Ok(AttrValue::Flag(stream.read_u8()?)),
            Form::Ref1 => Ok(AttrValue::Ref(u64::from(stream.read_u8()?))),
            Form::Ref2 => Ok(AttrValue::Ref(u64::from(stream.read_u16()?))),
            Form::Ref4 => {
                let offset = stream.read_u32()?;
                if spec.name == AttrName::Type {
                    // NOTE: the offset is treated as relative to the start of
                    // .debug_info, because that is how the records are keyed.
                    // DW_FORM_ref4 is properly relative to the unit header,
                    // which only coincides for a unit starting at offset 0.
                    let resolved = resolve_type_name(records, offset as usize);
                    Ok(AttrValue::TypeRef { offset, resolved })
                } else {
                    Ok(AttrValue::Ref(u64::from(offset)))
                }
            }
            Form::Block1 => {
                let length = stream.read_u8()? as usize;
                self.decode_block(stream, spec, length)
            }
            Form::Block2 => {
                let length = stream.read_u16()? as usize;
                self.decode_block(stream, spec, length)
            }
            Form::Block4 => {
                let length = stream.read_u32()? as usize;
                self.decode_block(stream, spec, length)
            }
            other => Err(Error::UnimplementedForm(other.raw())),
        }
    }

    fn decode_block(
        &self,
        stream: &mut ByteStream<'a>,
        spec: &AttrSpec,
        length: usize,
    ) -> Result<AttrValue<'a>> {
        let data = stream.read_bytes(length)?;
        if spec.name == AttrName::Location {
            Ok(AttrValue::Expr(LocExpr::decode(data)?))
        } else {
            Ok(AttrValue::Block(data))
        }
    }
}

/// Maps a referenced DIE to the name the dump prints for `DW_AT_type`.
fn resolve_type_name<'a>(
    records: &HashMap<usize, DieRecord<'a>>,
    offset: usize,
) -> Option<&'a str> {
    let record = records.get(&offset)?;
    let name = record.name.unwrap_or("");
    let resolved = match record.tag {
        Tag::BaseType | Tag::Typedef => name,
        Tag::PointerType => "pointer",
        Tag::ConstType => "const",
        Tag::StructureType | Tag::ClassType => {
            if name.is_empty() { "struct" } else { name }
        }
        Tag::ArrayType => "array",
        _ => name,
    };
    Some(resolved)
}

impl CompileUnit<'_> {
    fn fmt_die(&self, f: &mut Formatter<'_>, index: u32, depth: usize) -> std::fmt::Result {
        let die = &self.dies[index as usize];
        for _ in 0..depth {
            write!(f, "  ")?;
        }
        writeln!(f, "<{}> {}  (abbrev {}, offset {:#x})", index, die.tag, die.code, die.offset)?;
        for attr in &die.attrs {
            for _ in 0..depth {
                write!(f, "  ")?;
            }
            writeln!(f, "    {}: {}", attr.name, attr.value)?;
        }
        for &child in &die.children {
            self.fmt_die(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl Display for CompileUnit<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.header)?;
        if !self.dies.is_empty() {
            self.fmt_die(f, 0, 0)?;
        }
        Ok(())
    }
}
