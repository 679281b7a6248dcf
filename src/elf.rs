use std::fmt::{Display, Formatter};

use bitflags::bitflags;
use tracing::debug;

use crate::error::{Error, Result};
use crate::stream::ByteStream;

pub const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;

/// The container class, which decides address widths in the DWARF
/// sections as well as in the ELF structures themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Elf32,
    Elf64,
}

impl Width {
    pub fn address_size(self) -> usize {
        match self {
            Width::Elf32 => 4,
            Width::Elf64 => 8,
        }
    }

    fn section_header_size(self) -> u16 {
        match self {
            Width::Elf32 => 40,
            Width::Elf64 => 64,
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Width::Elf32 => write!(f, "ELF32"),
            Width::Elf64 => write!(f, "ELF64"),
        }
    }
}

bitflags! {
    /// Section header flags (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITE = 0x1;
        const ALLOC = 0x2;
        const EXECINSTR = 0x4;
        const MERGE = 0x10;
        const STRINGS = 0x20;
        const INFO_LINK = 0x40;
        const LINK_ORDER = 0x80;
        const GROUP = 0x200;
        const TLS = 0x400;
    }
}

struct RawSectionHeader {
    sh_name: u32,
    sh_type: u32,
    sh_flags: u64,
    sh_offset: u64,
    sh_size: u64,
}

impl RawSectionHeader {
    fn parse(stream: &mut ByteStream<'_>, width: Width) -> Result<RawSectionHeader> {
        let sh_name = stream.read_u32()?;
        let sh_type = stream.read_u32()?;
        let sh_flags = stream.read_address(width)?;
        let _sh_addr = stream.read_address(width)?;
        let sh_offset = stream.read_address(width)?;
        let sh_size = stream.read_address(width)?;
        stream.skip(8)?; // sh_link, sh_info
        stream.skip(2 * width.address_size())?; // sh_addralign, sh_entsize
        Ok(RawSectionHeader { sh_name, sh_type, sh_flags, sh_offset, sh_size })
    }
}

/// One section with its name resolved and its content sliced out of the
/// file buffer.
pub struct Section<'a> {
    pub name: &'a str,
    pub sh_type: u32,
    pub flags: SectionFlags,
    pub offset: u64,
    pub size: u64,
    pub bytes: &'a [u8],
}

/// The parsed container: the class plus the section table.
pub struct ElfFile<'a> {
    pub width: Width,
    pub sections: Vec<Section<'a>>,
}

/// The debug sections the DWARF decoder works from. `.debug_str` and
/// `.debug_loc` are optional; `.debug_line` may occur more than once in
/// COMDAT-style objects.
pub struct DebugSections<'a> {
    pub abbrev: &'a [u8],
    pub info: &'a [u8],
    pub strings: Option<&'a [u8]>,
    pub loc: Option<&'a [u8]>,
    pub lines: Vec<&'a [u8]>,
}

impl<'a> ElfFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<ElfFile<'a>> {
        let mut stream = ByteStream::new(bytes);
        let ident = stream.read_bytes(16)?;
        if ident[0..4] != ELF_MAGIC {
            return Err(Error::Structural("file is not a valid ELF object".into()));
        }
        let width = match ident[4] {
            1 => Width::Elf32,
            2 => Width::Elf64,
            class => return Err(Error::Structural(format!("unsupported ELF class {}", class))),
        };

        stream.skip(8)?; // e_type, e_machine, e_version
        stream.skip(2 * width.address_size())?; // e_entry, e_phoff
        let e_shoff = stream.read_address(width)?;
        let _e_flags = stream.read_u32()?;
        let _e_ehsize = stream.read_u16()?;
        let _e_phentsize = stream.read_u16()?;
        let _e_phnum = stream.read_u16()?;
        let e_shentsize = stream.read_u16()?;
        let e_shnum = stream.read_u16()?;
        let e_shstrndx = stream.read_u16()?;

        if e_shentsize != width.section_header_size() {
            return Err(Error::Structural(format!("wrong section header size {}", e_shentsize)));
        }
        debug!(%width, sections = e_shnum, "parsed ELF header");

        let table_bytes = bytes.get(e_shoff as usize..).ok_or_else(|| {
            Error::Structural("section header table outside the file".into())
        })?;
        let mut table_stream = ByteStream::new(table_bytes);
        let mut raw_headers = Vec::with_capacity(e_shnum as usize);
        for _ in 0..e_shnum {
            raw_headers.push(RawSectionHeader::parse(&mut table_stream, width)?);
        }

        let strtab = raw_headers.get(e_shstrndx as usize).ok_or_else(|| {
            Error::Structural("string table not found".into())
        })?;
        if strtab.sh_type != SHT_STRTAB {
            return Err(Error::Structural("string table not found".into()));
        }
        let strtab_bytes = Self::content(bytes, strtab)?;

        let mut sections = Vec::with_capacity(raw_headers.len());
        for raw in &raw_headers {
            let name_bytes = strtab_bytes.get(raw.sh_name as usize..).ok_or_else(|| {
                Error::Structural(format!("section name offset {:#x} outside the string table", raw.sh_name))
            })?;
            let name = ByteStream::new(name_bytes).read_cstr()?;
            sections.push(Section {
                name,
                sh_type: raw.sh_type,
                flags: SectionFlags::from_bits_retain(raw.sh_flags),
                offset: raw.sh_offset,
                size: raw.sh_size,
                bytes: Self::content(bytes, raw)?,
            });
        }

        Ok(ElfFile { width, sections })
    }

    fn content(bytes: &'a [u8], raw: &RawSectionHeader) -> Result<&'a [u8]> {
        // SHT_NOBITS sections occupy no file bytes.
        if raw.sh_type == SHT_NOBITS {
            return Ok(&[]);
        }
        let start = raw.sh_offset as usize;
        let end = start + raw.sh_size as usize;
        bytes.get(start..end).ok_or_else(|| {
            Error::Structural(format!(
                "section content [{:#x}, {:#x}) outside the file", start, end
            ))
        })
    }

    fn find(&self, name: &str) -> Option<&'a [u8]> {
        self.sections.iter().find(|s| s.name == name).map(|s| s.bytes)
    }

    pub fn debug_sections(&self) -> Result<DebugSections<'a>> {
        let abbrev = self.find(".debug_abbrev").ok_or_else(|| {
            Error::Structural("missing .debug_abbrev section".into())
        })?;
        let info = self.find(".debug_info").ok_or_else(|| {
            Error::Structural("missing .debug_info section".into())
        })?;
        let lines = self
            .sections
            .iter()
            .filter(|s| s.name == ".debug_line")
            .map(|s| s.bytes)
            .collect();
        Ok(DebugSections {
            abbrev,
            info,
            strings: self.find(".debug_str"),
            loc: self.find(".debug_loc"),
            lines,
        })
    }
}

fn section_type_name(sh_type: u32) -> &'static str {
    match sh_type {
        0 => "NULL",
        1 => "PROGBITS",
        2 => "SYMTAB",
        SHT_STRTAB => "STRTAB",
        4 => "RELA",
        5 => "HASH",
        6 => "DYNAMIC",
        7 => "NOTE",
        SHT_NOBITS => "NOBITS",
        9 => "REL",
        _ => "OTHER",
    }
}

impl Display for ElfFile<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "section headers ({}):", self.width)?;
        for (i, sec) in self.sections.iter().enumerate() {
            writeln!(
                f,
                "  [{:2}] {:<20} {:<9} offset {:#08x} size {:#08x} {:?}",
                i,
                sec.name,
                section_type_name(sec.sh_type),
                sec.offset,
                sec.size,
                sec.flags
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal ELF image with the given named sections, plus the
    /// NULL section and the trailing `.shstrtab`.
    fn make_elf(width: Width, sections: &[(&str, &[u8])]) -> Vec<u8> {
        let (shentsize, ehsize) = match width {
            Width::Elf32 => (40usize, 52usize),
            Width::Elf64 => (64, 64),
        };

        // Build the section name string table.
        let mut strtab = vec![0u8];
        let mut name_offsets = vec![];
        for (name, _) in sections {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        let shstrtab_name = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab\0");

        // Lay out the section contents after the ELF header.
        let mut contents = vec![];
        let mut placements = vec![];
        let mut cursor = ehsize;
        for (_, data) in sections {
            placements.push((cursor, data.len()));
            contents.extend_from_slice(data);
            cursor += data.len();
        }
        let strtab_placement = (cursor, strtab.len());
        contents.extend_from_slice(&strtab);
        cursor += strtab.len();
        let e_shoff = cursor;
        let shnum = sections.len() + 2;

        let mut out = vec![];
        out.extend_from_slice(&ELF_MAGIC);
        out.push(if width == Width::Elf32 { 1 } else { 2 });
        out.push(1); // little endian
        out.push(1); // EV_CURRENT
        out.extend_from_slice(&[0u8; 9]);
        out.extend_from_slice(&1u16.to_le_bytes()); // e_type: relocatable
        out.extend_from_slice(&3u16.to_le_bytes()); // e_machine: i386
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        let addr = |out: &mut Vec<u8>, value: u64| match width {
            Width::Elf32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            Width::Elf64 => out.extend_from_slice(&value.to_le_bytes()),
        };
        addr(&mut out, 0); // e_entry
        addr(&mut out, 0); // e_phoff
        addr(&mut out, e_shoff as u64);
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(ehsize as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(shentsize as u16).to_le_bytes());
        out.extend_from_slice(&(shnum as u16).to_le_bytes());
        out.extend_from_slice(&((shnum - 1) as u16).to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), ehsize);

        out.extend_from_slice(&contents);

        let shdr = |out: &mut Vec<u8>, name: u32, sh_type: u32, offset: usize, size: usize| {
            out.extend_from_slice(&name.to_le_bytes());
            out.extend_from_slice(&sh_type.to_le_bytes());
            addr(out, 0); // sh_flags
            addr(out, 0); // sh_addr
            addr(out, offset as u64);
            addr(out, size as u64);
            out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
            out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            addr(out, 0); // sh_addralign
            addr(out, 0); // sh_entsize
        };
        shdr(&mut out, 0, 0, 0, 0); // NULL section
        for (i, (offset, size)) in placements.iter().enumerate() {
            shdr(&mut out, name_offsets[i], 1, *offset, *size);
        }
        shdr(&mut out, shstrtab_name, SHT_STRTAB, strtab_placement.0, strtab_placement.1);
        out
    }

    #[test]
    fn parses_both_classes() {
        for width in [Width::Elf32, Width::Elf64] {
            let image = make_elf(width, &[(".debug_info", b"abc"), (".text", b"\x90")]);
            let elf = ElfFile::parse(&image).unwrap();
            assert_eq!(elf.width, width);
            assert_eq!(elf.sections.len(), 4);
            assert_eq!(elf.find(".debug_info"), Some(&b"abc"[..]));
            assert_eq!(elf.find(".text"), Some(&b"\x90"[..]));
            assert_eq!(elf.find(".missing"), None);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = make_elf(Width::Elf32, &[]);
        image[0] = 0x7e;
        assert!(matches!(ElfFile::parse(&image), Err(Error::Structural(_))));
    }

    #[test]
    fn rejects_unknown_class() {
        let mut image = make_elf(Width::Elf32, &[]);
        image[4] = 3;
        assert!(matches!(ElfFile::parse(&image), Err(Error::Structural(_))));
    }

    #[test]
    fn rejects_wrong_section_header_size() {
        let mut image = make_elf(Width::Elf32, &[]);
        // e_shentsize sits right after e_phnum in the ELF32 header.
        image[46..48].copy_from_slice(&64u16.to_le_bytes());
        assert!(matches!(ElfFile::parse(&image), Err(Error::Structural(_))));
    }

    #[test]
    fn debug_section_lookup() {
        let image = make_elf(
            Width::Elf32,
            &[
                (".debug_abbrev", b"a"),
                (".debug_info", b"i"),
                (".debug_line", b"l1"),
                (".debug_line", b"l2"),
            ],
        );
        let elf = ElfFile::parse(&image).unwrap();
        let debug = elf.debug_sections().unwrap();
        assert_eq!(debug.abbrev, b"a");
        assert_eq!(debug.info, b"i");
        assert_eq!(debug.lines, vec![&b"l1"[..], &b"l2"[..]]);
        assert!(debug.strings.is_none());
        assert!(debug.loc.is_none());
    }

    #[test]
    fn missing_debug_info_is_reported() {
        let image = make_elf(Width::Elf32, &[(".debug_abbrev", b"a")]);
        let elf = ElfFile::parse(&image).unwrap();
        assert!(matches!(elf.debug_sections(), Err(Error::Structural(_))));
    }

    #[test]
    fn section_content_is_bounds_checked() {
        let mut image = make_elf(Width::Elf32, &[(".debug_info", b"abc")]);
        // Corrupt the .debug_info section header's sh_size (second header:
        // e_shoff + 40, sh_size at +20 within an ELF32 header).
        let e_shoff = u32::from_le_bytes(image[32..36].try_into().unwrap()) as usize;
        let size_field = e_shoff + 40 + 20;
        image[size_field..size_field + 4].copy_from_slice(&0x1000u32.to_le_bytes());
        assert!(matches!(ElfFile::parse(&image), Err(Error::Structural(_))));
    }
}
