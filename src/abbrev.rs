use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use tracing::debug;

use crate::error::{Error, Result};
use crate::stream::ByteStream;

/// DWARF tag enumerants, as carried in `.debug_abbrev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    ArrayType,
    ClassType,
    EntryPoint,
    EnumerationType,
    FormalParameter,
    ImportedDeclaration,
    Label,
    LexicalBlock,
    Member,
    PointerType,
    ReferenceType,
    CompileUnit,
    StringType,
    StructureType,
    SubroutineType,
    Typedef,
    UnionType,
    UnspecifiedParameters,
    Variant,
    CommonBlock,
    CommonInclusion,
    Inheritance,
    InlinedSubroutine,
    Module,
    PtrToMemberType,
    SetType,
    SubrangeType,
    WithStmt,
    AccessDeclaration,
    BaseType,
    CatchBlock,
    ConstType,
    Constant,
    Enumerator,
    FileType,
    Friend,
    Namelist,
    NamelistItem,
    PackedType,
    Subprogram,
    TemplateTypeParameter,
    TemplateValueParameter,
    ThrownType,
    TryBlock,
    VariantPart,
    Variable,
    VolatileType,
    DwarfProcedure,
    RestrictType,
    InterfaceType,
    Namespace,
    ImportedModule,
    UnspecifiedType,
    PartialUnit,
    ImportedUnit,
    Condition,
    SharedType,
    TypeUnit,
    RvalueReferenceType,
    TemplateAlias,
    LoUser,
    HiUser,
}

impl Tag {
    pub fn from_raw(value: u64) -> Result<Tag> {
        match value {
            0x01   => Ok(Tag::ArrayType),
            0x02   => Ok(Tag::ClassType),
            0x03   => Ok(Tag::EntryPoint),
            0x04   => Ok(Tag::EnumerationType),
            0x05   => Ok(Tag::FormalParameter),
            0x08   => Ok(Tag::ImportedDeclaration),
            0x0a   => Ok(Tag::Label),
            0x0b   => Ok(Tag::LexicalBlock),
            0x0d   => Ok(Tag::Member),
            0x0f   => Ok(Tag::PointerType),
            0x10   => Ok(Tag::ReferenceType),
            0x11   => Ok(Tag::CompileUnit),
            0x12   => Ok(Tag::StringType),
            0x13   => Ok(Tag::StructureType),
            0x15   => Ok(Tag::SubroutineType),
            0x16   => Ok(Tag::Typedef),
            0x17   => Ok(Tag::UnionType),
            0x18   => Ok(Tag::UnspecifiedParameters),
            0x19   => Ok(Tag::Variant),
            0x1a   => Ok(Tag::CommonBlock),
            0x1b   => Ok(Tag::CommonInclusion),
            0x1c   => Ok(Tag::Inheritance),
            0x1d   => Ok(Tag::InlinedSubroutine),
            0x1e   => Ok(Tag::Module),
            0x1f   => Ok(Tag::PtrToMemberType),
            0x20   => Ok(Tag::SetType),
            0x21   => Ok(Tag::SubrangeType),
            0x22   => Ok(Tag::WithStmt),
            0x23   => Ok(Tag::AccessDeclaration),
            0x24   => Ok(Tag::BaseType),
            0x25   => Ok(Tag::CatchBlock),
            0x26   => Ok(Tag::ConstType),
            0x27   => Ok(Tag::Constant),
            0x28   => Ok(Tag::Enumerator),
            0x29   => Ok(Tag::FileType),
            0x2a   => Ok(Tag::Friend),
            0x2b   => Ok(Tag::Namelist),
            0x2c   => Ok(Tag::NamelistItem),
            0x2d   => Ok(Tag::PackedType),
            0x2e   => Ok(Tag::Subprogram),
            0x2f   => Ok(Tag::TemplateTypeParameter),
            0x30   => Ok(Tag::TemplateValueParameter),
            0x31   => Ok(Tag::ThrownType),
            0x32   => Ok(Tag::TryBlock),
            0x33   => Ok(Tag::VariantPart),
            0x34   => Ok(Tag::Variable),
            0x35   => Ok(Tag::VolatileType),
            0x36   => Ok(Tag::DwarfProcedure),
            0x37   => Ok(Tag::RestrictType),
            0x38   => Ok(Tag::InterfaceType),
            0x39   => Ok(Tag::Namespace),
            0x3a   => Ok(Tag::ImportedModule),
            0x3b   => Ok(Tag::UnspecifiedType),
            0x3c   => Ok(Tag::PartialUnit),
            0x3d   => Ok(Tag::ImportedUnit),
            0x3f   => Ok(Tag::Condition),
            0x40   => Ok(Tag::SharedType),
            0x41   => Ok(Tag::TypeUnit),
            0x42   => Ok(Tag::RvalueReferenceType),
            0x43   => Ok(Tag::TemplateAlias),
            0x4080 => Ok(Tag::LoUser),
            0xffff => Ok(Tag::HiUser),
            _ => Err(Error::UnknownTag(value)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::ArrayType => "DW_TAG_array_type",
            Tag::ClassType => "DW_TAG_class_type",
            Tag::EntryPoint => "DW_TAG_entry_point",
            Tag::EnumerationType => "DW_TAG_enumeration_type",
            Tag::FormalParameter => "DW_TAG_formal_parameter",
            Tag::ImportedDeclaration => "DW_TAG_imported_declaration",
            Tag::Label => "DW_TAG_label",
            Tag::LexicalBlock => "DW_TAG_lexical_block",
            Tag::Member => "DW_TAG_member",
            Tag::PointerType => "DW_TAG_pointer_type",
            Tag::ReferenceType => "DW_TAG_reference_type",
            Tag::CompileUnit => "DW_TAG_compile_unit",
            Tag::StringType => "DW_TAG_string_type",
            Tag::StructureType => "DW_TAG_structure_type",
            Tag::SubroutineType => "DW_TAG_subroutine_type",
            Tag::Typedef => "DW_TAG_typedef",
            Tag::UnionType => "DW_TAG_union_type",
            Tag::UnspecifiedParameters => "DW_TAG_unspecified_parameters",
            Tag::Variant => "DW_TAG_variant",
            Tag::CommonBlock => "DW_TAG_common_block",
            Tag::CommonInclusion => "DW_TAG_common_inclusion",
            Tag::Inheritance => "DW_TAG_inheritance",
            Tag::InlinedSubroutine => "DW_TAG_inlined_subroutine",
            Tag::Module => "DW_TAG_module",
            Tag::PtrToMemberType => "DW_TAG_ptr_to_member_type",
            Tag::SetType => "DW_TAG_set_type",
            Tag::SubrangeType => "DW_TAG_subrange_type",
            Tag::WithStmt => "DW_TAG_with_stmt",
            Tag::AccessDeclaration => "DW_TAG_access_declaration",
            Tag::BaseType => "DW_TAG_base_type",
            Tag::CatchBlock => "DW_TAG_catch_block",
            Tag::ConstType => "DW_TAG_const_type",
            Tag::Constant => "DW_TAG_constant",
            Tag::Enumerator => "DW_TAG_enumerator",
            Tag::FileType => "DW_TAG_file_type",
            Tag::Friend => "DW_TAG_friend",
            Tag::Namelist => "DW_TAG_namelist",
            Tag::NamelistItem => "DW_TAG_namelist_item",
            Tag::PackedType => "DW_TAG_packed_type",
            Tag::Subprogram => "DW_TAG_subprogram",
            Tag::TemplateTypeParameter => "DW_TAG_template_type_parameter",
            Tag::TemplateValueParameter => "DW_TAG_template_value_parameter",
            Tag::ThrownType => "DW_TAG_thrown_type",
            Tag::TryBlock => "DW_TAG_try_block",
            Tag::VariantPart => "DW_TAG_variant_part",
            Tag::Variable => "DW_TAG_variable",
            Tag::VolatileType => "DW_TAG_volatile_type",
            Tag::DwarfProcedure => "DW_TAG_dwarf_procedure",
            Tag::RestrictType => "DW_TAG_restrict_type",
            Tag::InterfaceType => "DW_TAG_interface_type",
            Tag::Namespace => "DW_TAG_namespace",
            Tag::ImportedModule => "DW_TAG_imported_module",
            Tag::UnspecifiedType => "DW_TAG_unspecified_type",
            Tag::PartialUnit => "DW_TAG_partial_unit",
            Tag::ImportedUnit => "DW_TAG_imported_unit",
            Tag::Condition => "DW_TAG_condition",
            Tag::SharedType => "DW_TAG_shared_type",
            Tag::TypeUnit => "DW_TAG_type_unit",
            Tag::RvalueReferenceType => "DW_TAG_rvalue_reference_type",
            Tag::TemplateAlias => "DW_TAG_template_alias",
            Tag::LoUser => "DW_TAG_lo_user",
            Tag::HiUser => "DW_TAG_hi_user",
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// DWARF attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrName {
    Sibling,
    Location,
    Name,
    Ordering,
    ByteSize,
    BitOffset,
    BitSize,
    StmtList,
    LowPc,
    HighPc,
    Language,
    Discr,
    DiscrValue,
    Visibility,
    Import,
    StringLength,
    CommonReference,
    CompDir,
    ConstValue,
    ContainingType,
    DefaultValue,
    Inline,
    IsOptional,
    LowerBound,
    Producer,
    Prototyped,
    ReturnAddr,
    StartScope,
    BitStride,
    UpperBound,
    AbstractOrigin,
    Accessibility,
    AddressClass,
    Artificial,
    BaseTypes,
    CallingConvention,
    Count,
    DataMemberLocation,
    DeclColumn,
    DeclFile,
    DeclLine,
    Declaration,
    DiscrList,
    Encoding,
    External,
    FrameBase,
    Friend,
    IdentifierCase,
    MacroInfo,
    NamelistItem,
    Priority,
    Segment,
    Specification,
    StaticLink,
    Type,
    UseLocation,
    VariableParameter,
    Virtuality,
    VtableElemLocation,
    Allocated,
    Associated,
    DataLocation,
    ByteStride,
    EntryPc,
    UseUtf8,
    Extension,
    Ranges,
    Trampoline,
    CallColumn,
    CallFile,
    CallLine,
    Description,
    BinaryScale,
    DecimalScale,
    Small,
    DecimalSign,
    DigitCount,
    PictureString,
    Mutable,
    ThreadsScaled,
    Explicit,
    ObjectPointer,
    Endianity,
    Elemental,
    Pure,
    Recursive,
    LoUser,
    MipsLinkageName,
    GnuAllCallSites,
    HiUser,
}

impl AttrName {
    pub fn from_raw(value: u64) -> Result<AttrName> {
        match value {
            0x01   => Ok(AttrName::Sibling),
            0x02   => Ok(AttrName::Location),
            0x03   => Ok(AttrName::Name),
            0x09   => Ok(AttrName::Ordering),
            0x0b   => Ok(AttrName::ByteSize),
            0x0c   => Ok(AttrName::BitOffset),
            0x0d   => Ok(AttrName::BitSize),
            0x10   => Ok(AttrName::StmtList),
            0x11   => Ok(AttrName::LowPc),
            0x12   => Ok(AttrName::HighPc),
            0x13   => Ok(AttrName::Language),
            0x15   => Ok(AttrName::Discr),
            0x16   => Ok(AttrName::DiscrValue),
            0x17   => Ok(AttrName::Visibility),
            0x18   => Ok(AttrName::Import),
            0x19   => Ok(AttrName::StringLength),
            0x1a   => Ok(AttrName::CommonReference),
            0x1b   => Ok(AttrName::CompDir),
            0x1c   => Ok(AttrName::ConstValue),
            0x1d   => Ok(AttrName::ContainingType),
            0x1e   => Ok(AttrName::DefaultValue),
            0x20   => Ok(AttrName::Inline),
            0x21   => Ok(AttrName::IsOptional),
            0x22   => Ok(AttrName::LowerBound),
            0x25   => Ok(AttrName::Producer),
            0x27   => Ok(AttrName::Prototyped),
            0x2a   => Ok(AttrName::ReturnAddr),
            0x2c   => Ok(AttrName::StartScope),
            0x2e   => Ok(AttrName::BitStride),
            0x2f   => Ok(AttrName::UpperBound),
            0x31   => Ok(AttrName::AbstractOrigin),
            0x32   => Ok(AttrName::Accessibility),
            0x33   => Ok(AttrName::AddressClass),
            0x34   => Ok(AttrName::Artificial),
            0x35   => Ok(AttrName::BaseTypes),
            0x36   => Ok(AttrName::CallingConvention),
            0x37   => Ok(AttrName::Count),
            0x38   => Ok(AttrName::DataMemberLocation),
            0x39   => Ok(AttrName::DeclColumn),
            0x3a   => Ok(AttrName::DeclFile),
            0x3b   => Ok(AttrName::DeclLine),
            0x3c   => Ok(AttrName::Declaration),
            0x3d   => Ok(AttrName::DiscrList),
            0x3e   => Ok(AttrName::Encoding),
            0x3f   => Ok(AttrName::External),
            0x40   => Ok(AttrName::FrameBase),
            0x41   => Ok(AttrName::Friend),
            0x42   => Ok(AttrName::IdentifierCase),
            0x43   => Ok(AttrName::MacroInfo),
            0x44   => Ok(AttrName::NamelistItem),
            0x45   => Ok(AttrName::Priority),
            0x46   => Ok(AttrName::Segment),
            0x47   => Ok(AttrName::Specification),
            0x48   => Ok(AttrName::StaticLink),
            0x49   => Ok(AttrName::Type),
            0x4a   => Ok(AttrName::UseLocation),
            0x4b   => Ok(AttrName::VariableParameter),
            0x4c   => Ok(AttrName::Virtuality),
            0x4d   => Ok(AttrName::VtableElemLocation),
            0x4e   => Ok(AttrName::Allocated),
            0x4f   => Ok(AttrName::Associated),
            0x50   => Ok(AttrName::DataLocation),
            0x51   => Ok(AttrName::ByteStride),
            0x52   => Ok(AttrName::EntryPc),
            0x53   => Ok(AttrName::UseUtf8),
            0x54   => Ok(AttrName::Extension),
            0x55   => Ok(AttrName::Ranges),
            0x56   => Ok(AttrName::Trampoline),
            0x57   => Ok(AttrName::CallColumn),
            0x58   => Ok(AttrName::CallFile),
            0x59   => Ok(AttrName::CallLine),
            0x5a   => Ok(AttrName::Description),
            0x5b   => Ok(AttrName::BinaryScale),
            0x5c   => Ok(AttrName::DecimalScale),
            0x5d   => Ok(AttrName::Small),
            0x5e   => Ok(AttrName::DecimalSign),
            0x5f   => Ok(AttrName::DigitCount),
            0x60   => Ok(AttrName::PictureString),
            0x61   => Ok(AttrName::Mutable),
            0x62   => Ok(AttrName::ThreadsScaled),
            0x63   => Ok(AttrName::Explicit),
            0x64   => Ok(AttrName::ObjectPointer),
            0x65   => Ok(AttrName::Endianity),
            0x66   => Ok(AttrName::Elemental),
            0x67   => Ok(AttrName::Pure),
            0x68   => Ok(AttrName::Recursive),
            0x2000 => Ok(AttrName::LoUser),
            0x2007 => Ok(AttrName::MipsLinkageName),
            0x2117 => Ok(AttrName::GnuAllCallSites),
            0x3fff => Ok(AttrName::HiUser),
            _ => Err(Error::UnknownAttribute(value)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AttrName::Sibling => "DW_AT_sibling",
            AttrName::Location => "DW_AT_location",
            AttrName::Name => "DW_AT_name",
            AttrName::Ordering => "DW_AT_ordering",
            AttrName::ByteSize => "DW_AT_byte_size",
            AttrName::BitOffset => "DW_AT_bit_offset",
            AttrName::BitSize => "DW_AT_bit_size",
            AttrName::StmtList => "DW_AT_stmt_list",
            AttrName::LowPc => "DW_AT_low_pc",
            AttrName::HighPc => "DW_AT_high_pc",
            AttrName::Language => "DW_AT_language",
            AttrName::Discr => "DW_AT_discr",
            AttrName::DiscrValue => "DW_AT_discr_value",
            AttrName::Visibility => "DW_AT_visibility",
            AttrName::Import => "DW_AT_import",
            AttrName::StringLength => "DW_AT_string_length",
            AttrName::CommonReference => "DW_AT_common_reference",
            AttrName::CompDir => "DW_AT_comp_dir",
            AttrName::ConstValue => "DW_AT_const_value",
            AttrName::ContainingType => "DW_AT_containing_type",
            AttrName::DefaultValue => "DW_AT_default_value",
            AttrName::Inline => "DW_AT_inline",
            AttrName::IsOptional => "DW_AT_is_optional",
            AttrName::LowerBound => "DW_AT_lower_bound",
            AttrName::Producer => "DW_AT_producer",
            AttrName::Prototyped => "DW_AT_prototyped",
            AttrName::ReturnAddr => "DW_AT_return_addr",
            AttrName::StartScope => "DW_AT_start_scope",
            AttrName::BitStride => "DW_AT_bit_stride",
            AttrName::UpperBound => "DW_AT_upper_bound",
            AttrName::AbstractOrigin => "DW_AT_abstract_origin",
            AttrName::Accessibility => "DW_AT_accessibility",
            AttrName::AddressClass => "DW_AT_address_class",
            AttrName::Artificial => "DW_AT_artificial",
            AttrName::BaseTypes => "DW_AT_base_types",
            AttrName::CallingConvention => "DW_AT_calling_convention",
            AttrName::Count => "DW_AT_count",
            AttrName::DataMemberLocation => "DW_AT_data_member_location",
            AttrName::DeclColumn => "DW_AT_decl_column",
            AttrName::DeclFile => "DW_AT_decl_file",
            AttrName::DeclLine => "DW_AT_decl_line",
            AttrName::Declaration => "DW_AT_declaration",
            AttrName::DiscrList => "DW_AT_discr_list",
            AttrName::Encoding => "DW_AT_encoding",
            AttrName::External => "DW_AT_external",
            AttrName::FrameBase => "DW_AT_frame_base",
            AttrName::Friend => "DW_AT_friend",
            AttrName::IdentifierCase => "DW_AT_identifier_case",
            AttrName::MacroInfo => "DW_AT_macro_info",
            AttrName::NamelistItem => "DW_AT_namelist_item",
            AttrName::Priority => "DW_AT_priority",
            AttrName::Segment => "DW_AT_segment",
            AttrName::Specification => "DW_AT_specification",
            AttrName::StaticLink => "DW_AT_static_link",
            AttrName::Type => "DW_AT_type",
            AttrName::UseLocation => "DW_AT_use_location",
            AttrName::VariableParameter => "DW_AT_variable_parameter",
            AttrName::Virtuality => "DW_AT_virtuality",
            AttrName::VtableElemLocation => "DW_AT_vtable_elem_location",
            AttrName::Allocated => "DW_AT_allocated",
            AttrName::Associated => "DW_AT_associated",
            AttrName::DataLocation => "DW_AT_data_location",
            AttrName::ByteStride => "DW_AT_byte_stride",
            AttrName::EntryPc => "DW_AT_entry_pc",
            AttrName::UseUtf8 => "DW_AT_use_UTF8",
            AttrName::Extension => "DW_AT_extension",
            AttrName::Ranges => "DW_AT_ranges",
            AttrName::Trampoline => "DW_AT_trampoline",
            AttrName::CallColumn => "DW_AT_call_column",
            AttrName::CallFile => "DW_AT_call_file",
            AttrName::CallLine => "DW_AT_call_line",
            AttrName::Description => "DW_AT_description",
            AttrName::BinaryScale => "DW_AT_binary_scale",
            AttrName::DecimalScale => "DW_AT_decimal_scale",
            AttrName::Small => "DW_AT_small",
            AttrName::DecimalSign => "DW_AT_decimal_sign",
            AttrName::DigitCount => "DW_AT_digit_count",
            AttrName::PictureString => "DW_AT_picture_string",
            AttrName::Mutable => "DW_AT_mutable",
            AttrName::ThreadsScaled => "DW_AT_threads_scaled",
            AttrName::Explicit => "DW_AT_explicit",
            AttrName::ObjectPointer => "DW_AT_object_pointer",
            AttrName::Endianity => "DW_AT_endianity",
            AttrName::Elemental => "DW_AT_elemental",
            AttrName::Pure => "DW_AT_pure",
            AttrName::Recursive => "DW_AT_recursive",
            AttrName::LoUser => "DW_AT_lo_user",
            AttrName::MipsLinkageName => "DW_AT_MIPS_linkage_name",
            AttrName::GnuAllCallSites => "DW_AT_GNU_all_call_sites",
            AttrName::HiUser => "DW_AT_hi_user",
        }
    }
}

impl Display for AttrName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// DWARF attribute forms. The discriminants are the on-disk encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Form {
    Addr = 0x01,
    Block2 = 0x03,
    Block4 = 0x04,
    Data2 = 0x05,
    Data4 = 0x06,
    Data8 = 0x07,
    String = 0x08,
    Block = 0x09,
    Block1 = 0x0a,
    Data1 = 0x0b,
    Flag = 0x0c,
    Sdata = 0x0d,
    Strp = 0x0e,
    Udata = 0x0f,
    RefAddr = 0x10,
    Ref1 = 0x11,
    Ref2 = 0x12,
    Ref4 = 0x13,
    Ref8 = 0x14,
    RefUdata = 0x15,
    Indirect = 0x16,
}

impl Form {
    pub fn from_raw(value: u64) -> Result<Form> {
        match value {
            0x01 => Ok(Form::Addr),
            0x03 => Ok(Form::Block2),
            0x04 => Ok(Form::Block4),
            0x05 => Ok(Form::Data2),
            0x06 => Ok(Form::Data4),
            0x07 => Ok(Form::Data8),
            0x08 => Ok(Form::String),
            0x09 => Ok(Form::Block),
            0x0a => Ok(Form::Block1),
            0x0b => Ok(Form::Data1),
            0x0c => Ok(Form::Flag),
            0x0d => Ok(Form::Sdata),
            0x0e => Ok(Form::Strp),
            0x0f => Ok(Form::Udata),
            0x10 => Ok(Form::RefAddr),
            0x11 => Ok(Form::Ref1),
            0x12 => Ok(Form::Ref2),
            0x13 => Ok(Form::Ref4),
            0x14 => Ok(Form::Ref8),
            0x15 => Ok(Form::RefUdata),
            0x16 => Ok(Form::Indirect),
            _ => Err(Error::UnimplementedForm(value)),
        }
    }

    pub fn raw(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            Form::Addr => "DW_FORM_addr",
            Form::Block2 => "DW_FORM_block2",
            Form::Block4 => "DW_FORM_block4",
            Form::Data2 => "DW_FORM_data2",
            Form::Data4 => "DW_FORM_data4",
            Form::Data8 => "DW_FORM_data8",
            Form::String => "DW_FORM_string",
            Form::Block => "DW_FORM_block",
            Form::Block1 => "DW_FORM_block1",
            Form::Data1 => "DW_FORM_data1",
            Form::Flag => "DW_FORM_flag",
            Form::Sdata => "DW_FORM_sdata",
            Form::Strp => "DW_FORM_strp",
            Form::Udata => "DW_FORM_udata",
            Form::RefAddr => "DW_FORM_ref_addr",
            Form::Ref1 => "DW_FORM_ref1",
            Form::Ref2 => "DW_FORM_ref2",
            Form::Ref4 => "DW_FORM_ref4",
            Form::Ref8 => "DW_FORM_ref8",
            Form::RefUdata => "DW_FORM_ref_udata",
            Form::Indirect => "DW_FORM_indirect",
        }
    }
}

impl Display for Form {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: AttrName,
    pub form: Form,
}

/// One abbreviation: the schema shared by every DIE that names its code.
#[derive(Debug, PartialEq)]
pub struct AbbrevEntry {
    pub tag: Tag,
    pub has_children: bool,
    pub attrs: Vec<AttrSpec>,
}

impl AbbrevEntry {
    /// Parses the body of one declaration; the caller has already read the
    /// abbreviation code.
    fn parse(stream: &mut ByteStream<'_>) -> Result<AbbrevEntry> {
        let tag = Tag::from_raw(stream.read_leb128(false, 64)?)?;
        let has_children = match stream.read_u8()? {
            0x00 => false,
            0x01 => true,
            flag => return Err(Error::UnknownChildrenFlag(flag)),
        };
        let mut attrs = vec![];
        loop {
            let name = stream.read_leb128(false, 64)?;
            let form = stream.read_leb128(false, 64)?;
            if name == 0 && form == 0 {
                break;
            }
            attrs.push(AttrSpec {
                name: AttrName::from_raw(name)?,
                form: Form::from_raw(form)?,
            });
        }
        Ok(AbbrevEntry { tag, has_children, attrs })
    }
}

/// One abbreviation table: code -> declaration. Code 0 is the terminator
/// and is never stored.
#[derive(Debug, Default, PartialEq)]
pub struct AbbrevTable {
    entries: BTreeMap<u64, AbbrevEntry>,
}

impl AbbrevTable {
    fn parse(stream: &mut ByteStream<'_>) -> Result<AbbrevTable> {
        let mut entries = BTreeMap::new();
        loop {
            let code = stream.read_leb128(false, 64)?;
            if code == 0 {
                break;
            }
            let entry = AbbrevEntry::parse(stream)?;
            if entries.insert(code, entry).is_some() {
                return Err(Error::Structural(format!(
                    "duplicate abbreviation code {}", code
                )));
            }
        }
        Ok(AbbrevTable { entries })
    }

    pub fn get(&self, code: u64) -> Option<&AbbrevEntry> {
        self.entries.get(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Display for AbbrevTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (code, entry) in &self.entries {
            writeln!(
                f,
                "[{}] {} DW_CHILDREN_{}",
                code,
                entry.tag,
                if entry.has_children { "yes" } else { "no" }
            )?;
            for spec in &entry.attrs {
                writeln!(f, "\t{:<26} {}", spec.name.name(), spec.form)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Parses a whole `.debug_abbrev` section.
///
/// The section holds one table per compilation unit, back to back; a unit
/// refers to its table by the table's byte offset within the section, so
/// the result is keyed by that offset.
pub fn parse_section(bytes: &[u8]) -> Result<BTreeMap<usize, AbbrevTable>> {
    let mut stream = ByteStream::new(bytes);
    let mut tables = BTreeMap::new();
    while !stream.reached_end() {
        let table_start = stream.offset();
        let table = AbbrevTable::parse(&mut stream)?;
        debug!(offset = table_start, entries = table.len(), "parsed abbreviation table");
        tables.insert(table_start, table);
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::uleb;

    #[test]
    fn single_entry_table() {
        // code 1, DW_TAG_compile_unit, has children,
        // one (DW_AT_name, DW_FORM_string) pair.
        let bytes = [0x01, 0x11, 0x01, 0x03, 0x08, 0x00, 0x00, 0x00];
        let tables = parse_section(&bytes).unwrap();
        assert_eq!(tables.len(), 1);
        let table = &tables[&0];
        assert_eq!(table.len(), 1);
        let entry = table.get(1).unwrap();
        assert_eq!(entry.tag, Tag::CompileUnit);
        assert!(entry.has_children);
        assert_eq!(
            entry.attrs,
            vec![AttrSpec { name: AttrName::Name, form: Form::String }]
        );
        assert!(table.get(0).is_none());
    }

    #[test]
    fn tables_are_keyed_by_section_offset() {
        let mut bytes = vec![];
        // First table: code 1, DW_TAG_compile_unit, no children, no attrs.
        bytes.extend_from_slice(&[0x01, 0x11, 0x00, 0x00, 0x00, 0x00]);
        let second_start = bytes.len();
        // Second table: code 1, DW_TAG_variable, no children, no attrs.
        bytes.extend_from_slice(&[0x01, 0x34, 0x00, 0x00, 0x00, 0x00]);
        let tables = parse_section(&bytes).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[&0].get(1).unwrap().tag, Tag::CompileUnit);
        assert_eq!(tables[&second_start].get(1).unwrap().tag, Tag::Variable);
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let bytes = [
            0x01, 0x11, 0x00, 0x00, 0x00, // code 1
            0x01, 0x34, 0x00, 0x00, 0x00, // code 1 again
            0x00,
        ];
        assert_eq!(
            parse_section(&bytes),
            Err(Error::Structural("duplicate abbreviation code 1".into()))
        );
    }

    #[test]
    fn bad_children_byte_is_rejected() {
        let bytes = [0x01, 0x11, 0x02];
        assert_eq!(parse_section(&bytes), Err(Error::UnknownChildrenFlag(0x02)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = [0x01, 0x3e, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(parse_section(&bytes), Err(Error::UnknownTag(0x3e)));
    }

    #[test]
    fn truncated_declaration_fails() {
        // A code with nothing after it.
        let bytes = [0x05];
        assert!(matches!(
            parse_section(&bytes),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn empty_section_yields_no_tables() {
        assert!(parse_section(&[]).unwrap().is_empty());
    }

    #[test]
    fn multibyte_codes_round_trip() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&uleb(300));
        bytes.extend_from_slice(&[0x24, 0x00, 0x00, 0x00, 0x00]);
        let tables = parse_section(&bytes).unwrap();
        assert_eq!(tables[&0].get(300).unwrap().tag, Tag::BaseType);
    }
}
