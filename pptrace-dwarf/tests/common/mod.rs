//! テスト用のELF/DWARFフィクスチャ生成
//!
//! ELF64（リトルエンディアン）は `object::write::elf::Writer`、
//! DWARF 4 は `gimli::write` で組み立てます。

#![allow(dead_code)]

use gimli::write::{Address, AttributeValue, DwarfUnit, EndianVec, Expression, Sections, UnitEntryId};
use object::elf;
use object::endian::{LittleEndian, U32, U64};
use object::write::elf::{FileHeader, ProgramHeader, SectionHeader, Sym, Writer};
use object::Endianness;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

pub use object::elf::{ET_DYN, ET_EXEC, PT_LOAD, PT_PHDR};

/// グローバルなFUNCシンボルのst_info
pub const GLOBAL_FUNC: u8 = (elf::STB_GLOBAL << 4) | elf::STT_FUNC;
pub const GLOBAL_OBJECT: u8 = (elf::STB_GLOBAL << 4) | elf::STT_OBJECT;

/// デバッグセクションの圧縮方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCompression {
    None,
    /// SHF_COMPRESSED と Elf64_Chdr
    Chdr,
    /// GNU形式の `.zdebug_*`
    Zdebug,
}

struct Segment {
    p_type: u32,
    vaddr: u64,
}

struct RawSection {
    name: String,
    sh_type: u32,
    sh_flags: u64,
    data: Vec<u8>,
    align: usize,
}

struct RawSymbol {
    name: String,
    value: u64,
    info: u8,
}

/// ELF64イメージのビルダー
pub struct ElfBuilder {
    e_type: u16,
    segments: Vec<Segment>,
    sections: Vec<RawSection>,
    symbols: Vec<RawSymbol>,
    dynamic_symbols: Vec<RawSymbol>,
    compression: DebugCompression,
}

impl ElfBuilder {
    pub fn new(e_type: u16) -> Self {
        Self {
            e_type,
            segments: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
            dynamic_symbols: Vec::new(),
            compression: DebugCompression::None,
        }
    }

    pub fn segment(mut self, p_type: u32, vaddr: u64) -> Self {
        self.segments.push(Segment { p_type, vaddr });
        self
    }

    pub fn symbol(mut self, name: &str, value: u64, info: u8) -> Self {
        self.symbols.push(RawSymbol {
            name: name.to_string(),
            value,
            info,
        });
        self
    }

    pub fn dynamic_symbol(mut self, name: &str, value: u64, info: u8) -> Self {
        self.dynamic_symbols.push(RawSymbol {
            name: name.to_string(),
            value,
            info,
        });
        self
    }

    pub fn section(mut self, name: &str, data: Vec<u8>) -> Self {
        self.sections.push(RawSection {
            name: name.to_string(),
            sh_type: elf::SHT_PROGBITS,
            sh_flags: 0,
            data,
            align: 1,
        });
        self
    }

    /// `.note.gnu.build-id` を追加する
    pub fn build_id(mut self, id: &[u8]) -> Self {
        let name = b"GNU";
        let mut data = Vec::new();
        data.extend(&(name.len() as u32 + 1).to_le_bytes());
        data.extend(&(id.len() as u32).to_le_bytes());
        data.extend(&elf::NT_GNU_BUILD_ID.to_le_bytes());
        data.extend_from_slice(name);
        data.push(0);
        data.extend_from_slice(id);
        while data.len() % 4 != 0 {
            data.push(0);
        }

        self.sections.push(RawSection {
            name: ".note.gnu.build-id".to_string(),
            sh_type: elf::SHT_NOTE,
            sh_flags: u64::from(elf::SHF_ALLOC),
            data,
            align: 4,
        });
        self
    }

    /// `.gnu_debuglink` を追加する
    pub fn debug_link(self, name: &str, crc: u32) -> Self {
        let mut data = name.as_bytes().to_vec();
        data.push(0);
        while data.len() % 4 != 0 {
            data.push(0);
        }
        data.extend(&crc.to_le_bytes());
        self.section(".gnu_debuglink", data)
    }

    /// `gimli::write` で生成したDWARFセクションを追加する
    pub fn dwarf(self, dwarf: DwarfBuilder) -> Self {
        dwarf
            .finish()
            .into_iter()
            .fold(self, |builder, (name, data)| builder.section(&name, data))
    }

    /// `.debug_*` セクションを指定の方式で圧縮する
    pub fn compress_debug(mut self, compression: DebugCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        for section in &mut self.sections {
            compress_section(section, self.compression);
        }

        let mut buffer = Vec::new();
        let mut writer = Writer::new(Endianness::Little, true, &mut buffer);

        writer.reserve_file_header();
        if !self.segments.is_empty() {
            writer.reserve_program_headers(self.segments.len() as u32);
        }

        writer.reserve_null_section_index();
        let section_names: Vec<_> = self
            .sections
            .iter()
            .map(|section| {
                writer.reserve_section_index();
                writer.add_section_name(section.name.as_bytes())
            })
            .collect();

        let has_symtab = !self.symbols.is_empty();
        let symbol_names: Vec<_> = if has_symtab {
            writer.reserve_symtab_section_index();
            writer.reserve_strtab_section_index();
            writer.reserve_null_symbol_index();
            self.symbols
                .iter()
                .map(|sym| {
                    writer.reserve_symbol_index(None);
                    writer.add_string(sym.name.as_bytes())
                })
                .collect()
        } else {
            Vec::new()
        };

        let has_dynsym = !self.dynamic_symbols.is_empty();
        let dynamic_names: Vec<_> = if has_dynsym {
            writer.reserve_dynsym_section_index();
            writer.reserve_dynstr_section_index();
            writer.reserve_null_dynamic_symbol_index();
            self.dynamic_symbols
                .iter()
                .map(|sym| {
                    writer.reserve_dynamic_symbol_index();
                    writer.add_dynamic_string(sym.name.as_bytes())
                })
                .collect()
        } else {
            Vec::new()
        };

        writer.reserve_shstrtab_section_index();

        let section_offsets: Vec<_> = self
            .sections
            .iter()
            .map(|section| writer.reserve(section.data.len(), section.align))
            .collect();
        if has_symtab {
            writer.reserve_symtab();
            writer.reserve_strtab();
        }
        if has_dynsym {
            writer.reserve_dynsym();
            writer.reserve_dynstr();
        }
        writer.reserve_shstrtab();
        writer.reserve_section_headers();

        writer
            .write_file_header(&FileHeader {
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                e_type: self.e_type,
                e_machine: elf::EM_X86_64,
                e_entry: 0,
                e_flags: 0,
            })
            .unwrap();

        if !self.segments.is_empty() {
            writer.write_align_program_headers();
            for segment in &self.segments {
                writer.write_program_header(&ProgramHeader {
                    p_type: segment.p_type,
                    p_flags: elf::PF_R | elf::PF_X,
                    p_offset: 0,
                    p_vaddr: segment.vaddr,
                    p_paddr: segment.vaddr,
                    p_filesz: 64,
                    p_memsz: 64,
                    p_align: 0x1000,
                });
            }
        }

        for section in &self.sections {
            writer.write_align(section.align);
            writer.write(&section.data);
        }

        if has_symtab {
            writer.write_null_symbol();
            for (sym, name) in self.symbols.iter().zip(&symbol_names) {
                writer.write_symbol(&absolute_symbol(sym, *name));
            }
            writer.write_strtab();
        }
        if has_dynsym {
            writer.write_null_dynamic_symbol();
            for (sym, name) in self.dynamic_symbols.iter().zip(&dynamic_names) {
                writer.write_dynamic_symbol(&absolute_symbol(sym, *name));
            }
            writer.write_dynstr();
        }
        writer.write_shstrtab();

        writer.write_null_section_header();
        for ((section, name), offset) in self.sections.iter().zip(&section_names).zip(&section_offsets) {
            writer.write_section_header(&SectionHeader {
                name: Some(*name),
                sh_type: section.sh_type,
                sh_flags: section.sh_flags,
                sh_addr: 0,
                sh_offset: *offset as u64,
                sh_size: section.data.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: section.align as u64,
                sh_entsize: 0,
            });
        }
        if has_symtab {
            // 全シンボルがグローバルなので、ローカルはnullシンボルだけ
            writer.write_symtab_section_header(1);
            writer.write_strtab_section_header();
        }
        if has_dynsym {
            writer.write_dynsym_section_header(0, 1);
            writer.write_dynstr_section_header(0);
        }
        writer.write_shstrtab_section_header();
        drop(writer);

        buffer
    }

    pub fn write_to(self, path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(path, self.build()).unwrap();
    }
}

fn absolute_symbol(sym: &RawSymbol, name: object::write::StringId) -> Sym {
    Sym {
        name: Some(name),
        section: None,
        st_info: sym.info,
        st_other: elf::STV_DEFAULT,
        st_shndx: elf::SHN_ABS,
        st_value: sym.value,
        st_size: 0x20,
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// `.debug_*` セクションを圧縮形式に書き換える
fn compress_section(section: &mut RawSection, compression: DebugCompression) {
    let Some(suffix) = section.name.strip_prefix(".debug_") else {
        return;
    };

    match compression {
        DebugCompression::None => {}
        DebugCompression::Chdr => {
            let header = elf::CompressionHeader64::<LittleEndian> {
                ch_type: U32::new(LittleEndian, elf::ELFCOMPRESS_ZLIB),
                ch_reserved: U32::new(LittleEndian, 0),
                ch_size: U64::new(LittleEndian, section.data.len() as u64),
                ch_addralign: U64::new(LittleEndian, 1),
            };
            let mut data = object::pod::bytes_of(&header).to_vec();
            data.extend(zlib(&section.data));
            section.data = data;
            section.sh_flags |= u64::from(elf::SHF_COMPRESSED);
            section.align = 8;
        }
        DebugCompression::Zdebug => {
            let mut data = b"ZLIB".to_vec();
            data.extend(&(section.data.len() as u64).to_be_bytes());
            data.extend(zlib(&section.data));
            section.data = data;
            section.name = format!(".zdebug_{}", suffix);
        }
    }
}

/// 単一CUのDWARF 4を組み立てるビルダー
///
/// 型参照はラベルで指定し、`finish` で参照先を埋めます。
pub struct DwarfBuilder {
    unit: DwarfUnit,
    parents: Vec<UnitEntryId>,
    labels: HashMap<String, UnitEntryId>,
    type_refs: Vec<(UnitEntryId, String)>,
}

impl DwarfBuilder {
    pub fn new() -> Self {
        let encoding = gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 8,
        };
        Self {
            unit: DwarfUnit::new(encoding),
            parents: Vec::new(),
            labels: HashMap::new(),
            type_refs: Vec::new(),
        }
    }

    fn add(&mut self, tag: gimli::DwTag) -> UnitEntryId {
        let parent = self.parents.last().copied().unwrap_or_else(|| self.unit.unit.root());
        self.unit.unit.add(parent, tag)
    }

    fn set(&mut self, id: UnitEntryId, attr: gimli::DwAt, value: AttributeValue) {
        self.unit.unit.get_mut(id).set(attr, value);
    }

    fn set_name(&mut self, id: UnitEntryId, name: &str) {
        self.set(id, gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
    }

    pub fn compile_unit(&mut self, name: &str) -> &mut Self {
        let root = self.unit.unit.root();
        self.set_name(root, name);
        self.parents.push(root);
        self
    }

    /// 子を持つ可能性があるので `end_children` で閉じる
    pub fn subprogram(&mut self, name: &str, low_pc: u64, size: u64) -> &mut Self {
        let id = self.add(gimli::DW_TAG_subprogram);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(low_pc)));
        self.set(id, gimli::DW_AT_high_pc, AttributeValue::Udata(size));
        self.parents.push(id);
        self
    }

    pub fn param(&mut self, name: &str, type_label: &str) -> &mut Self {
        let id = self.add(gimli::DW_TAG_formal_parameter);
        self.set_name(id, name);
        self.type_refs.push((id, type_label.to_string()));
        self
    }

    pub fn base_type(&mut self, label: &str, name: &str) -> &mut Self {
        let id = self.add(gimli::DW_TAG_base_type);
        self.set_name(id, name);
        self.labels.insert(label.to_string(), id);
        self
    }

    pub fn pointer(&mut self, label: &str, target_label: &str) -> &mut Self {
        let id = self.add(gimli::DW_TAG_pointer_type);
        self.labels.insert(label.to_string(), id);
        self.type_refs.push((id, target_label.to_string()));
        self
    }

    pub fn structure(&mut self, label: &str, name: &str) -> &mut Self {
        let id = self.add(gimli::DW_TAG_structure_type);
        self.set_name(id, name);
        self.labels.insert(label.to_string(), id);
        self.parents.push(id);
        self
    }

    /// 定数形式の DW_AT_data_member_location を持つメンバ
    pub fn member(&mut self, name: &str, type_label: &str, offset: u64) -> &mut Self {
        self.member_at(name, type_label, AttributeValue::Udata(offset))
    }

    /// DWARF 2形式（`DW_OP_plus_uconst`）の位置式を持つメンバ
    pub fn member_plus_uconst(&mut self, name: &str, type_label: &str, offset: u64) -> &mut Self {
        let mut expr = Expression::new();
        expr.op_plus_uconst(offset);
        self.member_at(name, type_label, AttributeValue::Exprloc(expr))
    }

    fn member_at(&mut self, name: &str, type_label: &str, location: AttributeValue) -> &mut Self {
        let id = self.add(gimli::DW_TAG_member);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_data_member_location, location);
        self.type_refs.push((id, type_label.to_string()));
        self
    }

    pub fn typedef(&mut self, name: &str, type_label: &str) -> &mut Self {
        let id = self.add(gimli::DW_TAG_typedef);
        self.set_name(id, name);
        self.type_refs.push((id, type_label.to_string()));
        self
    }

    pub fn end_children(&mut self) -> &mut Self {
        self.parents.pop();
        self
    }

    /// 型参照を解決し、空でないセクションを (名前, データ) で返す
    pub fn finish(mut self) -> Vec<(String, Vec<u8>)> {
        for (id, label) in std::mem::take(&mut self.type_refs) {
            let target = self.labels[&label];
            self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(target));
        }

        let mut sections = Sections::new(EndianVec::new(gimli::LittleEndian));
        self.unit.write(&mut sections).unwrap();

        let mut out = Vec::new();
        sections
            .for_each(|id, data| {
                if !data.slice().is_empty() {
                    out.push((id.name().to_string(), data.slice().to_vec()));
                }
                Ok::<(), gimli::write::Error>(())
            })
            .unwrap();
        out
    }
}

impl Default for DwarfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// テスト全体で使うDWARF
///
/// main.Run(x int, conn **main.Conn) と main.Stop()、
/// struct main.Conn { fd int @0, port uint16 @8 } と typedef endpoint を持つ。
pub fn sample_dwarf() -> DwarfBuilder {
    let mut dwarf = DwarfBuilder::new();
    dwarf
        .compile_unit("main")
        .subprogram("main.Run", 0x48f120, 0x80)
        .param("x", "int")
        .param("conn", "conn_ptr_ptr")
        .end_children()
        .subprogram("main.Stop", 0x48f200, 0x10)
        .end_children()
        .base_type("int", "int")
        .base_type("u16", "uint16")
        .structure("conn", "main.Conn")
        .member("port", "u16", 8)
        .member("fd", "int", 0)
        .end_children()
        .pointer("conn_ptr", "conn")
        .pointer("conn_ptr_ptr", "conn_ptr")
        .typedef("endpoint", "conn")
        .end_children();
    dwarf
}
