// crates/hanafuda_ld/src/input.rs
//
// ELF32BE/PowerPC relocatable objects and `ar` archives, parsed into
// owned structures up front. Archive members stay lazy: they are
// parsed here so their defined names are known, but only enter the
// link when an undefined reference asks for them.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use object::read::archive::ArchiveFile;
use object::{
    Architecture, Endianness, Object, ObjectKind, ObjectSection, ObjectSymbol, RelocationFlags,
    RelocationTarget, SectionFlags, SectionKind, SymbolSection,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reloc {
    /// Offset of the relocated field inside the section.
    pub offset: u32,
    pub r_type: u32,
    /// Index into the owning object's `symbols`.
    pub symbol: usize,
    pub addend: i32,
}

#[derive(Debug)]
pub struct InputSection {
    pub name: String,
    pub align: u32,
    pub size: u32,
    /// Empty for uninitialized (NOBITS) sections.
    pub data: Vec<u8>,
    pub alloc: bool,
    pub exec: bool,
    pub writable: bool,
    pub bss: bool,
    pub relocs: Vec<Reloc>,
    /// Cleared by --gc-sections.
    pub live: bool,
    /// Set by --icf when this section was folded into another
    /// `(object, section)`.
    pub folded_into: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSymbolDef {
    Undefined,
    Section { section: usize, value: u32, size: u32 },
    Common { size: u32, align: u32 },
    Absolute { value: u32 },
}

#[derive(Debug, Clone)]
pub struct InputSymbol {
    pub name: String,
    pub global: bool,
    pub weak: bool,
    pub def: InputSymbolDef,
}

pub struct ObjectFile {
    pub name: String,
    pub sections: Vec<InputSection>,
    pub symbols: Vec<InputSymbol>,
}

impl ObjectFile {
    pub fn parse(name: String, data: &[u8]) -> Result<Self> {
        let file = object::File::parse(data).with_context(|| format!("cannot parse {}", name))?;
        if file.kind() != ObjectKind::Relocatable {
            bail!("{}: not a relocatable object", name);
        }
        if file.architecture() != Architecture::PowerPc {
            bail!("{}: not a PowerPC object", name);
        }
        if file.endianness() != Endianness::Big {
            bail!("{}: not big-endian", name);
        }

        // Sections first; relocations keep the raw symbol-table index
        // until the symbol pass below provides the dense mapping.
        let mut sections = Vec::new();
        let mut section_map = HashMap::new();
        let mut raw_relocs: Vec<Vec<(u32, u32, usize, i32)>> = Vec::new();
        for section in file.sections() {
            let sec_name = section
                .name()
                .with_context(|| format!("{}: bad section name", name))?
                .to_string();
            let sh_flags = match section.flags() {
                SectionFlags::Elf { sh_flags } => sh_flags,
                _ => 0,
            };
            let alloc = sh_flags & u64::from(object::elf::SHF_ALLOC) != 0;
            let exec = sh_flags & u64::from(object::elf::SHF_EXECINSTR) != 0;
            let writable = sh_flags & u64::from(object::elf::SHF_WRITE) != 0;
            let bss = section.kind() == SectionKind::UninitializedData;
            let data = if alloc && !bss {
                section
                    .data()
                    .with_context(|| format!("{}: cannot read section {}", name, sec_name))?
                    .to_vec()
            } else {
                Vec::new()
            };
            let mut relocs = Vec::new();
            for (offset, reloc) in section.relocations() {
                let r_type = match reloc.flags() {
                    RelocationFlags::Elf { r_type } => r_type,
                    other => bail!("{}: unexpected relocation {:?}", name, other),
                };
                let symbol = match reloc.target() {
                    RelocationTarget::Symbol(index) => index.0,
                    other => bail!("{}: unsupported relocation target {:?}", name, other),
                };
                relocs.push((offset as u32, r_type, symbol, reloc.addend() as i32));
            }
            section_map.insert(section.index().0, sections.len());
            raw_relocs.push(relocs);
            sections.push(InputSection {
                name: sec_name,
                align: section.align() as u32,
                size: section.size() as u32,
                data,
                alloc,
                exec,
                writable,
                bss,
                relocs: Vec::new(),
                live: true,
                folded_into: None,
            });
        }

        let mut symbols = Vec::new();
        let mut symbol_map = HashMap::new();
        for symbol in file.symbols() {
            let mut sym_name = symbol.name().unwrap_or("").to_string();
            let def = match symbol.section() {
                SymbolSection::Undefined => InputSymbolDef::Undefined,
                SymbolSection::Common => InputSymbolDef::Common {
                    size: symbol.size() as u32,
                    // For ELF commons st_value carries the alignment.
                    align: (symbol.address() as u32).max(1),
                },
                SymbolSection::Absolute => InputSymbolDef::Absolute {
                    value: symbol.address() as u32,
                },
                SymbolSection::Section(index) => match section_map.get(&index.0) {
                    Some(&section) => {
                        if sym_name.is_empty() {
                            sym_name = sections[section].name.clone();
                        }
                        InputSymbolDef::Section {
                            section,
                            value: symbol.address() as u32,
                            size: symbol.size() as u32,
                        }
                    }
                    None => InputSymbolDef::Undefined,
                },
                _ => InputSymbolDef::Undefined,
            };
            symbol_map.insert(symbol.index().0, symbols.len());
            symbols.push(InputSymbol {
                name: sym_name,
                global: symbol.is_global(),
                weak: symbol.is_weak(),
                def,
            });
        }

        for (section, relocs) in sections.iter_mut().zip(raw_relocs) {
            for (offset, r_type, raw_symbol, addend) in relocs {
                let symbol = match symbol_map.get(&raw_symbol) {
                    Some(&symbol) => symbol,
                    None => bail!(
                        "{}: relocation in {} references a bad symbol index",
                        name,
                        section.name
                    ),
                };
                section.relocs.push(Reloc {
                    offset,
                    r_type,
                    symbol,
                    addend,
                });
            }
        }

        log::debug!(
            "{}: {} sections, {} symbols",
            name,
            sections.len(),
            symbols.len()
        );
        Ok(ObjectFile {
            name,
            sections,
            symbols,
        })
    }
}

/// A parsed archive member that has not been pulled into the link yet.
pub struct LazyMember {
    pub object: ObjectFile,
    /// Global defined names, for undefined-reference extraction.
    pub defined: Vec<String>,
}

pub struct Archive {
    pub name: String,
    pub members: Vec<Option<LazyMember>>,
}

pub enum InputFile {
    Object(Box<ObjectFile>),
    Archive(Archive),
}

const ARCHIVE_MAGIC: &[u8] = b"!<arch>\n";

pub fn read_input_file(path: &Path) -> Result<InputFile> {
    let display = path.display().to_string();
    let data = fs::read(path).with_context(|| format!("cannot read {}", display))?;
    if data.starts_with(ARCHIVE_MAGIC) {
        let archive =
            ArchiveFile::parse(&*data).with_context(|| format!("cannot parse {}", display))?;
        let mut members = Vec::new();
        for member in archive.members() {
            let member = member.with_context(|| format!("bad archive member in {}", display))?;
            let member_name = String::from_utf8_lossy(member.name()).into_owned();
            let member_data = member
                .data(&*data)
                .with_context(|| format!("cannot read {}({})", display, member_name))?;
            let object = ObjectFile::parse(format!("{}({})", display, member_name), member_data)?;
            let defined = object
                .symbols
                .iter()
                .filter(|s| s.global && !matches!(s.def, InputSymbolDef::Undefined))
                .map(|s| s.name.clone())
                .collect();
            members.push(Some(LazyMember { object, defined }));
        }
        Ok(InputFile::Archive(Archive {
            name: display,
            members,
        }))
    } else {
        Ok(InputFile::Object(Box::new(ObjectFile::parse(
            display, &data,
        )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestObj;

    #[test]
    fn parses_sections_and_symbols() {
        let bytes = TestObj::new()
            .section(".text", &[0u8; 8], object::SectionKind::Text)
            .section(".data", &[1, 2, 3, 4], object::SectionKind::Data)
            .global("func", ".text", 0, 8)
            .undefined("extern_thing")
            .build();
        let object = ObjectFile::parse("test.o".to_string(), &bytes).unwrap();
        let text = object.sections.iter().find(|s| s.name == ".text").unwrap();
        assert!(text.alloc && text.exec && !text.bss);
        assert_eq!(text.size, 8);
        let func = object.symbols.iter().find(|s| s.name == "func").unwrap();
        assert!(func.global);
        assert!(matches!(
            func.def,
            InputSymbolDef::Section { value: 0, size: 8, .. }
        ));
        let ext = object
            .symbols
            .iter()
            .find(|s| s.name == "extern_thing")
            .unwrap();
        assert_eq!(ext.def, InputSymbolDef::Undefined);
    }

    #[test]
    fn rejects_wrong_architecture() {
        let mut obj = object::write::Object::new(
            object::BinaryFormat::Elf,
            object::Architecture::X86_64,
            object::Endianness::Little,
        );
        let _ = obj.add_section(vec![], b".text".to_vec(), object::SectionKind::Text);
        let bytes = obj.write().unwrap();
        assert!(ObjectFile::parse("x86.o".to_string(), &bytes).is_err());
    }
}
