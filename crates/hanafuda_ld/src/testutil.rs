// crates/hanafuda_ld/src/testutil.rs
//
// Builds small ELF32BE/PowerPC relocatable objects for unit tests.

use std::collections::HashMap;

use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope,
};

pub(crate) struct TestObj {
    obj: Object<'static>,
    sections: HashMap<String, object::write::SectionId>,
    symbols: HashMap<String, object::write::SymbolId>,
}

impl TestObj {
    pub(crate) fn new() -> Self {
        TestObj {
            obj: Object::new(BinaryFormat::Elf, Architecture::PowerPc, Endianness::Big),
            sections: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    pub(crate) fn section(mut self, name: &str, data: &[u8], kind: SectionKind) -> Self {
        let id = self.obj.add_section(vec![], name.as_bytes().to_vec(), kind);
        self.obj.append_section_data(id, data, 4);
        self.sections.insert(name.to_string(), id);
        self
    }

    pub(crate) fn bss_section(mut self, name: &str, size: u64) -> Self {
        let id = self
            .obj
            .add_section(vec![], name.as_bytes().to_vec(), SectionKind::UninitializedData);
        self.obj.append_section_bss(id, size, 4);
        self.sections.insert(name.to_string(), id);
        self
    }

    pub(crate) fn global(mut self, name: &str, section: &str, value: u64, size: u64) -> Self {
        let section_id = self.sections[section];
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Section(section_id),
            flags: SymbolFlags::None,
        });
        self.symbols.insert(name.to_string(), id);
        self
    }

    pub(crate) fn weak_global(mut self, name: &str, section: &str, value: u64) -> Self {
        let section_id = self.sections[section];
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: true,
            section: SymbolSection::Section(section_id),
            flags: SymbolFlags::None,
        });
        self.symbols.insert(name.to_string(), id);
        self
    }

    pub(crate) fn undefined(mut self, name: &str) -> Self {
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Unknown,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        self.symbols.insert(name.to_string(), id);
        self
    }

    pub(crate) fn common(mut self, name: &str, size: u64, align: u64) -> Self {
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: align,
            size,
            kind: SymbolKind::Data,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Common,
            flags: SymbolFlags::None,
        });
        self.symbols.insert(name.to_string(), id);
        self
    }

    pub(crate) fn reloc(mut self, section: &str, offset: u64, symbol: &str, r_type: u32, addend: i64) -> Self {
        let section_id = self.sections[section];
        let symbol_id = self.symbols[symbol];
        self.obj
            .add_relocation(
                section_id,
                Relocation {
                    offset,
                    symbol: symbol_id,
                    addend,
                    flags: RelocationFlags::Elf { r_type },
                },
            )
            .unwrap();
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.obj.write().unwrap()
    }
}

/// Minimal GNU-style `ar` writer; member names must fit the header.
pub(crate) fn write_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, data) in members {
        assert!(name.len() < 16, "member name too long for the short form");
        let mut header = vec![b' '; 60];
        header[..name.len() + 1].copy_from_slice(format!("{}/", name).as_bytes());
        header[16..16 + 2].copy_from_slice(b"0 ");
        header[28..28 + 2].copy_from_slice(b"0 ");
        header[34..34 + 2].copy_from_slice(b"0 ");
        header[40..40 + 4].copy_from_slice(b"644 ");
        let size = format!("{}", data.len());
        header[48..48 + size.len()].copy_from_slice(size.as_bytes());
        header[58..60].copy_from_slice(b"`\n");
        out.extend_from_slice(&header);
        out.extend_from_slice(data);
        if data.len() % 2 != 0 {
            out.push(b'\n');
        }
    }
    out
}
