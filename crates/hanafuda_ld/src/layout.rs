// crates/hanafuda_ld/src/layout.rs
//
// Assigns final virtual addresses and file offsets. The location
// counter starts at the configured initial address; file offsets track
// it at a fixed distance so the emitted image stays contiguous with
// whatever the caller placed below `initial_file_offset`. Output
// sections that collect nothing are skipped entirely and keep a zero
// file offset.

use std::collections::HashMap;

use crate::config::{Config, ScriptConfig};
use crate::symbols::{Symbol, SymbolDef, SymbolTable};

#[derive(Debug, Clone, Copy)]
pub struct Chunk {
    pub object: usize,
    pub section: usize,
    pub va: u32,
    pub file_offset: u32,
    pub size: u32,
}

#[derive(Debug)]
pub struct OutputSection {
    pub name: String,
    pub file_offset: u32,
    pub va: u32,
    pub size: u32,
    pub chunks: Vec<Chunk>,
}

pub struct Layout {
    pub sections: Vec<OutputSection>,
    section_va: HashMap<(usize, usize), u32>,
    common_vas: HashMap<String, u32>,
    file_end: u32,
}

fn align_to(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

pub fn assign_addresses(
    cfg: &Config,
    script: &ScriptConfig,
    collected: &[Vec<(usize, usize)>],
    symtab: &SymbolTable,
) -> Layout {
    let mut va = u64::from(cfg.initial_addr_offset);
    let file_delta = i64::from(cfg.initial_file_offset) - i64::from(cfg.initial_addr_offset);
    let file_of = |va: u64| (va as i64 + file_delta) as u32;

    let commons: Vec<(String, u32, u32)> = symtab
        .symbols
        .iter()
        .filter_map(|s| match s.def {
            SymbolDef::Common { size, align } => Some((s.name.clone(), size, align)),
            _ => None,
        })
        .collect();

    let mut sections = Vec::new();
    let mut section_va = HashMap::new();
    let mut common_vas = HashMap::new();

    for (index, command) in script.commands.iter().enumerate() {
        let inputs = &collected[index];
        // Commons land at the tail of the final output section.
        let commons_here = index + 1 == script.commands.len() && !commons.is_empty();
        if inputs.is_empty() && !commons_here {
            continue;
        }
        if let Some(expr) = &command.addr_expr {
            va = expr(va);
        }
        let start = va;
        let mut chunks = Vec::new();
        for &(object, section) in inputs {
            let input = &symtab.objects[object].sections[section];
            va = align_to(va, u64::from(input.align.max(1)));
            section_va.insert((object, section), va as u32);
            chunks.push(Chunk {
                object,
                section,
                va: va as u32,
                file_offset: file_of(va),
                size: input.size,
            });
            va += u64::from(input.size);
        }
        if commons_here {
            for (name, size, align) in &commons {
                let align = (*align).max(cfg.common_alignment).max(1);
                va = align_to(va, u64::from(align));
                common_vas.insert(name.clone(), va as u32);
                va += u64::from(*size);
            }
        }
        log::debug!(
            "{}: va {:#010x}, file {:#x}, {:#x} bytes",
            command.name,
            start,
            file_of(start),
            va - start
        );
        sections.push(OutputSection {
            name: command.name.clone(),
            file_offset: file_of(start),
            va: start as u32,
            size: (va - start) as u32,
            chunks,
        });
    }

    // Sections folded by ICF share their representative's address.
    let mut folded = Vec::new();
    for (object_index, object) in symtab.objects.iter().enumerate() {
        for (sec_index, section) in object.sections.iter().enumerate() {
            if let Some(rep) = section.folded_into {
                if let Some(&va) = section_va.get(&rep) {
                    folded.push(((object_index, sec_index), va));
                }
            }
        }
    }
    section_va.extend(folded);

    let file_end = if sections.is_empty() {
        cfg.initial_file_offset
    } else {
        file_of(va)
    };
    Layout {
        sections,
        section_va,
        common_vas,
        file_end,
    }
}

impl Layout {
    /// Assigned address of an input section, following ICF folds.
    pub fn section_va(&self, object: usize, section: usize) -> Option<u32> {
        self.section_va.get(&(object, section)).copied()
    }

    pub fn symbol_va(&self, symbol: &Symbol) -> Option<u32> {
        match &symbol.def {
            SymbolDef::Absolute { value, .. } => Some(*value),
            SymbolDef::Defined {
                object,
                section,
                value,
                ..
            } => self.section_va(*object, *section).map(|va| va + value),
            SymbolDef::Common { .. } => self.common_vas.get(&symbol.name).copied(),
            _ => None,
        }
    }

    /// One past the last byte any chunk or common occupies in the file.
    pub fn file_size(&self) -> u32 {
        self.file_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputSectionDescription, OutputSectionCommand};
    use crate::diag::Diagnostics;
    use crate::input::{InputFile, ObjectFile};
    use crate::script::collect_input_sections;
    use crate::testutil::TestObj;
    use object::SectionKind;

    fn script_for(names: &[(&str, &[&str])]) -> ScriptConfig {
        let mut script = ScriptConfig {
            has_sections: true,
            commands: Vec::new(),
        };
        for (name, globs) in names {
            let mut command = OutputSectionCommand::new(name);
            command.inputs.push(InputSectionDescription::new("*", globs));
            command.addr_expr = Some(Box::new(|dot| (dot + 31) & !31));
            script.commands.push(command);
        }
        script
    }

    #[test]
    fn places_sections_above_initial_offsets() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let bytes = TestObj::new()
            .section(".text", &[0u8; 16], SectionKind::Text)
            .section(".data", &[0u8; 4], SectionKind::Data)
            .build();
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse("a.o".to_string(), &bytes).unwrap(),
        )));

        let cfg = Config {
            initial_file_offset: 0x140,
            initial_addr_offset: 0x8000_3140,
            ..Config::default()
        };
        let script = script_for(&[(".htext", &[".text", ".text.*"]), (".hdata", &[".data", ".data.*"])]);
        let collected = collect_input_sections(&script, &symtab);
        let layout = assign_addresses(&cfg, &script, &collected, &symtab);

        assert_eq!(layout.sections.len(), 2);
        let htext = &layout.sections[0];
        assert_eq!(htext.va, 0x8000_3140);
        assert_eq!(htext.file_offset, 0x140);
        assert_eq!(htext.size, 16);
        let hdata = &layout.sections[1];
        // 0x8000_3150 rounded up to 32
        assert_eq!(hdata.va, 0x8000_3160);
        assert_eq!(hdata.file_offset, 0x160);
        assert_eq!(layout.file_size(), 0x164);
    }

    #[test]
    fn empty_commands_are_skipped() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let bytes = TestObj::new()
            .section(".text", &[0u8; 8], SectionKind::Text)
            .build();
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse("a.o".to_string(), &bytes).unwrap(),
        )));
        let cfg = Config {
            initial_file_offset: 0x100,
            initial_addr_offset: 0x8000_0100,
            ..Config::default()
        };
        let script = script_for(&[(".sdata", &[".sdata"]), (".htext", &[".text"])]);
        let collected = collect_input_sections(&script, &symtab);
        let layout = assign_addresses(&cfg, &script, &collected, &symtab);
        assert_eq!(layout.sections.len(), 1);
        assert_eq!(layout.sections[0].name, ".htext");
    }

    #[test]
    fn bss_sections_occupy_address_and_file_space() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let bytes = TestObj::new()
            .section(".data", &[1, 2, 3, 4], SectionKind::Data)
            .bss_section(".bss", 0x10)
            .global("buffer", ".bss", 0, 0x10)
            .build();
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse("a.o".to_string(), &bytes).unwrap(),
        )));
        let cfg = Config {
            initial_file_offset: 0x100,
            initial_addr_offset: 0x8000_0100,
            ..Config::default()
        };
        let script = script_for(&[(".hdata", &[".data", ".bss"])]);
        let collected = collect_input_sections(&script, &symtab);
        let layout = assign_addresses(&cfg, &script, &collected, &symtab);

        // .data then .bss, both inside the single patch-data section.
        assert_eq!(layout.sections[0].size, 0x14);
        let buffer = symtab.find("buffer").unwrap();
        assert_eq!(layout.symbol_va(buffer), Some(0x8000_0104));
        assert_eq!(layout.file_size(), 0x114);
    }

    #[test]
    fn commons_allocate_in_last_section() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let bytes = TestObj::new()
            .section(".data", &[0u8; 4], SectionKind::Data)
            .common("pool", 0x10, 4)
            .build();
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse("a.o".to_string(), &bytes).unwrap(),
        )));
        let cfg = Config {
            initial_file_offset: 0x100,
            initial_addr_offset: 0x8000_0100,
            common_alignment: 32,
            ..Config::default()
        };
        let script = script_for(&[(".hdata", &[".data"])]);
        let collected = collect_input_sections(&script, &symtab);
        let layout = assign_addresses(&cfg, &script, &collected, &symtab);

        let pool = symtab.find("pool").unwrap();
        // .data occupies 0x8000_0100..0x8000_0104, commons align to 32.
        assert_eq!(layout.symbol_va(pool), Some(0x8000_0120));
        assert_eq!(layout.sections[0].size, 0x30);
    }
}
