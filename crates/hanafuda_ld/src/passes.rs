// crates/hanafuda_ld/src/passes.rs
//
// Size optimizations over resolved input sections: liveness marking
// for --gc-sections and single-pass identical-code folding for --icf.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::input::InputSymbolDef;
use crate::symbols::{SymbolDef, SymbolTable};

fn section_of_symbol(symtab: &SymbolTable, object: usize, symbol: usize) -> Option<(usize, usize)> {
    let input = &symtab.objects[object].symbols[symbol];
    if input.global {
        match symtab.find(&input.name)?.def {
            SymbolDef::Defined {
                object, section, ..
            } => Some((object, section)),
            _ => None,
        }
    } else {
        match input.def {
            InputSymbolDef::Section { section, .. } => Some((object, section)),
            _ => None,
        }
    }
}

/// Mark sections reachable from the root symbols; everything else
/// allocatable is dropped from the link.
pub fn mark_live(symtab: &mut SymbolTable, roots: &[String]) {
    let mut live: HashSet<(usize, usize)> = HashSet::new();
    let mut work: Vec<(usize, usize)> = Vec::new();
    for root in roots {
        if let Some(symbol) = symtab.find(root) {
            if let SymbolDef::Defined {
                object, section, ..
            } = symbol.def
            {
                if live.insert((object, section)) {
                    work.push((object, section));
                }
            }
        }
    }

    while let Some((object, section)) = work.pop() {
        let relocs = symtab.objects[object].sections[section].relocs.clone();
        for reloc in relocs {
            if let Some(target) = section_of_symbol(symtab, object, reloc.symbol) {
                if live.insert(target) {
                    work.push(target);
                }
            }
        }
    }

    let mut dropped = 0usize;
    for (object_index, object) in symtab.objects.iter_mut().enumerate() {
        for (section_index, section) in object.sections.iter_mut().enumerate() {
            if section.alloc && !live.contains(&(object_index, section_index)) {
                section.live = false;
                dropped += 1;
            }
        }
    }
    log::debug!("gc: {} live sections, {} dropped", live.len(), dropped);
}

/// Identity of a relocation for folding purposes. Local targets only
/// compare equal within one object.
fn reloc_key(symtab: &SymbolTable, object: usize, symbol: usize) -> String {
    let input = &symtab.objects[object].symbols[symbol];
    if input.global {
        input.name.clone()
    } else {
        match input.def {
            InputSymbolDef::Section { section, value, .. } => {
                format!("local:{}:{}:{}", object, section, value)
            }
            _ => format!("local:{}:{}", object, symbol),
        }
    }
}

/// Fold read-only executable sections with identical bytes and
/// identical relocations into the first such section seen.
pub fn fold_identical_code(symtab: &mut SymbolTable) -> usize {
    let mut buckets: HashMap<u64, Vec<(usize, usize)>> = HashMap::new();
    let mut folds: Vec<((usize, usize), (usize, usize))> = Vec::new();

    let candidates: Vec<(usize, usize)> = symtab
        .objects
        .iter()
        .enumerate()
        .flat_map(|(oi, object)| {
            object
                .sections
                .iter()
                .enumerate()
                .filter(|(_, s)| s.alloc && s.exec && !s.writable && s.live)
                .map(move |(si, _)| (oi, si))
        })
        .collect();

    let describe = |(oi, si): (usize, usize)| -> (u32, Vec<u8>, Vec<(u32, u32, i32, String)>) {
        let section = &symtab.objects[oi].sections[si];
        let relocs = section
            .relocs
            .iter()
            .map(|r| (r.offset, r.r_type, r.addend, reloc_key(symtab, oi, r.symbol)))
            .collect();
        (section.size, section.data.clone(), relocs)
    };

    for candidate in candidates {
        let key = describe(candidate);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let digest = hasher.finish();
        let bucket = buckets.entry(digest).or_default();
        let rep = bucket.iter().copied().find(|&rep| describe(rep) == key);
        match rep {
            Some(rep) => folds.push((candidate, rep)),
            None => bucket.push(candidate),
        }
    }

    let count = folds.len();
    for ((object, section), rep) in folds {
        log::debug!(
            "icf: folding {}({}) into {}({})",
            symtab.objects[object].name,
            symtab.objects[object].sections[section].name,
            symtab.objects[rep.0].name,
            symtab.objects[rep.0].sections[rep.1].name
        );
        symtab.objects[object].sections[section].folded_into = Some(rep);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::input::{InputFile, ObjectFile};
    use crate::testutil::TestObj;
    use object::elf::R_PPC_REL24;
    use object::SectionKind;

    fn add(symtab: &mut SymbolTable, name: &str, bytes: Vec<u8>) {
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse(name.to_string(), &bytes).unwrap(),
        )));
    }

    #[test]
    fn gc_drops_unreferenced_sections() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        add(
            &mut symtab,
            "a.o",
            TestObj::new()
                .section(".text", &[0u8; 8], SectionKind::Text)
                .section(".text.dead", &[0u8; 8], SectionKind::Text)
                .section(".data", &[0u8; 4], SectionKind::Data)
                .global("_start", ".text", 0, 8)
                .global("unused", ".text.dead", 0, 8)
                .global("table", ".data", 0, 4)
                .reloc(".text", 0, "table", object::elf::R_PPC_ADDR32, 0)
                .build(),
        );
        mark_live(&mut symtab, &["_start".to_string()]);
        let object = &symtab.objects[0];
        let by_name = |name: &str| object.sections.iter().find(|s| s.name == name).unwrap();
        assert!(by_name(".text").live);
        assert!(by_name(".data").live);
        assert!(!by_name(".text.dead").live);
    }

    #[test]
    fn icf_folds_identical_sections() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let body = 0x4E80_0020u32.to_be_bytes(); // blr
        add(
            &mut symtab,
            "a.o",
            TestObj::new()
                .section(".text.f", &body, SectionKind::Text)
                .global("f", ".text.f", 0, 4)
                .build(),
        );
        add(
            &mut symtab,
            "b.o",
            TestObj::new()
                .section(".text.g", &body, SectionKind::Text)
                .global("g", ".text.g", 0, 4)
                .build(),
        );
        assert_eq!(fold_identical_code(&mut symtab), 1);
        let folded: Vec<_> = symtab
            .objects
            .iter()
            .flat_map(|o| o.sections.iter())
            .filter(|s| s.folded_into.is_some())
            .collect();
        assert_eq!(folded.len(), 1);
    }

    #[test]
    fn icf_respects_differing_relocs() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let body = 0x4800_0001u32.to_be_bytes();
        add(
            &mut symtab,
            "a.o",
            TestObj::new()
                .section(".text.f", &body, SectionKind::Text)
                .undefined("x")
                .reloc(".text.f", 0, "x", R_PPC_REL24, 0)
                .build(),
        );
        add(
            &mut symtab,
            "b.o",
            TestObj::new()
                .section(".text.g", &body, SectionKind::Text)
                .undefined("y")
                .reloc(".text.g", 0, "y", R_PPC_REL24, 0)
                .build(),
        );
        assert_eq!(fold_identical_code(&mut symtab), 0);
    }
}
