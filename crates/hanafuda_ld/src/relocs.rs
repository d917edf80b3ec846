// crates/hanafuda_ld/src/relocs.rs
//
// Applies the static PowerPC relocation set directly into the output
// buffer. Branch displacements that cannot reach their target are
// errors, never silent truncation.

use object::elf::{
    R_PPC_ADDR16_HA, R_PPC_ADDR16_HI, R_PPC_ADDR16_LO, R_PPC_ADDR32, R_PPC_EMB_SDA21, R_PPC_REL14,
    R_PPC_REL24, R_PPC_UADDR32,
};

use crate::config::Config;
use crate::diag::Diagnostics;
use crate::input::InputSymbolDef;
use crate::layout::Layout;
use crate::symbols::{SymbolDef, SymbolTable};

fn get_be32(buf: &[u8], off: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(word)
}

fn put_be32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_be16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

/// Resolved relocation target: a value and, when the target lives in
/// an input section, that section's name (for small-data base
/// selection).
struct Target<'a> {
    value: u32,
    section_name: Option<&'a str>,
}

fn resolve_target<'a>(
    symtab: &'a SymbolTable,
    layout: &Layout,
    object_index: usize,
    symbol_index: usize,
    place: &str,
    diag: &Diagnostics,
) -> Option<Target<'a>> {
    let object = &symtab.objects[object_index];
    let input = &object.symbols[symbol_index];
    if input.global {
        let symbol = match symtab.find(&input.name) {
            Some(symbol) => symbol,
            None => {
                diag.error(format_args!(
                    "undefined symbol: {} (referenced from {})",
                    input.name, place
                ));
                return None;
            }
        };
        match layout.symbol_va(symbol) {
            Some(value) => {
                let section_name = match symbol.def {
                    SymbolDef::Defined {
                        object, section, ..
                    } => Some(symtab.objects[object].sections[section].name.as_str()),
                    _ => None,
                };
                Some(Target {
                    value,
                    section_name,
                })
            }
            None => match symbol.def {
                // Unresolved weak references bind to zero. A lazy
                // entry surviving to this point was only ever weakly
                // referenced, otherwise it would have been extracted.
                SymbolDef::Undefined { weak: true } | SymbolDef::Lazy { .. } => Some(Target {
                    value: 0,
                    section_name: None,
                }),
                SymbolDef::Undefined { weak: false } => {
                    diag.error(format_args!(
                        "undefined symbol: {} (referenced from {})",
                        input.name, place
                    ));
                    None
                }
                _ => {
                    diag.error(format_args!(
                        "{} resolves into a discarded section (referenced from {})",
                        input.name, place
                    ));
                    None
                }
            },
        }
    } else {
        match input.def {
            InputSymbolDef::Section { section, value, .. } => {
                match layout.section_va(object_index, section) {
                    Some(va) => Some(Target {
                        value: va + value,
                        section_name: Some(object.sections[section].name.as_str()),
                    }),
                    None => {
                        diag.error(format_args!(
                            "relocation against discarded section {} in {}",
                            object.sections[section].name, place
                        ));
                        None
                    }
                }
            }
            InputSymbolDef::Absolute { value } => Some(Target {
                value,
                section_name: None,
            }),
            _ => {
                diag.error(format_args!(
                    "relocation against unresolvable local symbol in {}",
                    place
                ));
                None
            }
        }
    }
}

fn small_data_base<'a>(
    cfg: &Config,
    target: &Target<'a>,
    place: &str,
    diag: &Diagnostics,
) -> Option<(u32, u32)> {
    if let Some(name) = target.section_name {
        if name == ".sdata" || name == ".sbss" {
            return Some((13, cfg.sdata_base));
        }
        if name == ".sdata2" || name == ".sbss2" {
            return Some((2, cfg.sdata2_base));
        }
    }
    // Base-image symbols carry no section name: pick whichever base
    // puts the target in reach.
    let fits = |base: u32| {
        let delta = i64::from(target.value) - i64::from(base);
        (-0x8000..0x8000).contains(&delta)
    };
    if cfg.sdata_base != 0 && fits(cfg.sdata_base) {
        return Some((13, cfg.sdata_base));
    }
    if cfg.sdata2_base != 0 && fits(cfg.sdata2_base) {
        return Some((2, cfg.sdata2_base));
    }
    diag.error(format_args!(
        "{:#010x} is not reachable from any small-data base ({})",
        target.value, place
    ));
    None
}

pub fn apply_relocations(
    cfg: &Config,
    symtab: &SymbolTable,
    layout: &Layout,
    buf: &mut [u8],
    diag: &Diagnostics,
) {
    for output in &layout.sections {
        for chunk in &output.chunks {
            let object = &symtab.objects[chunk.object];
            let section = &object.sections[chunk.section];
            for reloc in &section.relocs {
                let place = format!("{}({})", object.name, section.name);
                let target = match resolve_target(
                    symtab,
                    layout,
                    chunk.object,
                    reloc.symbol,
                    &place,
                    diag,
                ) {
                    Some(target) => target,
                    None => continue,
                };
                let value = target.value.wrapping_add(reloc.addend as u32);
                let place_va = chunk.va + reloc.offset;
                let off = (chunk.file_offset + reloc.offset) as usize;
                match reloc.r_type {
                    R_PPC_ADDR32 | R_PPC_UADDR32 => put_be32(buf, off, value),
                    R_PPC_ADDR16_LO => put_be16(buf, off, value as u16),
                    R_PPC_ADDR16_HI => put_be16(buf, off, (value >> 16) as u16),
                    R_PPC_ADDR16_HA => {
                        put_be16(buf, off, ((value >> 16) + ((value >> 15) & 1)) as u16)
                    }
                    R_PPC_REL24 => {
                        let disp = i64::from(value) - i64::from(place_va);
                        if disp % 4 != 0 || !(-0x0200_0000..0x0200_0000).contains(&disp) {
                            diag.error(format_args!(
                                "branch at {:#010x} cannot reach {:#010x} ({})",
                                place_va, value, place
                            ));
                            continue;
                        }
                        let word = get_be32(buf, off);
                        put_be32(buf, off, (word & 0xFC00_0003) | (disp as u32 & 0x03FF_FFFC));
                    }
                    R_PPC_REL14 => {
                        let disp = i64::from(value) - i64::from(place_va);
                        if disp % 4 != 0 || !(-0x8000..0x8000).contains(&disp) {
                            diag.error(format_args!(
                                "conditional branch at {:#010x} cannot reach {:#010x} ({})",
                                place_va, value, place
                            ));
                            continue;
                        }
                        let word = get_be32(buf, off);
                        put_be32(buf, off, (word & 0xFFFF_0003) | (disp as u32 & 0xFFFC));
                    }
                    R_PPC_EMB_SDA21 => {
                        let (reg, base) = match small_data_base(cfg, &target, &place, diag) {
                            Some(pair) => pair,
                            None => continue,
                        };
                        let delta = i64::from(value) - i64::from(base);
                        if !(-0x8000..0x8000).contains(&delta) {
                            diag.error(format_args!(
                                "small-data offset to {:#010x} out of range ({})",
                                value, place
                            ));
                            continue;
                        }
                        let word = get_be32(buf, off);
                        put_be32(
                            buf,
                            off,
                            (word & 0xFFE0_0000) | (reg << 16) | (delta as u32 & 0xFFFF),
                        );
                    }
                    other => diag.error(format_args!(
                        "unsupported relocation type {} in {}",
                        other, place
                    )),
                }
            }
        }
    }
}
