// crates/hanafuda_dol/src/scan.rs
//
// Linear 750CL disassembly of the base image's text sections. Two
// things are recovered in a single pass:
// - the SDK base pointers loaded into r1/r2/r13 by the `.init`
//   prologue (`lis` upper half, `ori` lower half, matched
//   per-instruction with no pairing, like the SDK crt0 lays them out)
// - every direct call (`bl`/`bcl` family), indexed by target virtual
//   address so redefined symbols can be re-pointed later

use std::collections::BTreeMap;

use ppc750cl::{InsIter, Opcode};

use crate::dol::{DolSection, TEXT_SLOTS};

const SP: u32 = 1; // stack pointer
const RTOC2: u32 = 2; // .sdata2 base
const SDA: u32 = 13; // .sdata base

/// Multimap from call-target virtual address to the file offsets of
/// the calling instructions. Populated once during the scan, read-only
/// afterwards.
#[derive(Debug, Default)]
pub struct CallSiteIndex {
    sites: BTreeMap<u32, Vec<u32>>,
}

impl CallSiteIndex {
    fn insert(&mut self, target: u32, file_offset: u32) {
        self.sites.entry(target).or_default().push(file_offset);
    }

    /// File offsets of every recorded call to `target`, in scan order.
    pub fn call_sites(&self, target: u32) -> &[u32] {
        self.sites.get(&target).map_or(&[], Vec::as_slice)
    }

    pub fn target_count(&self) -> usize {
        self.sites.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u32])> {
        self.sites.iter().map(|(&va, offs)| (va, offs.as_slice()))
    }
}

pub(crate) struct ScanResult {
    pub stack_base: u32,
    pub sdata_base: u32,
    pub sdata2_base: u32,
    pub call_sites: CallSiteIndex,
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

/// Target virtual address of a direct branch that sets LK, if `ins`
/// is one.
pub(crate) fn direct_call_target(op: Opcode, code: u32, pc: u32) -> Option<u32> {
    if code & 1 == 0 {
        return None; // does not define LR
    }
    let displacement = match op {
        Opcode::B => sign_extend(code & 0x03FF_FFFC, 26),
        Opcode::Bc => sign_extend(code & 0xFFFC, 16),
        _ => return None, // bclrl/bcctrl carry no immediate target
    };
    let absolute = code & 2 != 0;
    if absolute {
        Some(displacement as u32)
    } else {
        Some(pc.wrapping_add(displacement as u32))
    }
}

pub(crate) fn scan_text_sections(data: &[u8], texts: &[DolSection; TEXT_SLOTS]) -> ScanResult {
    let mut result = ScanResult {
        stack_base: 0,
        sdata_base: 0,
        sdata2_base: 0,
        call_sites: CallSiteIndex::default(),
    };

    for (slot_index, slot) in texts.iter().enumerate() {
        if !slot.is_occupied() {
            continue;
        }
        let start = slot.file_offset as usize;
        let bytes = &data[start..start + slot.length as usize];

        for (pc, ins) in InsIter::new(bytes, slot.load_addr) {
            if ins.op == Opcode::Illegal {
                continue; // tolerate illegible words
            }

            // Base-pointer loads only count inside the first text
            // section (`.init` under the Dolphin layout). Upper and
            // lower halves are taken as they come; a stray `ori` to
            // one of the three registers clobbers the low half.
            if slot_index == 0 {
                match ins.op {
                    Opcode::Addis if (ins.code >> 16) & 0x1F == 0 => {
                        let rd = (ins.code >> 21) & 0x1F;
                        let upper = (ins.code & 0xFFFF) << 16;
                        match rd {
                            SP => result.stack_base = upper,
                            RTOC2 => result.sdata2_base = upper,
                            SDA => result.sdata_base = upper,
                            _ => {}
                        }
                    }
                    Opcode::Ori => {
                        let ra = (ins.code >> 16) & 0x1F;
                        let lower = ins.code & 0xFFFF;
                        match ra {
                            SP => result.stack_base |= lower,
                            RTOC2 => result.sdata2_base |= lower,
                            SDA => result.sdata_base |= lower,
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }

            if let Some(target) = direct_call_target(ins.op, ins.code, pc) {
                let file_offset = slot.file_offset + (pc - slot.load_addr);
                result.call_sites.insert(target, file_offset);
            }
        }
    }

    log::debug!(
        "scan: {} distinct call targets",
        result.call_sites.target_count()
    );
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `lis rd, imm` == `addis rd, 0, imm`
    pub(crate) fn lis(rd: u32, imm: u32) -> u32 {
        (15 << 26) | (rd << 21) | (imm & 0xFFFF)
    }

    /// `ori ra, rs, imm`
    pub(crate) fn ori(ra: u32, rs: u32, imm: u32) -> u32 {
        (24 << 26) | (rs << 21) | (ra << 16) | (imm & 0xFFFF)
    }

    /// `bl target` encoded at `pc`
    pub(crate) fn bl(pc: u32, target: u32) -> u32 {
        let disp = target.wrapping_sub(pc);
        (18 << 26) | (disp & 0x03FF_FFFC) | 1
    }

    /// `b target` (no link) encoded at `pc`
    pub(crate) fn b(pc: u32, target: u32) -> u32 {
        (18 << 26) | (target.wrapping_sub(pc) & 0x03FF_FFFC)
    }

    fn words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    fn scan(text0: &[u32], addr: u32) -> ScanResult {
        let mut texts = [DolSection::default(); TEXT_SLOTS];
        let mut data = vec![0u8; 0x100];
        data.extend(words(text0));
        texts[0] = DolSection {
            file_offset: 0x100,
            load_addr: addr,
            length: (text0.len() * 4) as u32,
        };
        scan_text_sections(&data, &texts)
    }

    #[test]
    fn recovers_sdk_bases() {
        let result = scan(
            &[
                lis(1, 0x8040),
                ori(1, 1, 0x1234),
                lis(13, 0x8050),
                ori(13, 13, 0x00A0),
                lis(2, 0x8051),
                ori(2, 2, 0x7FE0),
            ],
            0x8000_3100,
        );
        assert_eq!(result.stack_base, 0x8040_1234);
        assert_eq!(result.sdata_base, 0x8050_00A0);
        assert_eq!(result.sdata2_base, 0x8051_7FE0);
    }

    #[test]
    fn unrelated_registers_are_ignored() {
        let result = scan(&[lis(4, 0x8040), ori(4, 4, 0x1234)], 0x8000_3100);
        assert_eq!(result.stack_base, 0);
        assert_eq!(result.sdata_base, 0);
        assert_eq!(result.sdata2_base, 0);
    }

    #[test]
    fn stray_ori_clobbers_low_half() {
        // No pair matching: the second ori wins.
        let result = scan(
            &[lis(1, 0x8040), ori(1, 1, 0x1234), ori(1, 5, 0x00FF)],
            0x8000_3100,
        );
        assert_eq!(result.stack_base, 0x8040_13FF);
    }

    #[test]
    fn indexes_direct_calls() {
        let result = scan(
            &[
                lis(1, 0x8040),
                ori(1, 1, 0x1234),
                bl(0x8000_3108, 0x8000_3200),
                b(0x8000_310C, 0x8000_3200),
                bl(0x8000_3110, 0x8000_3200),
            ],
            0x8000_3100,
        );
        // Plain `b` defines no LR and is not a call.
        assert_eq!(result.call_sites.call_sites(0x8000_3200), &[0x108, 0x110]);
        assert_eq!(result.call_sites.target_count(), 1);
    }

    #[test]
    fn backward_calls_resolve() {
        let result = scan(
            &[b(0x8000_3100, 0x8000_3108), bl(0x8000_3104, 0x8000_3100)],
            0x8000_3100,
        );
        assert_eq!(result.call_sites.call_sites(0x8000_3100), &[0x104]);
    }

    #[test]
    fn illegible_words_are_skipped() {
        // All-zero words do not decode on the 750.
        let result = scan(&[0x0000_0000, bl(0x8000_3104, 0x8000_3000)], 0x8000_3100);
        assert_eq!(result.call_sites.call_sites(0x8000_3000), &[0x104]);
    }
}
