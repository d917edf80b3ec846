// crates/hanafuda_dol/src/patch.rs
//
// In-place retargeting of recorded call sites. When a base-image
// symbol is redefined by freshly linked code, every `bl` that used to
// reach the old address is re-encoded to reach the new one.

use anyhow::{bail, Result};

use crate::dol::DolImage;

// b/bc displacement reach in bytes
const B_RANGE: i64 = 0x0200_0000; // +/- 32 MiB
const BC_RANGE: i64 = 0x0000_8000; // +/- 32 KiB

fn be32(buf: &[u8], off: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(word)
}

fn check_range(disp: i64, range: i64, site_va: u32, new_va: u32) -> Result<()> {
    if disp % 4 != 0 {
        bail!(
            "call at {:#010x} cannot reach {:#010x}: unaligned displacement",
            site_va,
            new_va
        );
    }
    if disp < -range || disp >= range {
        bail!(
            "call at {:#010x} cannot reach {:#010x}: displacement {:#x} out of range",
            site_va,
            new_va,
            disp
        );
    }
    Ok(())
}

impl DolImage {
    /// Rewrite every recorded call to `old_va` so it targets `new_va`.
    /// Returns the number of rewritten sites. Fails loudly when a site
    /// no longer decodes as a direct call or the new target is out of
    /// the displacement's reach.
    pub fn retarget_calls(&mut self, old_va: u32, new_va: u32) -> Result<usize> {
        let sites: Vec<u32> = self.call_sites.call_sites(old_va).to_vec();
        for &offset in &sites {
            let site_va = match self.file_offset_to_va(offset) {
                Some(va) => va,
                None => bail!("call site at file offset {:#x} is outside the image", offset),
            };
            let word = be32(&self.data, offset as usize);
            if word & 1 == 0 {
                bail!(
                    "instruction at {:#010x} no longer links (code {:#010x})",
                    site_va,
                    word
                );
            }
            if word & 2 != 0 {
                bail!(
                    "absolute-addressed call at {:#010x} cannot be retargeted",
                    site_va
                );
            }
            let disp = i64::from(new_va) - i64::from(site_va);
            let patched = match word >> 26 {
                18 => {
                    check_range(disp, B_RANGE, site_va, new_va)?;
                    (word & 0xFC00_0003) | (disp as u32 & 0x03FF_FFFC)
                }
                16 => {
                    check_range(disp, BC_RANGE, site_va, new_va)?;
                    (word & 0xFFFF_0003) | (disp as u32 & 0xFFFC)
                }
                _ => bail!(
                    "instruction at {:#010x} is not a direct call (code {:#010x})",
                    site_va,
                    word
                ),
            };
            let off = offset as usize;
            self.data[off..off + 4].copy_from_slice(&patched.to_be_bytes());
            log::debug!(
                "retargeted call at {:#010x}: {:#010x} -> {:#010x}",
                site_va,
                old_va,
                new_va
            );
        }
        Ok(sites.len())
    }
}
