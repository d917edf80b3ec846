// crates/hanafuda_ld/src/writer.rs
//
// Raw-binary emission. The output buffer is zeroed, handed to the
// registered pre-write hook (which may stamp a base image and claim
// header slots), then the new section bytes are overlaid and
// relocated. Nothing reaches disk once an error has been queued.

use std::fs;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::diag::Diagnostics;
use crate::layout::Layout;
use crate::relocs;
use crate::symbols::SymbolTable;

/// Single-method extension point invoked after layout, before the
/// buffer is committed. Implementations report failures through their
/// own diagnostics reference and return early; they must not keep any
/// pointer into `buf` beyond the call.
pub trait PreWriteHook {
    fn pre_write(&self, buf: &mut [u8], layout: &Layout);
}

pub fn write_output(
    cfg: &Config,
    symtab: &SymbolTable,
    layout: &Layout,
    hook: Option<&dyn PreWriteHook>,
    diag: &Diagnostics,
) -> Result<()> {
    if !cfg.oformat_binary {
        diag.error("only raw binary output is supported");
        return Ok(());
    }
    let size = layout.file_size().max(cfg.initial_file_offset) as usize;
    let mut buf = vec![0u8; size];

    if let Some(hook) = hook {
        hook.pre_write(&mut buf, layout);
        if diag.has_errors() {
            return Ok(());
        }
    }

    for output in &layout.sections {
        for chunk in &output.chunks {
            let data = &symtab.objects[chunk.object].sections[chunk.section].data;
            if data.is_empty() {
                continue; // NOBITS stays zero-filled
            }
            let start = chunk.file_offset as usize;
            buf[start..start + data.len()].copy_from_slice(data);
        }
    }

    relocs::apply_relocations(cfg, symtab, layout, &mut buf, diag);
    if diag.has_errors() {
        return Ok(());
    }

    fs::write(&cfg.output_file, &buf)
        .with_context(|| format!("cannot write {}", cfg.output_file.display()))?;
    log::info!("wrote {} ({} bytes)", cfg.output_file.display(), size);
    Ok(())
}
