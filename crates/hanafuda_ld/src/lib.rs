// crates/hanafuda_ld/src/lib.rs
//
// Host linker library: reads ELF32BE/PowerPC relocatable objects and
// archives, resolves symbols, lays output sections out at
// caller-supplied file offsets and virtual addresses, applies the
// static PowerPC relocation set and emits a raw binary image. The
// driver steers it through `Config`/`ScriptConfig` and two extension
// points: a symbol-replacement trigger on the symbol table and a
// pre-write hook on the writer.

pub mod config;
pub mod diag;
pub mod input;
pub mod layout;
pub mod passes;
pub mod relocs;
pub mod script;
pub mod symbols;
#[cfg(test)]
pub(crate) mod testutil;
pub mod writer;

pub use config::{
    Config, EntryPoint, InputSectionDescription, OutputSectionCommand, ScriptConfig, SortPolicy,
    StripPolicy,
};
pub use diag::Diagnostics;
pub use input::{InputFile, ObjectFile};
pub use layout::{Layout, OutputSection};
pub use symbols::{ReplaceDefinedHook, Symbol, SymbolDef, SymbolTable};
pub use writer::PreWriteHook;
