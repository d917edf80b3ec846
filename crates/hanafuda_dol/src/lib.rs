// crates/hanafuda_dol/src/lib.rs
//
// Base-image side of the hanafuda patching pipeline:
// - `dol`: in-memory model of a GameCube/Wii DOL executable
// - `scan`: linear 750CL disassembly of the text sections (SDK base
//   recovery + call-site indexing)
// - `symlist`: the `<address> <name>` symbol map format
// - `patch`: in-place retargeting of recorded call sites

pub mod dol;
pub mod patch;
pub mod scan;
pub mod symlist;

pub use dol::{DolImage, DolSection, SectionRef, DATA_SLOTS, HEADER_SIZE, TEXT_SLOTS};
pub use scan::CallSiteIndex;
pub use symlist::SymbolList;
