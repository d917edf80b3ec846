// crates/hanafuda_driver/src/lib.rs
//
// hanafuda-ld merges freshly compiled PowerPC objects into a shipped
// GameCube/Wii DOL without moving anything the base image already
// placed: new output sections land in the DOL's spare header slots at
// addresses above the allocated image, and calls to redefined base
// symbols are rewritten in place.

mod driver;
mod reproduce;

pub use driver::{run, Cli};
