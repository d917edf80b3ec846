// crates/hanafuda_ld/src/config.rs
//
// Link-wide configuration and the programmatic linker script. Both are
// fully populated by the driver before symbol resolution starts.

use std::path::PathBuf;

use target_lexicon::{Architecture, BinaryFormat, Environment, OperatingSystem, Triple, Vendor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// `_start` unless overridden.
    Default,
    Symbol(String),
    Address(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripPolicy {
    None,
    All,
}

pub struct Config {
    pub triple: Triple,
    pub cpu: String,
    pub emachine: u16,
    pub entry: EntryPoint,
    pub output_file: PathBuf,
    /// Emit a raw image instead of an ELF.
    pub oformat_binary: bool,
    pub image_base: u64,
    pub max_page_size: u64,
    pub common_alignment: u32,
    /// File offset at which the first output section may be placed.
    pub initial_file_offset: u32,
    /// Virtual address at which the location counter starts.
    pub initial_addr_offset: u32,
    pub strip: StripPolicy,
    pub no_implicit_sort: bool,
    pub gc_sections: bool,
    pub icf: bool,
    pub rela: bool,
    pub sdata_base: u32,
    pub sdata2_base: u32,
    /// `-u` names: kept undefined to force archive extraction and
    /// treated as liveness roots.
    pub undefined: Vec<String>,
    pub wrap: Vec<String>,
    pub trace_symbols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            triple: Triple {
                architecture: Architecture::Powerpc,
                vendor: Vendor::Unknown,
                operating_system: OperatingSystem::None_,
                environment: Environment::Eabi,
                binary_format: BinaryFormat::Elf,
            },
            cpu: "750cl".to_string(),
            emachine: object::elf::EM_PPC,
            entry: EntryPoint::Default,
            output_file: PathBuf::from("a.out"),
            oformat_binary: false,
            image_base: 0,
            max_page_size: 4096,
            common_alignment: 1,
            initial_file_offset: 0,
            initial_addr_offset: 0,
            strip: StripPolicy::None,
            no_implicit_sort: false,
            gc_sections: false,
            icf: false,
            rela: false,
            sdata_base: 0,
            sdata2_base: 0,
            undefined: Vec::new(),
            wrap: Vec::new(),
            trace_symbols: Vec::new(),
        }
    }
}

/// Address expression applied to the location counter before an output
/// section is placed.
pub type AddrExpr = Box<dyn Fn(u64) -> u64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortPolicy {
    /// Preserve input order.
    #[default]
    None,
    ByName,
}

/// One `pattern (globs)` clause of an output-section description.
pub struct InputSectionDescription {
    pub file_pattern: String,
    pub section_globs: Vec<String>,
    pub sort_outer: SortPolicy,
    pub sort_inner: SortPolicy,
}

impl InputSectionDescription {
    pub fn new(file_pattern: &str, globs: &[&str]) -> Self {
        InputSectionDescription {
            file_pattern: file_pattern.to_string(),
            section_globs: globs.iter().map(|g| g.to_string()).collect(),
            sort_outer: SortPolicy::None,
            sort_inner: SortPolicy::None,
        }
    }
}

pub struct OutputSectionCommand {
    pub name: String,
    pub inputs: Vec<InputSectionDescription>,
    pub addr_expr: Option<AddrExpr>,
}

impl OutputSectionCommand {
    pub fn new(name: &str) -> Self {
        OutputSectionCommand {
            name: name.to_string(),
            inputs: Vec::new(),
            addr_expr: None,
        }
    }
}

#[derive(Default)]
pub struct ScriptConfig {
    pub has_sections: bool,
    pub commands: Vec<OutputSectionCommand>,
}
