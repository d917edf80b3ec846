// crates/hanafuda_driver/src/driver.rs
//
// Orchestration: read the base DOL, seed the symbol table with its
// symbols, synthesize the four-section linker script, run the host
// linker against the spare regions of the base image, and stamp the
// patched DOL into the output buffer right before it is written.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use hanafuda_dol::{DolImage, SymbolList};
use hanafuda_ld::config::{
    Config, EntryPoint, InputSectionDescription, OutputSectionCommand, ScriptConfig, StripPolicy,
};
use hanafuda_ld::input::read_input_file;
use hanafuda_ld::layout::{assign_addresses, Layout};
use hanafuda_ld::script::collect_input_sections;
use hanafuda_ld::symbols::{ReplaceDefinedHook, SymbolTable};
use hanafuda_ld::writer::{write_output, PreWriteHook};
use hanafuda_ld::{passes, Diagnostics};

use crate::reproduce;

#[derive(Parser)]
#[command(name = "hanafuda-ld")]
#[command(version)]
#[command(about = "Links new PowerPC code and data into a base GameCube/Wii DOL")]
pub struct Cli {
    /// Base DOL image to patch (required)
    #[arg(long = "hanafuda-base-dol", value_name = "PATH")]
    pub base_dol: Option<PathBuf>,

    /// Text file of `<address> <name>` base-image symbols
    #[arg(long = "hanafuda-dol-symbol-list", value_name = "PATH")]
    pub symbol_list: Option<PathBuf>,

    /// Output file
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Entry symbol name or address
    #[arg(short = 'e', long = "entry", value_name = "SYMBOL")]
    pub entry: Option<String>,

    /// Directory to search for -l libraries
    #[arg(short = 'L', value_name = "DIR")]
    pub search_paths: Vec<PathBuf>,

    /// Link against lib<NAME>.a
    #[arg(short = 'l', value_name = "NAME")]
    pub libraries: Vec<String>,

    /// Drop sections unreachable from the liveness roots
    #[arg(long = "gc-sections")]
    pub gc_sections: bool,

    /// Fold identical code sections (all|none)
    #[arg(long = "icf", value_name = "MODE")]
    pub icf: Option<String>,

    /// Route references to SYMBOL at __wrap_SYMBOL
    #[arg(long = "wrap", value_name = "SYMBOL")]
    pub wrap: Vec<String>,

    /// Log symbol-table events for SYMBOL
    #[arg(long = "trace-symbol", value_name = "SYMBOL")]
    pub trace_symbol: Vec<String>,

    /// Force SYMBOL to be entered as undefined
    #[arg(short = 'u', long = "undefined", value_name = "SYMBOL")]
    pub undefined: Vec<String>,

    #[arg(long = "image-base", value_name = "ADDR")]
    pub image_base: Option<String>,

    /// -z keyword[=value] options
    #[arg(short = 'z', value_name = "OPTION")]
    pub z_options: Vec<String>,

    /// Write a reproducer archive to PATH.cpio
    #[arg(long = "reproduce", value_name = "PATH")]
    pub reproduce: Option<PathBuf>,

    /// Input objects and archives
    pub inputs: Vec<PathBuf>,
}

fn parse_int(token: &str) -> Option<u64> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if token.len() > 1 && token.starts_with('0') {
        u64::from_str_radix(&token[1..], 8).ok()
    } else {
        token.parse().ok()
    }
}

/// Entry point. Returns false when any error-severity diagnostic was
/// queued; no output file exists in that case.
pub fn run(cli: &Cli) -> Result<bool> {
    let diag = Diagnostics::new();

    let base_dol = match &cli.base_dol {
        Some(path) => path.clone(),
        None => {
            diag.error("--hanafuda-base-dol=<dol-file> is a required argument of hanafuda-ld");
            return Ok(false);
        }
    };

    let image = match fs::read(&base_dol) {
        Ok(data) => match DolImage::parse(data) {
            Ok(image) => image,
            Err(err) => {
                diag.error(format_args!("{}: {:#}", base_dol.display(), err));
                return Ok(false);
            }
        },
        Err(err) => {
            diag.error(format_args!("cannot read {}: {}", base_dol.display(), err));
            return Ok(false);
        }
    };

    if image.unused_text_index().is_none() || image.unused_data_index().is_none() {
        diag.error(format_args!(
            "unable to allocate additional section data in {}",
            base_dol.display()
        ));
        return Ok(false);
    }

    let reproduce_path = cli
        .reproduce
        .clone()
        .or_else(|| std::env::var_os("LLD_REPRODUCE").map(PathBuf::from));
    if let Some(path) = reproduce_path {
        let args: Vec<String> = std::env::args().collect();
        if let Err(err) = reproduce::write_reproducer(&path, &args) {
            diag.error(format_args!(
                "--reproduce: failed to open {}.cpio: {:#}",
                path.display(),
                err
            ));
        }
    }

    let cfg = match read_configs(cli, &image, &diag) {
        Some(cfg) => cfg,
        None => return Ok(false),
    };
    if diag.has_errors() {
        return Ok(false);
    }

    link(cli, &cfg, image, &diag)?;
    Ok(!diag.has_errors())
}

/// Pin the target and fold the command line into the configuration.
fn read_configs(cli: &Cli, image: &DolImage, diag: &Diagnostics) -> Option<Config> {
    let mut cfg = Config::default();
    cfg.oformat_binary = true;
    cfg.common_alignment = 32;
    cfg.strip = StripPolicy::All;
    cfg.no_implicit_sort = true;
    cfg.rela = false;
    cfg.initial_file_offset = image.unallocated_file_offset();
    cfg.initial_addr_offset = image.unallocated_address_offset();
    cfg.sdata_base = image.sdata_base;
    cfg.sdata2_base = image.sdata2_base;
    cfg.gc_sections = cli.gc_sections;
    cfg.undefined = cli.undefined.clone();
    cfg.wrap = cli.wrap.clone();
    cfg.trace_symbols = cli.trace_symbol.clone();
    if let Some(output) = &cli.output {
        cfg.output_file = output.clone();
    }

    match cli.icf.as_deref() {
        None | Some("none") => {}
        Some("all") => cfg.icf = true,
        Some(other) => {
            diag.error(format_args!("unknown --icf value: {}", other));
            return None;
        }
    }

    // `-e` accepts either a symbol name or a raw address.
    if let Some(entry) = &cli.entry {
        cfg.entry = match parse_int(entry) {
            Some(addr) => EntryPoint::Address(addr as u32),
            None => EntryPoint::Symbol(entry.clone()),
        };
    }

    if let Some(value) = &cli.image_base {
        match parse_int(value) {
            Some(base) => {
                cfg.image_base = base;
                if base % cfg.max_page_size != 0 {
                    diag.warn("--image-base: address isn't multiple of page size");
                }
            }
            None => diag.error(format_args!(
                "--image-base: number expected, but got {}",
                value
            )),
        }
    }

    for option in &cli.z_options {
        if let Some(value) = option.strip_prefix("max-page-size=") {
            match parse_int(value) {
                Some(size) if size.is_power_of_two() => cfg.max_page_size = size,
                _ => diag.error("max-page-size: value isn't a power of 2"),
            }
        } else {
            log::debug!("ignoring -z {}", option);
        }
    }

    Some(cfg)
}

/// The synthesized script: small-data first, then patch text and
/// everything else. `.htext` is forced past the base image's highest
/// allocated address; every section starts on a fresh 32-byte
/// boundary.
fn build_script(image: &DolImage) -> ScriptConfig {
    let align32: fn(u64) -> u64 = |dot| (dot + 31) & !31;

    let mut sdata = OutputSectionCommand::new(".sdata");
    sdata
        .inputs
        .push(InputSectionDescription::new("*", &[".sdata", ".sbss"]));
    sdata.addr_expr = Some(Box::new(align32));

    let mut sdata2 = OutputSectionCommand::new(".sdata2");
    sdata2
        .inputs
        .push(InputSectionDescription::new("*", &[".sdata2", ".sbss2"]));
    sdata2.addr_expr = Some(Box::new(align32));

    let mut htext = OutputSectionCommand::new(".htext");
    htext
        .inputs
        .push(InputSectionDescription::new("*", &[".text", ".text.*"]));
    let base = u64::from(image.unallocated_address_offset());
    htext.addr_expr = Some(Box::new(move |dot| (dot.max(base) | 31) + 1));

    let mut hdata = OutputSectionCommand::new(".hdata");
    hdata.inputs.push(InputSectionDescription::new(
        "*",
        &[".data", ".data.*", ".rodata", ".rodata.*", ".bss"],
    ));
    hdata.addr_expr = Some(Box::new(align32));

    ScriptConfig {
        has_sections: true,
        commands: vec![sdata, sdata2, htext, hdata],
    }
}

fn find_library(search_paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    search_paths
        .iter()
        .map(|dir| dir.join(format!("lib{}.a", name)))
        .find(|path| path.exists())
}

/// Records base symbols that input objects redefined; the new
/// addresses only exist after layout, so patching is deferred to the
/// pre-write hook.
struct PatchRecorder<'a> {
    pending: &'a RefCell<Vec<(String, u32)>>,
}

impl ReplaceDefinedHook for PatchRecorder<'_> {
    fn on_replace(&self, name: &str, old_value: u32) {
        log::debug!(
            "{} redefined, calls to {:#010x} will be retargeted",
            name,
            old_value
        );
        self.pending.borrow_mut().push((name.to_string(), old_value));
    }
}

struct DolPreWrite<'a, 'd> {
    image: &'a RefCell<DolImage>,
    pending: &'a RefCell<Vec<(String, u32)>>,
    symtab: &'a SymbolTable<'d>,
    diag: &'a Diagnostics,
}

impl PreWriteHook for DolPreWrite<'_, '_> {
    fn pre_write(&self, buf: &mut [u8], layout: &Layout) {
        let mut image = self.image.borrow_mut();

        // Claim DOL header slots for the sections the host placed.
        // Sections other than .sdata/.sdata2/.htext accumulate into a
        // single patch-data slot; the host emits them in ascending VA
        // order, so extending the length covers them all.
        let mut patch_data: Option<usize> = None;
        for section in &layout.sections {
            if section.file_offset == 0 {
                continue;
            }
            match section.name.as_str() {
                ".sdata" | ".sdata2" => match image.unused_data_index() {
                    Some(index) => {
                        let slot = image.data_section_mut(index);
                        slot.file_offset = section.file_offset;
                        slot.load_addr = section.va;
                        slot.length = section.size;
                    }
                    None => {
                        self.diag.error(format_args!(
                            "ran out of DOL data sections for {}",
                            section.name
                        ));
                        return;
                    }
                },
                ".htext" => match image.unused_text_index() {
                    Some(index) => {
                        let slot = image.text_section_mut(index);
                        slot.file_offset = section.file_offset;
                        slot.load_addr = section.va;
                        slot.length = section.size;
                    }
                    None => {
                        self.diag.error(format_args!(
                            "ran out of DOL text sections for {}",
                            section.name
                        ));
                        return;
                    }
                },
                _ => match patch_data {
                    Some(index) => {
                        let slot = image.data_section_mut(index);
                        slot.length = (section.va - slot.load_addr) + section.size;
                    }
                    None => match image.unused_data_index() {
                        Some(index) => {
                            patch_data = Some(index);
                            let slot = image.data_section_mut(index);
                            slot.file_offset = section.file_offset;
                            slot.load_addr = section.va;
                            slot.length = section.size;
                        }
                        None => {
                            self.diag.error(format_args!(
                                "ran out of DOL data sections for {}",
                                section.name
                            ));
                            return;
                        }
                    },
                },
            }
        }

        // Retarget base-image calls at their replacement definitions.
        for (name, old_va) in self.pending.borrow().iter() {
            let new_va = self
                .symtab
                .find(name)
                .and_then(|symbol| layout.symbol_va(symbol));
            let new_va = match new_va {
                Some(va) => va,
                None => {
                    self.diag.error(format_args!(
                        "{} replaced a base symbol but received no address",
                        name
                    ));
                    return;
                }
            };
            log::info!("{}: {:#010x} -> {:#010x}", name, old_va, new_va);
            if let Err(err) = image.retarget_calls(*old_va, new_va) {
                self.diag.error(format_args!("{}: {:#}", name, err));
                return;
            }
        }

        // Stamp the (possibly patched) base image; the host overlays
        // the new section bytes on top after this returns.
        image.write_to(buf);
    }
}

fn link(cli: &Cli, cfg: &Config, image: DolImage, diag: &Diagnostics) -> Result<()> {
    log::debug!("target {} cpu {}", cfg.triple, cfg.cpu);

    let pending = RefCell::new(Vec::new());
    let recorder = PatchRecorder { pending: &pending };
    let mut symtab = SymbolTable::new(diag);
    symtab.set_replace_hook(&recorder);
    for name in &cfg.trace_symbols {
        symtab.trace(name);
    }

    // Base-image symbols become absolute entries tagged with the
    // section that contains them; addresses outside every section are
    // dropped.
    if let Some(list_path) = &cli.symbol_list {
        match fs::read_to_string(list_path) {
            Ok(text) => {
                let list = SymbolList::parse(&text);
                let mut kept = 0usize;
                for (addr, name) in list.iter() {
                    match image.validate_symbol_addr(addr) {
                        Some(tag) => {
                            symtab.add_absolute(name, addr, Some(tag));
                            kept += 1;
                        }
                        None => log::debug!(
                            "symbol list: {} at {:#010x} is outside the base image",
                            name,
                            addr
                        ),
                    }
                }
                log::debug!("symbol list: kept {} of {} entries", kept, list.len());
            }
            Err(err) => diag.error(format_args!(
                "cannot read {}: {}",
                list_path.display(),
                err
            )),
        }
    }

    let script = build_script(&image);

    for path in &cli.inputs {
        match read_input_file(path) {
            Ok(file) => symtab.add_file(file),
            Err(err) => diag.error(format_args!("{:#}", err)),
        }
    }
    for name in &cli.libraries {
        match find_library(&cli.search_paths, name) {
            Some(path) => match read_input_file(&path) {
                Ok(file) => symtab.add_file(file),
                Err(err) => diag.error(format_args!("{:#}", err)),
            },
            None => diag.error(format_args!("unable to find library -l{}", name)),
        }
    }

    // The entry stays undefined to force archive extraction. The DOL
    // keeps the base image's entry point either way.
    let entry_name = match &cfg.entry {
        EntryPoint::Default => Some("_start".to_string()),
        EntryPoint::Symbol(name) => Some(name.clone()),
        EntryPoint::Address(_) => None,
    };
    if let Some(name) = &entry_name {
        if symtab.find(name).is_some() {
            symtab.add_undefined(name);
        } else {
            log::warn!("cannot find entry symbol {}", name);
        }
    }

    if diag.has_errors() {
        return Ok(()); // duplicate symbols or unreadable inputs
    }

    symtab.scan_undefined_flags(&cfg.undefined);
    for name in &cfg.wrap {
        symtab.wrap(name);
    }

    if cfg.gc_sections {
        let mut roots: Vec<String> = Vec::new();
        roots.extend(entry_name.iter().cloned());
        roots.extend(cfg.undefined.iter().cloned());
        // Replacements for base symbols are reachable from the base
        // image itself.
        roots.extend(pending.borrow().iter().map(|(name, _)| name.clone()));
        passes::mark_live(&mut symtab, &roots);
    }
    if cfg.icf {
        passes::fold_identical_code(&mut symtab);
    }

    let collected = collect_input_sections(&script, &symtab);
    let layout = assign_addresses(cfg, &script, &collected, &symtab);

    let image = RefCell::new(image);
    let hook = DolPreWrite {
        image: &image,
        pending: &pending,
        symtab: &symtab,
        diag,
    };
    write_output(cfg, &symtab, &layout, Some(&hook), diag)
}
