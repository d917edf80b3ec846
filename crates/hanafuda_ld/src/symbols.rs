// crates/hanafuda_ld/src/symbols.rs
//
// Global symbol table. Resolution is last-definition-wins only where
// ELF says so: strong definitions beat weak ones and commons, commons
// merge by size, lazy archive members extract on the first strong
// undefined reference. Absolute symbols can carry a base-image section
// tag; when an input object redefines one, the registered
// replace-trigger fires with the old value before the entry is
// rewritten.

use std::collections::{HashMap, HashSet};

use hanafuda_dol::SectionRef;

use crate::diag::Diagnostics;
use crate::input::{Archive, InputFile, InputSymbolDef, ObjectFile};

/// Single-method extension point, registered by reference before any
/// input file is added.
pub trait ReplaceDefinedHook {
    fn on_replace(&self, name: &str, old_value: u32);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolDef {
    Undefined {
        weak: bool,
    },
    /// Defined by an archive member that has not been extracted.
    Lazy {
        archive: usize,
        member: usize,
    },
    Common {
        size: u32,
        align: u32,
    },
    /// A fixed address. `tag` classifies base-image symbols.
    Absolute {
        value: u32,
        weak: bool,
        tag: Option<SectionRef>,
    },
    Defined {
        object: usize,
        section: usize,
        value: u32,
        size: u32,
        weak: bool,
    },
}

impl SymbolDef {
    fn is_undefined(&self) -> bool {
        matches!(self, SymbolDef::Undefined { .. } | SymbolDef::Lazy { .. })
    }

    fn is_weak(&self) -> bool {
        match self {
            SymbolDef::Undefined { weak } => *weak,
            SymbolDef::Absolute { weak, .. } => *weak,
            SymbolDef::Defined { weak, .. } => *weak,
            _ => false,
        }
    }
}

pub struct Symbol {
    pub name: String,
    pub def: SymbolDef,
}

pub struct SymbolTable<'a> {
    pub symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
    pub objects: Vec<ObjectFile>,
    archives: Vec<Archive>,
    traced: HashSet<String>,
    hook: Option<&'a dyn ReplaceDefinedHook>,
    diag: &'a Diagnostics,
}

impl<'a> SymbolTable<'a> {
    pub fn new(diag: &'a Diagnostics) -> Self {
        SymbolTable {
            symbols: Vec::new(),
            by_name: HashMap::new(),
            objects: Vec::new(),
            archives: Vec::new(),
            traced: HashSet::new(),
            hook: None,
            diag,
        }
    }

    pub fn set_replace_hook(&mut self, hook: &'a dyn ReplaceDefinedHook) {
        self.hook = Some(hook);
    }

    pub fn trace(&mut self, name: &str) {
        self.traced.insert(name.to_string());
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&index| &self.symbols[index])
    }

    fn note(&self, name: &str, what: impl std::fmt::Display) {
        if self.traced.contains(name) {
            log::info!("trace: {}: {}", name, what);
        }
    }

    /// Index of the entry for `name`, creating a fresh one. The second
    /// element is true when the entry already existed.
    fn entry(&mut self, name: &str) -> (usize, bool) {
        if let Some(&index) = self.by_name.get(name) {
            return (index, true);
        }
        let index = self.symbols.len();
        self.symbols.push(Symbol {
            name: name.to_string(),
            def: SymbolDef::Undefined { weak: true },
        });
        self.by_name.insert(name.to_string(), index);
        (index, false)
    }

    pub fn add_file(&mut self, file: InputFile) {
        match file {
            InputFile::Object(object) => {
                let index = self.objects.len();
                self.objects.push(*object);
                self.register_object(index);
            }
            InputFile::Archive(archive) => {
                let archive_index = self.archives.len();
                let lazies: Vec<(usize, Vec<String>)> = archive
                    .members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        (
                            i,
                            m.as_ref().map(|m| m.defined.clone()).unwrap_or_default(),
                        )
                    })
                    .collect();
                self.archives.push(archive);
                for (member, defined) in lazies {
                    for name in defined {
                        self.add_lazy(&name, archive_index, member);
                    }
                }
            }
        }
    }

    /// Inject a base-image symbol at a fixed address. Last write wins.
    pub fn add_absolute(&mut self, name: &str, value: u32, tag: Option<SectionRef>) {
        let (index, existed) = self.entry(name);
        if existed && !self.symbols[index].def.is_undefined() {
            match self.symbols[index].def {
                SymbolDef::Absolute { .. } => {}
                _ => {
                    log::debug!("{}: already defined, keeping existing definition", name);
                    return;
                }
            }
        }
        self.symbols[index].def = SymbolDef::Absolute {
            value,
            weak: false,
            tag,
        };
        self.note(name, format_args!("absolute {:#010x}", value));
    }

    /// Reference `name` without defining it; extracts a lazy archive
    /// member when one provides it.
    pub fn add_undefined(&mut self, name: &str) {
        let (index, _) = self.entry(name);
        match self.symbols[index].def {
            SymbolDef::Undefined { ref mut weak } => *weak = false,
            SymbolDef::Lazy { archive, member } => {
                self.symbols[index].def = SymbolDef::Undefined { weak: false };
                self.extract(archive, member);
            }
            _ => {}
        }
    }

    /// `-u` names become strong undefined references.
    pub fn scan_undefined_flags(&mut self, names: &[String]) {
        for name in names {
            self.add_undefined(name);
        }
    }

    /// Redirect references to `name` at the wrapper and keep the
    /// original definition reachable as `__real_<name>`.
    pub fn wrap(&mut self, name: &str) {
        let symbol = self.by_name.get(name).copied();
        let wrapper = self.by_name.get(&format!("__wrap_{}", name)).copied();
        let real = self.by_name.get(&format!("__real_{}", name)).copied();
        if let (Some(symbol), Some(wrapper)) = (symbol, wrapper) {
            let original = self.symbols[symbol].def.clone();
            self.symbols[symbol].def = self.symbols[wrapper].def.clone();
            if let Some(real) = real {
                self.symbols[real].def = original;
            }
            self.note(name, "wrapped");
        }
    }

    fn add_lazy(&mut self, name: &str, archive: usize, member: usize) {
        let (index, existed) = self.entry(name);
        if !existed {
            self.symbols[index].def = SymbolDef::Lazy { archive, member };
            return;
        }
        match self.symbols[index].def {
            SymbolDef::Undefined { weak: false } => {
                self.extract(archive, member);
            }
            // A weak reference alone does not pull the member in, but
            // a later strong one must still find it.
            SymbolDef::Undefined { weak: true } => {
                self.symbols[index].def = SymbolDef::Lazy { archive, member };
            }
            _ => {}
        }
    }

    fn extract(&mut self, archive: usize, member: usize) {
        let taken = self.archives[archive].members[member].take();
        let lazy = match taken {
            Some(lazy) => lazy,
            None => return, // already extracted
        };
        log::debug!("extracting {}", lazy.object.name);
        let index = self.objects.len();
        self.objects.push(lazy.object);
        self.register_object(index);
    }

    fn register_object(&mut self, object_index: usize) {
        let globals: Vec<(String, bool, InputSymbolDef)> = self.objects[object_index]
            .symbols
            .iter()
            .filter(|s| s.global && !s.name.is_empty())
            .map(|s| (s.name.clone(), s.weak, s.def.clone()))
            .collect();
        let object_name = self.objects[object_index].name.clone();
        for (name, weak, def) in globals {
            match def {
                InputSymbolDef::Undefined => self.resolve_undefined(&name, weak),
                InputSymbolDef::Common { size, align } => self.resolve_common(&name, size, align),
                InputSymbolDef::Absolute { value } => self.resolve_defined(
                    &name,
                    &object_name,
                    SymbolDef::Absolute {
                        value,
                        weak,
                        tag: None,
                    },
                ),
                InputSymbolDef::Section {
                    section,
                    value,
                    size,
                } => self.resolve_defined(
                    &name,
                    &object_name,
                    SymbolDef::Defined {
                        object: object_index,
                        section,
                        value,
                        size,
                        weak,
                    },
                ),
            }
        }
    }

    fn resolve_undefined(&mut self, name: &str, weak: bool) {
        let (index, _) = self.entry(name);
        match self.symbols[index].def {
            SymbolDef::Undefined { weak: ref mut w } => *w = *w && weak,
            SymbolDef::Lazy { archive, member } => {
                if !weak {
                    self.symbols[index].def = SymbolDef::Undefined { weak: false };
                    self.extract(archive, member);
                }
            }
            _ => {}
        }
    }

    fn resolve_common(&mut self, name: &str, size: u32, align: u32) {
        let (index, _) = self.entry(name);
        match self.symbols[index].def {
            SymbolDef::Undefined { .. } | SymbolDef::Lazy { .. } => {
                self.symbols[index].def = SymbolDef::Common { size, align };
                self.note(name, format_args!("common, {} bytes", size));
            }
            SymbolDef::Common {
                size: ref mut old_size,
                align: ref mut old_align,
            } => {
                *old_size = (*old_size).max(size);
                *old_align = (*old_align).max(align);
            }
            // Commons yield to real definitions, except weak ones.
            ref def if def.is_weak() => {
                self.symbols[index].def = SymbolDef::Common { size, align };
            }
            _ => {}
        }
    }

    fn resolve_defined(&mut self, name: &str, object_name: &str, new: SymbolDef) {
        let new_weak = new.is_weak();
        let (index, _) = self.entry(name);
        let fire = match &self.symbols[index].def {
            // Commons beat weak definitions in either arrival order.
            SymbolDef::Common { .. } if new_weak => return,
            SymbolDef::Undefined { .. } | SymbolDef::Lazy { .. } | SymbolDef::Common { .. } => {
                // Definitions beat references, lazies and commons.
                None
            }
            _ if new_weak => return,
            old if old.is_weak() => None,
            SymbolDef::Absolute { value, .. } => Some(*value),
            SymbolDef::Defined { .. } => {
                self.diag.error(format_args!(
                    "duplicate symbol: {} (defined again in {})",
                    name, object_name
                ));
                return;
            }
        };
        if let Some(old_value) = fire {
            self.note(
                name,
                format_args!("replacing base definition {:#010x}", old_value),
            );
            if let Some(hook) = self.hook {
                hook.on_replace(name, old_value);
            }
        }
        self.note(name, format_args!("defined in {}", object_name));
        self.symbols[index].def = new;
    }
}
