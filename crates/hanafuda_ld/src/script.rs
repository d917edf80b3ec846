// crates/hanafuda_ld/src/script.rs
//
// Evaluates the programmatic linker script: matches input sections
// against the output-section commands' glob patterns, in script order,
// first match wins.

use std::collections::HashSet;

use crate::config::{ScriptConfig, SortPolicy};
use crate::symbols::SymbolTable;

/// `*` matches any run, `?` a single character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Input sections collected for each command, parallel to
/// `script.commands`, as `(object, section)` pairs.
pub fn collect_input_sections(
    script: &ScriptConfig,
    symtab: &SymbolTable,
) -> Vec<Vec<(usize, usize)>> {
    let mut claimed: HashSet<(usize, usize)> = HashSet::new();
    let mut collected = Vec::with_capacity(script.commands.len());
    for command in &script.commands {
        let mut inputs: Vec<(usize, usize)> = Vec::new();
        for description in &command.inputs {
            let mut matched: Vec<(usize, usize)> = Vec::new();
            for (object_index, object) in symtab.objects.iter().enumerate() {
                if !glob_match(&description.file_pattern, &object.name) {
                    continue;
                }
                for (section_index, section) in object.sections.iter().enumerate() {
                    let key = (object_index, section_index);
                    if !section.alloc
                        || !section.live
                        || section.folded_into.is_some()
                        || claimed.contains(&key)
                    {
                        continue;
                    }
                    if description
                        .section_globs
                        .iter()
                        .any(|glob| glob_match(glob, &section.name))
                    {
                        claimed.insert(key);
                        matched.push(key);
                    }
                }
            }
            if description.sort_outer == SortPolicy::ByName {
                matched.sort_by(|&(ao, _), &(bo, _)| {
                    symtab.objects[ao].name.cmp(&symtab.objects[bo].name)
                });
            }
            if description.sort_inner == SortPolicy::ByName {
                matched.sort_by(|&(ao, asec), &(bo, bsec)| {
                    symtab.objects[ao].sections[asec]
                        .name
                        .cmp(&symtab.objects[bo].sections[bsec].name)
                });
            }
            inputs.extend(matched);
        }
        collected.push(inputs);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputSectionDescription, OutputSectionCommand};
    use crate::diag::Diagnostics;
    use crate::input::{InputFile, ObjectFile};
    use crate::testutil::TestObj;
    use object::SectionKind;

    #[test]
    fn glob_basics() {
        assert!(glob_match(".text", ".text"));
        assert!(glob_match(".text.*", ".text.cold"));
        assert!(!glob_match(".text.*", ".text"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match(".rodata*", ".rodata.str1.4"));
        assert!(glob_match("?data", "sdata"));
        assert!(!glob_match(".sdata", ".sdata2"));
        assert!(glob_match("*.o", "patch.o"));
        assert!(!glob_match("*.o", "patch.a"));
    }

    #[test]
    fn first_command_claims_section() {
        let diag = Diagnostics::new();
        let mut symtab = SymbolTable::new(&diag);
        let bytes = TestObj::new()
            .section(".sdata", &[0u8; 4], SectionKind::Data)
            .section(".data", &[0u8; 4], SectionKind::Data)
            .build();
        symtab.add_file(InputFile::Object(Box::new(
            ObjectFile::parse("a.o".to_string(), &bytes).unwrap(),
        )));

        let mut script = ScriptConfig::default();
        let mut sdata = OutputSectionCommand::new(".sdata");
        sdata
            .inputs
            .push(InputSectionDescription::new("*", &[".sdata", ".sbss"]));
        let mut hdata = OutputSectionCommand::new(".hdata");
        hdata
            .inputs
            .push(InputSectionDescription::new("*", &[".data", ".data.*", ".sdata"]));
        script.commands.push(sdata);
        script.commands.push(hdata);

        let collected = collect_input_sections(&script, &symtab);
        // .sdata goes to the first command even though .hdata's
        // patterns also cover it.
        assert_eq!(collected[0].len(), 1);
        assert_eq!(collected[1].len(), 1);
        let (o, s) = collected[0][0];
        assert_eq!(symtab.objects[o].sections[s].name, ".sdata");
        let (o, s) = collected[1][0];
        assert_eq!(symtab.objects[o].sections[s].name, ".data");
    }
}
