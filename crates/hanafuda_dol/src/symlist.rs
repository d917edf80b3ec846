// crates/hanafuda_dol/src/symlist.rs
//
// Text symbol maps: one `<address> <name>` record per line, address in
// hex (0x), octal (leading 0) or decimal. Lines that do not start with
// an integer are skipped. Names are views into the loaded buffer.

/// Ordered `(address, name)` pairs from a symbol map.
pub struct SymbolList<'a> {
    entries: Vec<(u32, &'a str)>,
}

fn parse_int(token: &str) -> Option<u32> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if token.len() > 1 && token.starts_with('0') {
        u32::from_str_radix(&token[1..], 8).ok()
    } else {
        token.parse().ok()
    }
}

impl<'a> SymbolList<'a> {
    pub fn parse(text: &'a str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            let (token, rest) = match line.split_once(char::is_whitespace) {
                Some(split) => split,
                None => continue,
            };
            let addr = match parse_int(token) {
                Some(addr) => addr,
                None => continue,
            };
            let name = rest.trim();
            if !name.is_empty() {
                entries.push((addr, name));
            }
        }
        SymbolList { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &'a str)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
