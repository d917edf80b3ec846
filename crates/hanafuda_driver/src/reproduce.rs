// crates/hanafuda_driver/src/reproduce.rs
//
// Reproducer archives: `<path>.cpio` (newc format) holding the
// response file and the tool version, enough to replay a link.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn append_member(out: &mut Vec<u8>, name: &str, data: &[u8]) {
    out.extend_from_slice(b"070701");
    let fields: [u32; 13] = [
        0,                      // ino
        0o100644,               // mode
        0,                      // uid
        0,                      // gid
        1,                      // nlink
        0,                      // mtime
        data.len() as u32,      // filesize
        0,                      // devmajor
        0,                      // devminor
        0,                      // rdevmajor
        0,                      // rdevminor
        (name.len() + 1) as u32, // namesize
        0,                      // check
    ];
    for field in fields {
        out.extend_from_slice(format!("{:08X}", field).as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(out);
    out.extend_from_slice(data);
    pad4(out);
}

/// Quote an argument the way a response file expects.
fn quote(arg: &str) -> String {
    if arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped: String = arg
            .chars()
            .flat_map(|c| match c {
                '"' | '\\' => vec!['\\', c],
                c => vec![c],
            })
            .collect();
        format!("\"{}\"", escaped)
    } else {
        arg.to_string()
    }
}

/// The original command line minus the program name and the
/// --reproduce option itself, one argument per line.
fn response_file(args: &[String]) -> String {
    let mut out = String::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--reproduce" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--reproduce=") {
            continue;
        }
        out.push_str(&quote(arg));
        out.push('\n');
    }
    out
}

pub fn write_reproducer(path: &Path, args: &[String]) -> Result<()> {
    let mut out = Vec::new();
    append_member(&mut out, "response.txt", response_file(args).as_bytes());
    append_member(
        &mut out,
        "version.txt",
        format!("hanafuda-ld {}\n", env!("CARGO_PKG_VERSION")).as_bytes(),
    );
    append_member(&mut out, "TRAILER!!!", &[]);

    let cpio_path = format!("{}.cpio", path.display());
    fs::write(&cpio_path, &out).with_context(|| format!("cannot write {}", cpio_path))?;
    log::info!("wrote reproducer {}", cpio_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_file_drops_reproduce() {
        let args: Vec<String> = [
            "hanafuda-ld",
            "--reproduce",
            "repro",
            "--hanafuda-base-dol=base.dol",
            "patch object.o",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let response = response_file(&args);
        assert_eq!(response, "--hanafuda-base-dol=base.dol\n\"patch object.o\"\n");
    }

    #[test]
    fn archive_layout() {
        let dir = std::env::temp_dir().join("hanafuda_repro_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("r");
        let args: Vec<String> = ["hanafuda-ld", "a.o"].iter().map(|s| s.to_string()).collect();
        write_reproducer(&path, &args).unwrap();
        let bytes = fs::read(dir.join("r.cpio")).unwrap();
        assert!(bytes.starts_with(b"070701"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("response.txt"));
        assert!(text.contains("version.txt"));
        assert!(text.contains("TRAILER!!!"));
        assert_eq!(bytes.len() % 4, 0);
    }
}
