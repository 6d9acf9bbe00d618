use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Emits `mod` declarations for every `src/rules/<name>/mod.rs`.
fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=src/rules/");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?;
    let rules_dir = Path::new(&manifest_dir).join("src").join("rules");

    let mut modules: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&rules_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let rule_path = entry.path().join("mod.rs");
        if !rule_path.is_file() {
            continue;
        }
        println!("cargo:rerun-if-changed={}", rule_path.display());
        modules.push((entry.file_name().to_string_lossy().into_owned(), rule_path));
    }
    modules.sort();

    let content: String = modules
        .iter()
        .map(|(name, path)| format!("#[path = {path:?}]\npub(crate) mod {name};\n"))
        .collect();

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    fs::write(Path::new(&out_dir).join("rule_modules.rs"), content)
}
