use std::process::Command;

fn nullmark_bin() -> String {
    std::env::var("CARGO_BIN_EXE_nullmark").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("nullmark");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    })
}

#[test]
fn nullmark_exits_non_zero_on_missing_input() {
    let output = Command::new(nullmark_bin())
        .arg("--input")
        .arg("missing.json")
        .output()
        .expect("run nullmark");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input not found"), "{stderr}");
}

#[test]
fn nullmark_exits_non_zero_on_malformed_snapshot() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let input = temp_dir.path().join("snapshot.json");
    std::fs::write(&input, r#"{ "types": [ { "name": "A", "kind": "record" } ] }"#)
        .expect("write snapshot");

    let output = Command::new(nullmark_bin())
        .arg("--input")
        .arg(&input)
        .output()
        .expect("run nullmark");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("types[0].kind"), "{stderr}");
}

#[test]
fn nullmark_requires_input_flag() {
    let output = Command::new(nullmark_bin()).output().expect("run nullmark");

    assert!(!output.status.success());
}
