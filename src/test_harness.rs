use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::engine::{Engine, EngineOutput, build_context};
use crate::snapshot::{scan_snapshot, scan_snapshot_str};

/// Test harness that loads compilation snapshots and runs analysis.
pub(crate) struct SnapshotHarness {
    engine: Engine,
}

impl SnapshotHarness {
    pub(crate) fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    pub(crate) fn analyze_str(&self, snapshot: &str) -> Result<EngineOutput> {
        let scan = scan_snapshot_str(snapshot).context("scan snapshot")?;
        self.engine
            .analyze(build_context(scan, None))
            .context("run analysis")
    }

    pub(crate) fn analyze_path(&self, snapshot: &Path) -> Result<EngineOutput> {
        let scan = scan_snapshot(snapshot).context("scan snapshot")?;
        self.engine
            .analyze(build_context(scan, None))
            .context("run analysis")
    }

    /// Writes the snapshot and its source files into a temp dir, then analyzes it.
    pub(crate) fn analyze_files(
        &self,
        snapshot: &str,
        sources: &[(&str, &str)],
    ) -> Result<(TempDir, EngineOutput)> {
        let temp_dir = tempfile::tempdir().context("create temp dir")?;
        for (name, contents) in sources {
            fs::write(temp_dir.path().join(name), contents).context("write source file")?;
        }
        let snapshot_path = temp_dir.path().join("snapshot.json");
        fs::write(&snapshot_path, snapshot).context("write snapshot")?;
        let output = self.analyze_path(&snapshot_path)?;
        Ok((temp_dir, output))
    }
}

/// Builds the snapshot a host compiler would produce for a one-method class.
///
/// `text` must declare `object GetObject()` returning `null`; the method is
/// marked when the line above its declaration is `[CanBeNull]`.
pub(crate) fn snapshot_for_source(text: &str) -> String {
    let name_start = text.find("GetObject").unwrap_or(0);
    let declaration_line_start = text[..name_start].rfind('\n').map_or(0, |index| index + 1);
    let marked = text[..declaration_line_start]
        .trim_end()
        .lines()
        .last()
        .is_some_and(|line| line.trim() == "[CanBeNull]");
    let attributes: Vec<Value> = if marked {
        vec![json!("CanBeNull")]
    } else {
        Vec::new()
    };
    let literal_start = text.find("null;").unwrap_or(0);

    json!({
        "types": [{
            "name": "Samples",
            "kind": "class",
            "methods": [{
                "name": "GetObject",
                "returns": { "reference": "object" },
                "attributes": attributes,
                "name_span": { "start": name_start, "end": name_start + "GetObject".len() }
            }]
        }],
        "units": [{
            "uri": "Samples.cs",
            "text": text,
            "bodies": [{
                "kind": "method",
                "owner": "Samples.GetObject()",
                "root": { "kind": "block", "children": [{
                    "kind": "return",
                    "children": [{
                        "kind": "literal",
                        "constant": "null",
                        "span": { "start": literal_start, "end": literal_start + 4 }
                    }]
                }] }
            }]
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_snapshot_detects_marker_line() {
        let unmarked = snapshot_for_source("class Samples {\n    object GetObject() { return null; }\n}\n");
        let marked = snapshot_for_source(
            "class Samples {\n    [CanBeNull]\n    object GetObject() { return null; }\n}\n",
        );

        assert!(unmarked.contains(r#""attributes":[]"#));
        assert!(marked.contains(r#""attributes":["CanBeNull"]"#));
    }

    #[test]
    fn files_next_to_snapshot_provide_text() {
        let snapshot = r#"{
            "types": [{ "name": "Samples", "kind": "class", "methods": [
                { "name": "GetObject", "returns": { "reference": "object" }, "name_span": { "start": 7, "end": 16 } }
            ] }],
            "units": [{ "uri": "Samples.cs", "bodies": [
                { "kind": "method", "owner": "Samples.GetObject()", "root": { "kind": "block", "children": [
                    { "kind": "return", "children": [ { "kind": "literal", "constant": "null" } ] }
                ] } }
            ] }]
        }"#;

        let (_temp_dir, output) = SnapshotHarness::new()
            .analyze_files(snapshot, &[("Samples.cs", "object GetObject() => null;\n")])
            .expect("analyze files");

        assert_eq!(output.results.len(), 1);
        assert!(output.results[0].fixes.is_some());
    }
}
