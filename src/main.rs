mod engine;
mod fix;
mod ir;
mod nullability;
mod rules;
mod snapshot;
mod source;
mod symbols;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::{BTreeMap, btree_map::Entry};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Result as SarifResult, Run,
    SCHEMA_URL, Sarif, Tool, ToolComponent,
};
use tracing::{info, warn};

use crate::engine::{Engine, build_context};
use crate::fix::{apply_insertions, insertions_by_artifact};
use crate::snapshot::scan_snapshot;
use crate::telemetry::{Telemetry, current_trace_id, init_logging, with_span};

/// CLI arguments for nullmark execution.
#[derive(Parser, Debug)]
#[command(
    name = "nullmark",
    about = "Reports methods that can return null without a [CanBeNull] marker, as SARIF.",
    version
)]
struct Cli {
    /// Compilation snapshot (JSON) produced by the host compiler.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// SARIF destination; `-` or absent writes to stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Write fixed copies of every source with findings into this directory.
    #[arg(long, value_name = "DIR")]
    fix_dir: Option<PathBuf>,
    /// OTLP/HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    /// Skip method bodies not yet analyzed once this many seconds have passed.
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<u64>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let telemetry = match cli.otel.as_deref() {
        Some(endpoint) => Some(Arc::new(
            Telemetry::new(endpoint).context("initialize telemetry")?,
        )),
        None => None,
    };
    let attributes = [KeyValue::new(
        "nullmark.input",
        cli.input.display().to_string(),
    )];
    let outcome = with_span(telemetry.as_deref(), "nullmark", &attributes, || {
        if let Some(trace_id) = current_trace_id() {
            info!(%trace_id, "exporting analysis trace");
        }
        analyze_and_report(&cli, telemetry.clone())
    });
    if let Some(telemetry) = &telemetry {
        if let Err(err) = telemetry.shutdown() {
            warn!("{err:#}");
        }
    }
    outcome
}

fn analyze_and_report(cli: &Cli, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let mut scan = with_span(
        telemetry.as_deref(),
        "scan",
        &[KeyValue::new("nullmark.phase", "scan")],
        || scan_snapshot(&cli.input),
    )?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();
    let artifacts = std::mem::take(&mut scan.artifacts);
    let sources: BTreeMap<String, String> = if cli.fix_dir.is_some() {
        scan.units
            .iter()
            .filter_map(|unit| Some((unit.uri.clone(), unit.text.clone()?)))
            .collect()
    } else {
        BTreeMap::new()
    };
    let mut stats = InvocationStats {
        scan_duration_ms,
        analysis_duration_ms: 0,
        type_count: scan.symbols.type_count(),
        method_count: scan.symbols.method_count(),
        unit_count: scan.units.len(),
        body_count: scan.body_count,
        artifact_count: artifacts.len(),
        complete: true,
    };

    let analysis_started_at = Instant::now();
    let mut context = build_context(scan, telemetry);
    if let Some(seconds) = cli.time_limit {
        context = context.with_time_limit(Duration::from_secs(seconds));
    }
    let output = Engine::new().analyze(context)?;
    stats.analysis_duration_ms = analysis_started_at.elapsed().as_millis();
    stats.complete = output.complete;
    if !output.complete {
        warn!("time limit reached; remaining method bodies were not analyzed");
    }
    info!(
        findings = output.results.len(),
        bodies = stats.body_count,
        "analysis complete"
    );

    if let Some(fix_dir) = cli.fix_dir.as_deref() {
        let written = write_fixed_sources(fix_dir, &sources, &output.results)?;
        info!(files = written, dir = %fix_dir.display(), "wrote fixed sources");
    }

    let invocation = build_invocation(&stats);
    let sarif = build_sarif(artifacts, invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    writer.flush().context("failed to flush SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} units={} bodies={}",
            started_at.elapsed().as_millis(),
            stats.scan_duration_ms,
            stats.analysis_duration_ms,
            stats.unit_count,
            stats.body_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Applies every fix in `results` and writes each changed source to `fix_dir`.
///
/// Files are named after the artifact's file name; two artifacts sharing a
/// file name are rejected before anything is written.
fn write_fixed_sources(
    fix_dir: &Path,
    sources: &BTreeMap<String, String>,
    results: &[SarifResult],
) -> Result<usize> {
    let mut outputs: BTreeMap<PathBuf, (String, String)> = BTreeMap::new();
    for (uri, insertions) in insertions_by_artifact(results) {
        let Some(text) = sources.get(&uri) else {
            warn!(%uri, "no source text for fix; skipped");
            continue;
        };
        let Some(file_name) = Path::new(&uri).file_name() else {
            warn!(%uri, "artifact has no file name; skipped");
            continue;
        };
        match outputs.entry(fix_dir.join(file_name)) {
            Entry::Occupied(entry) => anyhow::bail!(
                "fixed sources for {} and {} would both be written to {}",
                entry.get().0,
                uri,
                entry.key().display()
            ),
            Entry::Vacant(entry) => {
                let fixed = apply_insertions(text, &insertions);
                entry.insert((uri, fixed));
            }
        }
    }

    fs::create_dir_all(fix_dir)
        .with_context(|| format!("failed to create {}", fix_dir.display()))?;
    for (path, (_, fixed)) in &outputs {
        fs::write(path, fixed).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(outputs.len())
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    analysis_duration_ms: u128,
    type_count: usize,
    method_count: usize,
    unit_count: usize,
    body_count: usize,
    artifact_count: usize,
    complete: bool,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("nullmark.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert(
        "nullmark.analysis_ms".to_string(),
        json!(stats.analysis_duration_ms),
    );
    properties.insert("nullmark.type_count".to_string(), json!(stats.type_count));
    properties.insert(
        "nullmark.method_count".to_string(),
        json!(stats.method_count),
    );
    properties.insert("nullmark.unit_count".to_string(), json!(stats.unit_count));
    properties.insert("nullmark.body_count".to_string(), json!(stats.body_count));
    properties.insert(
        "nullmark.artifact_count".to_string(),
        json!(stats.artifact_count),
    );
    properties.insert("nullmark.complete".to_string(), json!(stats.complete));

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("nullmark")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("nullmark")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_harness::SnapshotHarness;

    fn empty_stats() -> InvocationStats {
        InvocationStats {
            scan_duration_ms: 0,
            analysis_duration_ms: 0,
            type_count: 0,
            method_count: 0,
            unit_count: 0,
            body_count: 0,
            artifact_count: 0,
            complete: true,
        }
    }

    fn demo_snapshot() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("demos")
            .join("samples.json")
    }

    #[test]
    fn sarif_is_minimal_and_valid_shape() {
        let invocation = build_invocation(&empty_stats());
        let sarif = build_sarif(Vec::new(), invocation, Vec::new(), Vec::new());
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], "nullmark");
        assert!(
            value["runs"][0]["results"]
                .as_array()
                .expect("results array")
                .is_empty()
        );
        assert_eq!(
            value["runs"][0]["invocations"][0]["executionSuccessful"],
            true
        );
        assert_eq!(
            value["runs"][0]["invocations"][0]["properties"]["nullmark.body_count"],
            0
        );
    }

    #[test]
    fn demo_samples_report_expected_methods() {
        let output = SnapshotHarness::new()
            .analyze_path(&demo_snapshot())
            .expect("analyze demo");

        let findings: Vec<(String, String)> = output
            .results
            .iter()
            .map(|result| {
                let value = serde_json::to_value(result).expect("serialize result");
                (
                    result.rule_id.clone().unwrap_or_default(),
                    value["locations"][0]["logicalLocations"][0]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                )
            })
            .collect();
        let expected: Vec<(String, String)> = [
            ("NR1001", "Samples.GetAlwaysNullObject1"),
            ("NR1001", "Samples.GetAlwaysNullObject2"),
            ("NR1001", "Samples.GetSometimesNullObject1"),
            ("NR1001", "Samples.GetSometimesNullObject2"),
            ("NR1001", "Samples.GetSometimesNullObject3"),
            ("NR1002", "Samples.NullObjectChain"),
        ]
        .iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();
        assert_eq!(findings, expected);
        assert!(output.results.iter().all(|result| result.fixes.is_some()));
    }

    #[test]
    fn fixed_sources_are_written_by_file_name() {
        let scan = scan_snapshot(&demo_snapshot()).expect("scan demo");
        let sources: BTreeMap<String, String> = scan
            .units
            .iter()
            .filter_map(|unit| Some((unit.uri.clone(), unit.text.clone()?)))
            .collect();
        let output = Engine::new()
            .analyze(build_context(scan, None))
            .expect("analyze demo");
        let temp_dir = tempfile::tempdir().expect("temp dir");

        let written =
            write_fixed_sources(temp_dir.path(), &sources, &output.results).expect("write fixes");

        assert_eq!(written, 1);
        let fixed = fs::read_to_string(temp_dir.path().join("Samples.cs")).expect("read fixed");
        let original = sources.values().next().expect("demo source");
        assert_eq!(
            fixed.matches("[CanBeNull]").count(),
            original.matches("[CanBeNull]").count() + 6
        );
        assert_eq!(fixed.lines().count(), original.lines().count() + 6);
    }

    #[test]
    fn fixed_sources_sharing_a_file_name_are_rejected() {
        let snapshot = r#"{
            "types": [
                { "name": "A", "kind": "class", "methods": [
                    { "name": "GetObject", "returns": { "reference": "object" }, "name_span": { "start": 7, "end": 16 } }
                ] },
                { "name": "B", "kind": "class", "methods": [
                    { "name": "GetObject", "returns": { "reference": "object" }, "name_span": { "start": 7, "end": 16 } }
                ] }
            ],
            "units": [
                { "uri": "a/Samples.cs", "text": "object GetObject() => null;\n", "bodies": [
                    { "kind": "method", "owner": "A.GetObject()", "root": { "kind": "block", "children": [
                        { "kind": "return", "children": [ { "kind": "literal", "constant": "null" } ] }
                    ] } }
                ] },
                { "uri": "b/Samples.cs", "text": "object GetObject() => null;\n", "bodies": [
                    { "kind": "method", "owner": "B.GetObject()", "root": { "kind": "block", "children": [
                        { "kind": "return", "children": [ { "kind": "literal", "constant": "null" } ] }
                    ] } }
                ] }
            ]
        }"#;
        let output = SnapshotHarness::new()
            .analyze_str(snapshot)
            .expect("analyze snapshot");
        assert_eq!(output.results.len(), 2);
        let sources: BTreeMap<String, String> = ["a/Samples.cs", "b/Samples.cs"]
            .iter()
            .map(|uri| (uri.to_string(), "object GetObject() => null;\n".to_string()))
            .collect();
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let fix_dir = temp_dir.path().join("fixed");

        let error = write_fixed_sources(&fix_dir, &sources, &output.results)
            .err()
            .expect("file name collision");

        let message = format!("{error:#}");
        assert!(message.contains("a/Samples.cs"), "{message}");
        assert!(message.contains("b/Samples.cs"), "{message}");
        assert!(!fix_dir.join("Samples.cs").exists());
    }
}
