use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::json;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, PropertyBag, Region,
    Result as SarifResult, ResultLevel,
};

use crate::engine::AnalysisContext;
use crate::nullability::Severity;
use crate::source::{LineIndex, TextSpan, char_offset};

// Rule modules are generated by build.rs from src/rules/<name>/mod.rs.
include!(concat!(env!("OUT_DIR"), "/rule_modules.rs"));

/// Metadata describing one diagnostic a rule can report.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) category: &'static str,
    pub(crate) severity: Severity,
}

/// Rule interface for analysis execution.
pub(crate) trait Rule {
    /// Diagnostics the rule may emit; results always carry one of these ids.
    fn metadata(&self) -> Vec<RuleMetadata>;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

/// Wrapper struct for rule factory functions to enable inventory collection.
pub(crate) struct RuleFactory(pub fn() -> Box<dyn Rule + Sync>);

inventory::collect!(RuleFactory);

/// Macro to register a rule implementation.
///
/// Usage: `register_rule!(RuleName);`
#[macro_export]
macro_rules! register_rule {
    ($rule_type:ty) => {
        inventory::submit! {
            $crate::rules::RuleFactory(|| Box::new(<$rule_type>::default()))
        }
    };
}

/// Returns all registered rules as boxed trait objects.
pub(crate) fn all_rules() -> Vec<Box<dyn Rule + Sync>> {
    inventory::iter::<RuleFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

pub(crate) fn result_level(severity: Severity) -> ResultLevel {
    match severity {
        Severity::Warning => ResultLevel::Warning,
    }
}

pub(crate) fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
    }
}

pub(crate) fn metadata_properties(metadata: &RuleMetadata) -> PropertyBag {
    let mut properties = BTreeMap::new();
    properties.insert("category".to_string(), json!(metadata.category));
    properties.insert(
        "severity".to_string(),
        json!(severity_name(metadata.severity)),
    );
    PropertyBag::builder()
        .additional_properties(properties)
        .build()
}

/// Document text paired with its line index, when the host supplied it.
pub(crate) type SourceText<'a> = Option<(&'a str, &'a LineIndex)>;

/// Location of a method's name token.
pub(crate) fn method_name_location(
    artifact_uri: &str,
    artifact_index: i64,
    method_name: &str,
    span: Option<TextSpan>,
    source: SourceText<'_>,
) -> Location {
    let logical = method_logical_location(method_name);
    let artifact_location = ArtifactLocation::builder()
        .uri(artifact_uri.to_string())
        .index(artifact_index)
        .build();
    let physical = match span {
        Some(span) => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .region(span_region(span, source))
            .build(),
        None => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .build(),
    };
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

/// Region of a span; character fields are only known when the text is.
fn span_region(span: TextSpan, source: SourceText<'_>) -> Region {
    let located = source.and_then(|(text, index)| {
        let start = index.line_col(text, span.start)?;
        let end = index.line_col(text, span.end)?;
        let char_start = char_offset(text, span.start)?;
        let char_end = char_offset(text, span.end)?;
        Some((start, end, char_start, char_end.saturating_sub(char_start)))
    });
    match located {
        Some(((start_line, start_column), (end_line, end_column), char_start, char_len)) => {
            Region::builder()
                .start_line(start_line as i64)
                .start_column(start_column as i64)
                .end_line(end_line as i64)
                .end_column(end_column as i64)
                .char_offset(char_start as i64)
                .char_length(char_len as i64)
                .byte_offset(span.start as i64)
                .byte_length(span.len() as i64)
                .build()
        }
        None => Region::builder()
            .byte_offset(span.start as i64)
            .byte_length(span.len() as i64)
            .build(),
    }
}

pub(crate) fn method_logical_location(method_name: &str) -> LogicalLocation {
    LogicalLocation::builder()
        .name(method_name)
        .kind("function")
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

/// Byte offset of a result's first physical region, used for ordering.
pub(crate) fn result_byte_offset(result: &SarifResult) -> i64 {
    result
        .locations
        .as_ref()
        .and_then(|locations| locations.first())
        .and_then(|location| location.physical_location.as_ref())
        .and_then(|physical| physical.region.as_ref())
        .and_then(|region| region.byte_offset)
        .unwrap_or(-1)
}

pub(crate) fn result_artifact_uri(result: &SarifResult) -> Option<&str> {
    result
        .locations
        .as_ref()
        .and_then(|locations| locations.first())
        .and_then(|location| location.physical_location.as_ref())
        .and_then(|physical| physical.artifact_location.as_ref())
        .and_then(|artifact| artifact.uri.as_deref())
}
