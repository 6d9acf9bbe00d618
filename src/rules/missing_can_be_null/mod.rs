use anyhow::Result;
use opentelemetry::{Context as OtelContext, KeyValue};
use rayon::prelude::*;
use serde_sarif::sarif::Result as SarifResult;
use tracing::{debug, info};

use crate::engine::AnalysisContext;
use crate::fix::{marker_insertion, sarif_fix};
use crate::ir::Body;
use crate::nullability::{Report, analyze_body, descriptors};
use crate::rules::{Rule, RuleMetadata, method_name_location, result_level, result_message};
use crate::snapshot::SourceUnit;
use crate::symbols::SymbolQuery;
use crate::telemetry::add_current_span_event;

/// Rule that reports nullable-returning methods missing a `[CanBeNull]` marker.
#[derive(Default)]
pub(crate) struct MissingCanBeNullRule;

crate::register_rule!(MissingCanBeNullRule);

impl Rule for MissingCanBeNullRule {
    fn metadata(&self) -> Vec<RuleMetadata> {
        descriptors()
            .iter()
            .map(|descriptor| RuleMetadata {
                id: descriptor.id,
                name: descriptor.title,
                description: descriptor.message,
                category: descriptor.category,
                severity: descriptor.severity,
            })
            .collect()
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for unit in &context.units {
            let attributes = [
                KeyValue::new("nullmark.uri", unit.uri.clone()),
                KeyValue::new("nullmark.body_count", unit.bodies.len() as i64),
            ];
            let unit_results = context.with_span("unit", &attributes, || analyze_unit(context, unit));
            debug!(uri = %unit.uri, findings = unit_results.len(), "analyzed unit");
            results.extend(unit_results);
        }
        info!(findings = results.len(), "missing [CanBeNull] analysis finished");
        Ok(results)
    }
}

fn analyze_unit(context: &AnalysisContext, unit: &SourceUnit) -> Vec<SarifResult> {
    let parent_cx = OtelContext::current();
    unit.bodies
        .par_iter()
        .filter_map(|body| {
            if context.is_stopped() {
                return None;
            }
            let report = context.with_span_in(&parent_cx, "body", &body_attributes(context, body), || {
                analyze_body(&context.symbols, body)
            })?;
            Some(report_result(context, unit, &report))
        })
        .collect()
}

fn body_attributes(context: &AnalysisContext, body: &Body) -> Vec<KeyValue> {
    let mut attributes = vec![KeyValue::new("nullmark.body_kind", format!("{:?}", body.kind))];
    if let Some(owner) = body.owner {
        attributes.push(KeyValue::new(
            "nullmark.method",
            context.symbols.qualified_name(owner),
        ));
        attributes.push(KeyValue::new(
            "nullmark.method_key",
            context.symbols.method(owner).key.clone(),
        ));
    }
    attributes
}

fn report_result(context: &AnalysisContext, unit: &SourceUnit, report: &Report) -> SarifResult {
    let method_name = context.symbols.qualified_name(report.method);
    let source = unit.text.as_deref().zip(unit.line_index.as_ref());
    let location = method_name_location(
        &unit.uri,
        unit.artifact_index,
        &method_name,
        report.location,
        source,
    );
    add_current_span_event(
        "nullmark.finding",
        &[
            KeyValue::new("nullmark.rule_id", report.descriptor.id),
            KeyValue::new("nullmark.method", method_name.clone()),
        ],
    );
    debug!(rule_id = report.descriptor.id, method = %method_name, "missing [CanBeNull]");

    let fix = match (unit.text.as_deref(), report.location) {
        (Some(text), Some(span)) => marker_insertion(text, span)
            .map(|insertion| sarif_fix(&unit.uri, text, &insertion)),
        _ => None,
    };
    let builder = SarifResult::builder()
        .rule_id(report.descriptor.id)
        .level(result_level(report.descriptor.severity))
        .message(result_message(report.descriptor.message))
        .locations(vec![location]);
    match fix {
        Some(fix) => builder.fixes(vec![fix]).build(),
        None => builder.build(),
    }
}
