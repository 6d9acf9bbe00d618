use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{Context as OtelContext, KeyValue};
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor, Result as SarifResult};
use tracing::debug;

use crate::rules::{
    Rule, RuleMetadata, all_rules, metadata_properties, result_artifact_uri, result_byte_offset,
};
use crate::snapshot::{ScanOutput, SourceUnit};
use crate::symbols::SymbolTable;
use crate::telemetry::{Telemetry, with_span};

/// Inputs shared by analysis rules.
pub(crate) struct AnalysisContext {
    pub(crate) symbols: SymbolTable,
    pub(crate) units: Vec<SourceUnit>,
    telemetry: Option<Arc<Telemetry>>,
    deadline: Option<Instant>,
    skipped_work: AtomicBool,
}

/// Analysis engine that executes registered rules.
pub(crate) struct Engine {
    rules: Vec<Box<dyn Rule + Sync>>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        let mut rules = all_rules();
        rules.sort_by_key(|rule| first_rule_id(rule.as_ref()));
        Self { rules }
    }

    pub(crate) fn analyze(&self, context: AnalysisContext) -> Result<EngineOutput> {
        let mut rules = Vec::new();
        let mut results = Vec::new();

        for rule in &self.rules {
            let metadata = rule.metadata();
            rules.extend(metadata.iter().map(rule_descriptor));
            let rule_id = first_rule_id(rule.as_ref());
            if context.is_stopped() {
                debug!(rule_id, "time limit reached before rule");
                continue;
            }
            let rule_span_attributes = [KeyValue::new("nullmark.rule_id", rule_id)];
            let rule_results = with_span(
                context.telemetry(),
                &format!("rule:{rule_id}"),
                &rule_span_attributes,
                || rule.run(&context),
            )?;
            results.extend(rule_results);
        }

        sort_results(&mut results);
        Ok(EngineOutput {
            rules,
            results,
            complete: !context.skipped_work.load(Ordering::Relaxed),
        })
    }
}

/// Aggregated SARIF payload from rule execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
    /// False when the time limit cut analysis short.
    pub(crate) complete: bool,
}

pub(crate) fn build_context(scan: ScanOutput, telemetry: Option<Arc<Telemetry>>) -> AnalysisContext {
    AnalysisContext {
        symbols: scan.symbols,
        units: scan.units,
        telemetry,
        deadline: None,
        skipped_work: AtomicBool::new(false),
    }
}

fn first_rule_id(rule: &(dyn Rule + Sync)) -> &'static str {
    rule.metadata()
        .first()
        .map(|metadata| metadata.id)
        .unwrap_or("")
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(MultiformatMessageString::builder().text(metadata.name).build())
        .full_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .properties(metadata_properties(metadata))
        .build()
}

/// Orders results by rule, artifact, position, then message.
fn sort_results(results: &mut [SarifResult]) {
    results.sort_by(|left, right| {
        let left_id = left.rule_id.as_deref().unwrap_or("");
        let right_id = right.rule_id.as_deref().unwrap_or("");
        let left_uri = result_artifact_uri(left).unwrap_or("");
        let right_uri = result_artifact_uri(right).unwrap_or("");
        let left_msg = left.message.text.as_deref().unwrap_or("");
        let right_msg = right.message.text.as_deref().unwrap_or("");
        left_id
            .cmp(right_id)
            .then(left_uri.cmp(right_uri))
            .then(result_byte_offset(left).cmp(&result_byte_offset(right)))
            .then(left_msg.cmp(right_msg))
    });
}

impl AnalysisContext {
    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }

    /// Like [`Self::with_span`], for work moved onto another thread.
    pub(crate) fn with_span_in<T, F>(
        &self,
        parent_cx: &OtelContext,
        name: &str,
        attributes: &[KeyValue],
        f: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        match self.telemetry() {
            Some(telemetry) => telemetry.in_span_under(parent_cx, name, attributes, f),
            None => f(),
        }
    }

    /// Stops analysis once `limit` has elapsed from now.
    pub(crate) fn with_time_limit(mut self, limit: Duration) -> Self {
        self.deadline = Instant::now().checked_add(limit);
        self
    }

    /// Whether work not yet started should be skipped. A `true` answer marks
    /// the output incomplete.
    pub(crate) fn is_stopped(&self) -> bool {
        let stopped = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if stopped {
            self.skipped_work.store(true, Ordering::Relaxed);
        }
        stopped
    }
}
