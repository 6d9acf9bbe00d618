use std::collections::BTreeMap;

use serde_sarif::sarif::{
    ArtifactChange, ArtifactContent, ArtifactLocation, Fix, Message, Region, Replacement,
    Result as SarifResult,
};

use crate::nullability::descriptors;
use crate::source::{LineIndex, TextSpan, char_offset};

/// Text inserted above a flagged method declaration.
pub(crate) const MARKER_TAG: &str = "[CanBeNull]";

pub(crate) const FIX_TITLE: &str = "Add [CanBeNull] attribute";

/// Zero-length edit inserting `text` at byte `offset` of the original document.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct TextInsertion {
    pub(crate) offset: usize,
    pub(crate) text: String,
}

pub(crate) fn is_fixable(rule_id: &str) -> bool {
    descriptors().iter().any(|descriptor| descriptor.id == rule_id)
}

/// Builds the marker line for the declaration containing `span`.
///
/// The new line copies the indentation of the declaration line and is placed
/// directly above it. Returns `None` when the span is outside the text.
pub(crate) fn marker_insertion(text: &str, span: TextSpan) -> Option<TextInsertion> {
    if span.start > text.len() || !text.is_char_boundary(span.start) {
        return None;
    }
    let index = LineIndex::new(text);
    let line = index.line_of(span.start)?;
    let line_start = index.line_start(line)?;
    let line_text = index.line_text(text, line)?;
    let indent_len = line_text.len() - line_text.trim_start().len();
    let indent = &line_text[..indent_len];
    let newline = index
        .line_terminator(text, line)
        .or_else(|| line.checked_sub(1).and_then(|prev| index.line_terminator(text, prev)))
        .unwrap_or("\n");
    Some(TextInsertion {
        offset: line_start,
        text: format!("{indent}{MARKER_TAG}{newline}"),
    })
}

/// Applies insertions computed against the original `text`.
///
/// Insertions are applied from the highest offset down so earlier offsets stay
/// valid; duplicates at the same offset are applied once.
pub(crate) fn apply_insertions(text: &str, insertions: &[TextInsertion]) -> String {
    let mut ordered: Vec<&TextInsertion> = insertions
        .iter()
        .filter(|insertion| {
            insertion.offset <= text.len() && text.is_char_boundary(insertion.offset)
        })
        .collect();
    ordered.sort_by(|left, right| right.cmp(left));
    ordered.dedup_by(|left, right| left.offset == right.offset);

    let mut output = text.to_string();
    for insertion in ordered {
        output.insert_str(insertion.offset, &insertion.text);
    }
    output
}

/// Fixes every span of one document in a single pass.
#[cfg(test)]
pub(crate) fn fix_document(text: &str, spans: &[TextSpan]) -> String {
    let insertions: Vec<TextInsertion> = spans
        .iter()
        .filter_map(|span| marker_insertion(text, *span))
        .collect();
    apply_insertions(text, &insertions)
}

/// Expresses an insertion into `text` as a SARIF fix with a zero-length
/// deleted region, located by both byte and character offset.
pub(crate) fn sarif_fix(artifact_uri: &str, text: &str, insertion: &TextInsertion) -> Fix {
    let deleted_region = match char_offset(text, insertion.offset) {
        Some(chars) => Region::builder()
            .byte_offset(insertion.offset as i64)
            .byte_length(0)
            .char_offset(chars as i64)
            .char_length(0)
            .build(),
        None => Region::builder()
            .byte_offset(insertion.offset as i64)
            .byte_length(0)
            .build(),
    };
    let replacement = Replacement::builder()
        .deleted_region(deleted_region)
        .inserted_content(
            ArtifactContent::builder()
                .text(insertion.text.clone())
                .build(),
        )
        .build();
    let change = ArtifactChange::builder()
        .artifact_location(
            ArtifactLocation::builder()
                .uri(artifact_uri.to_string())
                .build(),
        )
        .replacements(vec![replacement])
        .build();
    Fix::builder()
        .description(Message::builder().text(FIX_TITLE.to_string()).build())
        .artifact_changes(vec![change])
        .build()
}

/// Collects the insertions carried by SARIF results, grouped by artifact URI.
pub(crate) fn insertions_by_artifact(
    results: &[SarifResult],
) -> BTreeMap<String, Vec<TextInsertion>> {
    let mut grouped: BTreeMap<String, Vec<TextInsertion>> = BTreeMap::new();
    for result in results {
        let Some(rule_id) = result.rule_id.as_deref() else {
            continue;
        };
        if !is_fixable(rule_id) {
            continue;
        }
        for fix in result.fixes.iter().flatten() {
            for change in &fix.artifact_changes {
                let Some(uri) = change.artifact_location.uri.clone() else {
                    continue;
                };
                for replacement in &change.replacements {
                    let Some(offset) = replacement.deleted_region.byte_offset else {
                        continue;
                    };
                    let Some(text) = replacement
                        .inserted_content
                        .as_ref()
                        .and_then(|content| content.text.clone())
                    else {
                        continue;
                    };
                    let Ok(offset) = usize::try_from(offset) else {
                        continue;
                    };
                    grouped
                        .entry(uri.clone())
                        .or_default()
                        .push(TextInsertion { offset, text });
                }
            }
        }
    }
    grouped
}
