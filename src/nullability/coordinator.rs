use crate::ir::{Body, BodyKind, NodeId};
use crate::nullability::call_site::delegates_to_unguarded_nullable_call;
use crate::nullability::classifier::can_hold_null;
use crate::nullability::marker::is_marked_nullable;
use crate::nullability::return_site::has_unguarded_null_literal;
use crate::nullability::{ATTRIBUTE_USAGE, DiagnosticDescriptor, VALUE_USAGE};
use crate::source::TextSpan;
use crate::symbols::{MethodId, SymbolQuery};

/// Missing-marker finding for one method body.
#[derive(Clone, Debug)]
pub(crate) struct Report {
    pub(crate) descriptor: &'static DiagnosticDescriptor,
    pub(crate) method: MethodId,
    /// Span of the method's name token.
    pub(crate) location: Option<TextSpan>,
}

/// Validates the return statements of a single method body.
///
/// One analyzer is created per body; after the first report every later
/// return statement of the same body is ignored.
#[derive(Debug, Default)]
pub(crate) struct BodyAnalyzer {
    reported: bool,
}

impl BodyAnalyzer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn validate_return<S: SymbolQuery + ?Sized>(
        &mut self,
        symbols: &S,
        body: &Body,
        return_node: NodeId,
    ) -> Option<Report> {
        if self.reported {
            return None;
        }
        let method = reportable_method(symbols, body, return_node)?;
        let descriptor = if has_unguarded_null_literal(body, return_node) {
            &VALUE_USAGE
        } else if delegates_to_unguarded_nullable_call(symbols, body, return_node) {
            &ATTRIBUTE_USAGE
        } else {
            return None;
        };
        self.reported = true;
        Some(Report {
            descriptor,
            method,
            location: symbols.method(method).name_span,
        })
    }
}

/// Runs a fresh [`BodyAnalyzer`] over every return statement of `body`.
pub(crate) fn analyze_body<S: SymbolQuery + ?Sized>(symbols: &S, body: &Body) -> Option<Report> {
    let mut analyzer = BodyAnalyzer::new();
    body.returns()
        .into_iter()
        .find_map(|return_node| analyzer.validate_return(symbols, body, return_node))
}

fn reportable_method<S: SymbolQuery + ?Sized>(
    symbols: &S,
    body: &Body,
    return_node: NodeId,
) -> Option<MethodId> {
    if body.kind != BodyKind::Method || body.in_nested_function(return_node) {
        return None;
    }
    let method = body.owner?;
    if !can_hold_null(symbols.method(method)) || is_marked_nullable(symbols, method) {
        return None;
    }
    Some(method)
}
