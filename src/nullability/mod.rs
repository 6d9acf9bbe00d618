//! Nullability inference for method return values.
//!
//! A method is reported when its return type can hold null, nothing in its
//! override or interface family carries the `[CanBeNull]` marker, and one of
//! its return statements yields a null literal or delegates to a marked
//! method without a guard.

pub(crate) mod call_site;
pub(crate) mod classifier;
pub(crate) mod coordinator;
pub(crate) mod marker;
pub(crate) mod return_site;

pub(crate) use coordinator::{Report, analyze_body};

/// Severity attached to a diagnostic descriptor. Both diagnostics are warnings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Severity {
    Warning,
}

/// Fixed identity and wording of one diagnostic.
#[derive(Debug)]
pub(crate) struct DiagnosticDescriptor {
    pub(crate) id: &'static str,
    pub(crate) title: &'static str,
    pub(crate) message: &'static str,
    pub(crate) category: &'static str,
    pub(crate) severity: Severity,
}

/// A return statement yields a bare null literal.
pub(crate) static VALUE_USAGE: DiagnosticDescriptor = DiagnosticDescriptor {
    id: "NR1001",
    title: "Missing nullability attribute (value usage)",
    message: "Method returns null value, but it is not marked with [CanBeNull]",
    category: "Usage",
    severity: Severity::Warning,
};

/// A return statement propagates the result of a `[CanBeNull]` method.
pub(crate) static ATTRIBUTE_USAGE: DiagnosticDescriptor = DiagnosticDescriptor {
    id: "NR1002",
    title: "Missing nullability attribute (method usage)",
    message: "Method returns value from method with [CanBeNull] attribute, but it is not marked with [CanBeNull]",
    category: "Usage",
    severity: Severity::Warning,
};

pub(crate) fn descriptors() -> [&'static DiagnosticDescriptor; 2] {
    [&VALUE_USAGE, &ATTRIBUTE_USAGE]
}
