use crate::ir::{Body, NodeId, NodeKind};
use crate::nullability::marker::has_marker;
use crate::symbols::{MethodId, SymbolQuery};

/// Whether the first call in the return statement hands back the result of
/// a `[CanBeNull]` method without dereferencing or storing it first.
pub(crate) fn delegates_to_unguarded_nullable_call<S: SymbolQuery + ?Sized>(
    symbols: &S,
    body: &Body,
    return_node: NodeId,
) -> bool {
    let Some((call, target)) = first_invocation(body, return_node) else {
        return false;
    };
    if is_guarded_call(body, call) {
        return false;
    }
    match target {
        // Only the callee's own attributes count, not its ancestry.
        Some(target) => has_marker(symbols.method(target)),
        None => false,
    }
}

/// First call expression below the return statement in document order.
pub(crate) fn first_invocation(
    body: &Body,
    return_node: NodeId,
) -> Option<(NodeId, Option<MethodId>)> {
    body.descendants(return_node)
        .into_iter()
        .find_map(|id| match body.kind(id) {
            NodeKind::Invocation { target } => Some((id, target)),
            _ => None,
        })
}

fn is_guarded_call(body: &Body, call: NodeId) -> bool {
    let Some(parent) = body.parent(call) else {
        return false;
    };
    matches!(
        body.kind(parent),
        NodeKind::FieldAccess
            | NodeKind::PropertyAccess
            | NodeKind::ConditionalAccess
            | NodeKind::Assignment
            | NodeKind::ArrayInitializer
    )
}
