use crate::ir::{Body, Constant, NodeId, NodeKind};

/// Whether the return statement contains a null literal visible to callers.
pub(crate) fn has_unguarded_null_literal(body: &Body, return_node: NodeId) -> bool {
    literals(body, return_node)
        .into_iter()
        .any(|literal| is_unguarded_null(body, literal, return_node))
}

fn literals(body: &Body, return_node: NodeId) -> Vec<NodeId> {
    body.descendants(return_node)
        .into_iter()
        .filter(|id| body.kind(*id) == NodeKind::Literal)
        .collect()
}

fn is_unguarded_null(body: &Body, literal: NodeId, return_node: NodeId) -> bool {
    if is_guarded(body, literal, return_node) {
        return false;
    }
    matches!(body.constant(literal), Some(Constant::Null))
}

/// A literal passed as an argument or used as an operator operand does not
/// become the method's return value.
fn is_guarded(body: &Body, literal: NodeId, return_node: NodeId) -> bool {
    for ancestor in body.ancestors(literal) {
        if ancestor == return_node {
            return false;
        }
        if matches!(
            body.kind(ancestor),
            NodeKind::Argument | NodeKind::BinaryOperator
        ) {
            return true;
        }
    }
    false
}
