use crate::symbols::{MethodSymbol, ReturnType};

/// Whether the declared return type of `method` is able to hold null.
pub(crate) fn can_hold_null(method: &MethodSymbol) -> bool {
    match method.return_type {
        ReturnType::Void | ReturnType::Value(_) => false,
        ReturnType::Reference(_) => true,
    }
}
