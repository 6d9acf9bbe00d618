use std::collections::BTreeSet;

use crate::symbols::{MethodId, MethodSymbol, SymbolQuery};

/// Name of the convention-based nullability marker.
pub(crate) const MARKER_NAME: &str = "CanBeNull";

/// Matches the marker by name only, whatever namespace declares it.
pub(crate) fn is_marker_attribute(attribute: &str) -> bool {
    let name = attribute.rsplit('.').next().unwrap_or(attribute);
    let name = name.strip_suffix("Attribute").unwrap_or(name);
    name == MARKER_NAME
}

/// Whether the marker appears on the method's own attribute set.
pub(crate) fn has_marker(method: &MethodSymbol) -> bool {
    method
        .attributes
        .iter()
        .any(|attribute| is_marker_attribute(attribute))
}

/// Whether `method` is marked nullable directly, through the method it
/// overrides, or through an interface member it implements.
pub(crate) fn is_marked_nullable<S: SymbolQuery + ?Sized>(symbols: &S, method: MethodId) -> bool {
    let mut visited = BTreeSet::new();
    is_marked_nullable_inner(symbols, method, &mut visited)
}

fn is_marked_nullable_inner<S: SymbolQuery + ?Sized>(
    symbols: &S,
    method: MethodId,
    visited: &mut BTreeSet<MethodId>,
) -> bool {
    if !visited.insert(method) {
        return false;
    }
    let symbol = symbols.method(method);
    if has_marker(symbol) {
        return true;
    }
    if let Some(overridden) = symbols.overridden_method(method) {
        if is_marked_nullable_inner(symbols, overridden, visited) {
            return true;
        }
    }
    is_marked_by_interface(symbols, method)
}

fn is_marked_by_interface<S: SymbolQuery + ?Sized>(symbols: &S, method: MethodId) -> bool {
    let containing_type = symbols.method(method).containing_type;
    for member in symbols.implemented_interface_members(method) {
        // Overloads share the name; only the member implemented by this method counts.
        if symbols.resolves_to(containing_type, member) != Some(method) {
            continue;
        }
        if has_marker(symbols.method(member)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{ReturnType, SymbolTableBuilder, TypeKind};

    fn object() -> ReturnType {
        ReturnType::Reference("object".to_string())
    }

    #[test]
    fn marker_matches_by_name_in_any_namespace() {
        assert!(is_marker_attribute("CanBeNull"));
        assert!(is_marker_attribute("CanBeNullAttribute"));
        assert!(is_marker_attribute("JetBrains.Annotations.CanBeNull"));
        assert!(is_marker_attribute("Samples.CanBeNullAttribute"));
        assert!(!is_marker_attribute("NotNull"));
        assert!(!is_marker_attribute("CanBeNullable"));
        assert!(!is_marker_attribute("MaybeCanBeNull"));
    }

    #[test]
    fn direct_marker_is_detected() {
        let mut builder = SymbolTableBuilder::new();
        let class = builder.add_type("ClassA", TypeKind::Class);
        let marked = builder.add_method(class, "methodX", object());
        let plain = builder.add_method(class, "methodY", object());
        builder.add_attribute(marked, "CanBeNull");
        let table = builder.finish();

        assert!(is_marked_nullable(&table, marked));
        assert!(!is_marked_nullable(&table, plain));
    }

    #[test]
    fn marker_is_inherited_through_override_chain() {
        let mut builder = SymbolTableBuilder::new();
        let base = builder.add_type("Base", TypeKind::Class);
        let middle = builder.add_type("Middle", TypeKind::Class);
        let leaf = builder.add_type("Leaf", TypeKind::Class);
        builder.set_base(middle, base);
        builder.set_base(leaf, middle);
        let base_method = builder.add_method(base, "Get", object());
        let middle_method = builder.add_method(middle, "Get", object());
        let leaf_method = builder.add_method(leaf, "Get", object());
        builder.add_attribute(base_method, "CanBeNull");
        builder.set_override(middle_method, Some(base_method));
        builder.set_override(leaf_method, Some(middle_method));
        let table = builder.finish();

        assert!(is_marked_nullable(&table, middle_method));
        assert!(is_marked_nullable(&table, leaf_method));
    }

    #[test]
    fn override_without_resolvable_base_is_not_marked() {
        let mut builder = SymbolTableBuilder::new();
        let class = builder.add_type("Derived", TypeKind::Class);
        let method = builder.add_method(class, "Get", object());
        builder.set_override(method, None);
        let table = builder.finish();

        assert!(!is_marked_nullable(&table, method));
    }

    #[test]
    fn override_cycle_terminates() {
        let mut builder = SymbolTableBuilder::new();
        let class = builder.add_type("Broken", TypeKind::Class);
        let first = builder.add_method(class, "First", object());
        let second = builder.add_method(class, "Second", object());
        builder.set_override(first, Some(second));
        builder.set_override(second, Some(first));
        let table = builder.finish();

        assert!(!is_marked_nullable(&table, first));
    }

    #[test]
    fn marker_is_inherited_from_implemented_interface_member() {
        let mut builder = SymbolTableBuilder::new();
        let interface = builder.add_type("IInterface", TypeKind::Interface);
        let class = builder.add_type("Impl", TypeKind::Class);
        builder.add_interface(class, interface);
        let member = builder.add_method(interface, "GetNullObject", object());
        builder.add_attribute(member, "CanBeNull");
        let method = builder.add_method(class, "GetNullObject", object());
        let table = builder.finish();

        assert!(is_marked_nullable(&table, method));
    }

    #[test]
    fn marker_on_other_overload_does_not_count() {
        let mut builder = SymbolTableBuilder::new();
        let interface = builder.add_type("IInterface", TypeKind::Interface);
        let class = builder.add_type("Impl", TypeKind::Class);
        builder.add_interface(class, interface);
        let marked_overload = builder.add_method_with_signature(
            interface,
            "IInterface.Get(int)",
            "Get",
            "(int)",
            object(),
        );
        builder.add_attribute(marked_overload, "CanBeNull");
        builder.add_method(interface, "Get", object());
        let method = builder.add_method(class, "Get", object());
        builder.add_method_with_signature(class, "Impl.Get(int)", "Get", "(int)", object());
        let table = builder.finish();

        assert!(!is_marked_nullable(&table, method));
    }

    #[test]
    fn explicit_implementation_elsewhere_blocks_inheritance() {
        let mut builder = SymbolTableBuilder::new();
        let interface = builder.add_type("IInterface", TypeKind::Interface);
        let class = builder.add_type("Impl", TypeKind::Class);
        builder.add_interface(class, interface);
        let member = builder.add_method(interface, "Get", object());
        builder.add_attribute(member, "CanBeNull");
        let public_method = builder.add_method(class, "Get", object());
        let explicit = builder.add_method_with_signature(
            class,
            "Impl.IInterface.Get()",
            "IInterface.Get",
            "()",
            object(),
        );
        builder.map_implementation(class, member, explicit);
        let table = builder.finish();

        assert!(!is_marked_nullable(&table, public_method));
    }
}
