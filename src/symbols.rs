use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::source::TextSpan;

/// Index of a method in the [`SymbolTable`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MethodId(u32);

impl MethodId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a type in the [`SymbolTable`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct TypeId(u32);

impl TypeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TypeKind {
    Class,
    Struct,
    Interface,
}

/// Declared return type of a method.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ReturnType {
    Void,
    /// Value types cannot represent null.
    Value(String),
    /// Reference types, including unconstrained type parameters.
    Reference(String),
}

/// Declared method as seen by the analysis.
#[derive(Clone, Debug)]
pub(crate) struct MethodSymbol {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) containing_type: TypeId,
    pub(crate) return_type: ReturnType,
    pub(crate) is_override: bool,
    pub(crate) overridden: Option<MethodId>,
    pub(crate) attributes: Vec<String>,
    pub(crate) name_span: Option<TextSpan>,
}

/// Declared class, struct or interface.
#[derive(Clone, Debug)]
pub(crate) struct TypeSymbol {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) base: Option<TypeId>,
    pub(crate) interfaces: Vec<TypeId>,
    pub(crate) members: Vec<MethodId>,
    /// Explicit interface member -> implementing method entries.
    pub(crate) implementations: BTreeMap<MethodId, MethodId>,
}

/// Read-only view of the host symbol table needed to resolve nullability markers.
pub(crate) trait SymbolQuery {
    fn method(&self, id: MethodId) -> &MethodSymbol;

    fn type_symbol(&self, id: TypeId) -> &TypeSymbol;

    fn overridden_method(&self, id: MethodId) -> Option<MethodId>;

    /// Interface members sharing the method's name across every interface of its containing type.
    fn implemented_interface_members(&self, id: MethodId) -> Vec<MethodId>;

    /// Method of `ty` that implements `interface_member`, if any.
    fn resolves_to(&self, ty: TypeId, interface_member: MethodId) -> Option<MethodId>;

    fn qualified_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        let owner = self.type_symbol(method.containing_type);
        format!("{}.{}", owner.name, method.name)
    }
}

/// Symbol table built once per compilation and shared by reference.
#[derive(Clone, Debug, Default)]
pub(crate) struct SymbolTable {
    types: Vec<TypeSymbol>,
    methods: Vec<MethodSymbol>,
    all_interfaces: Vec<Vec<TypeId>>,
}

impl SymbolTable {
    pub(crate) fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub(crate) fn type_count(&self) -> usize {
        self.types.len()
    }

    #[cfg(test)]
    pub(crate) fn method_ids(&self) -> impl Iterator<Item = MethodId> + '_ {
        (0..self.methods.len()).map(|index| MethodId(index as u32))
    }

    /// Interfaces reachable from `ty` through its bases and interface inheritance.
    pub(crate) fn all_interfaces(&self, ty: TypeId) -> &[TypeId] {
        &self.all_interfaces[ty.index()]
    }

    fn base_chain(&self, ty: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(ty);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            chain.push(id);
            current = self.types[id.index()].base;
        }
        chain
    }

    fn collect_interfaces(&self, ty: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        let start = &self.types[ty.index()];
        if let Some(base) = start.base {
            queue.push_back(base);
        }
        queue.extend(start.interfaces.iter().copied());
        while let Some(id) = queue.pop_front() {
            if id == ty || !seen.insert(id) {
                continue;
            }
            let symbol = &self.types[id.index()];
            if symbol.kind == TypeKind::Interface {
                result.push(id);
            }
            if let Some(base) = symbol.base {
                queue.push_back(base);
            }
            queue.extend(symbol.interfaces.iter().copied());
        }
        result
    }
}

impl SymbolQuery for SymbolTable {
    fn method(&self, id: MethodId) -> &MethodSymbol {
        &self.methods[id.index()]
    }

    fn type_symbol(&self, id: TypeId) -> &TypeSymbol {
        &self.types[id.index()]
    }

    fn overridden_method(&self, id: MethodId) -> Option<MethodId> {
        let method = self.method(id);
        if !method.is_override {
            return None;
        }
        method.overridden
    }

    fn implemented_interface_members(&self, id: MethodId) -> Vec<MethodId> {
        let method = self.method(id);
        let mut members = Vec::new();
        for interface in self.all_interfaces(method.containing_type) {
            for member in &self.types[interface.index()].members {
                if self.methods[member.index()].name == method.name {
                    members.push(*member);
                }
            }
        }
        members
    }

    fn resolves_to(&self, ty: TypeId, interface_member: MethodId) -> Option<MethodId> {
        let target = self.method(interface_member);
        for id in self.base_chain(ty) {
            let symbol = &self.types[id.index()];
            if let Some(implementation) = symbol.implementations.get(&interface_member) {
                return Some(*implementation);
            }
            let implicit = symbol.members.iter().copied().find(|member| {
                let candidate = &self.methods[member.index()];
                candidate.name == target.name && candidate.signature == target.signature
            });
            if implicit.is_some() {
                return implicit;
            }
        }
        None
    }
}

/// Incremental construction of a [`SymbolTable`].
#[derive(Default)]
pub(crate) struct SymbolTableBuilder {
    types: Vec<TypeSymbol>,
    methods: Vec<MethodSymbol>,
}

impl SymbolTableBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_type(&mut self, name: &str, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeSymbol {
            name: name.to_string(),
            kind,
            base: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            implementations: BTreeMap::new(),
        });
        id
    }

    pub(crate) fn set_base(&mut self, ty: TypeId, base: TypeId) {
        self.types[ty.index()].base = Some(base);
    }

    pub(crate) fn add_interface(&mut self, ty: TypeId, interface: TypeId) {
        self.types[ty.index()].interfaces.push(interface);
    }

    /// Adds a parameterless method keyed as `Type.Name()`.
    #[cfg(test)]
    pub(crate) fn add_method(
        &mut self,
        ty: TypeId,
        name: &str,
        return_type: ReturnType,
    ) -> MethodId {
        let key = format!("{}.{}()", self.types[ty.index()].name, name);
        self.add_method_with_signature(ty, &key, name, "()", return_type)
    }

    pub(crate) fn add_method_with_signature(
        &mut self,
        ty: TypeId,
        key: &str,
        name: &str,
        signature: &str,
        return_type: ReturnType,
    ) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodSymbol {
            key: key.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
            containing_type: ty,
            return_type,
            is_override: false,
            overridden: None,
            attributes: Vec::new(),
            name_span: None,
        });
        self.types[ty.index()].members.push(id);
        id
    }

    pub(crate) fn add_attribute(&mut self, method: MethodId, attribute: &str) {
        self.methods[method.index()]
            .attributes
            .push(attribute.to_string());
    }

    pub(crate) fn set_override(&mut self, method: MethodId, overridden: Option<MethodId>) {
        let symbol = &mut self.methods[method.index()];
        symbol.is_override = true;
        symbol.overridden = overridden;
    }

    pub(crate) fn set_name_span(&mut self, method: MethodId, span: TextSpan) {
        self.methods[method.index()].name_span = Some(span);
    }

    pub(crate) fn map_implementation(
        &mut self,
        ty: TypeId,
        interface_member: MethodId,
        implementation: MethodId,
    ) {
        self.types[ty.index()]
            .implementations
            .insert(interface_member, implementation);
    }

    pub(crate) fn finish(self) -> SymbolTable {
        let mut table = SymbolTable {
            types: self.types,
            methods: self.methods,
            all_interfaces: Vec::new(),
        };
        let all_interfaces = (0..table.types.len())
            .map(|index| table.collect_interfaces(TypeId(index as u32)))
            .collect();
        table.all_interfaces = all_interfaces;
        table
    }
}
