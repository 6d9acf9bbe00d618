use serde::{Deserialize, Serialize};

use crate::symbols::MethodId;

/// Index of a node inside its [`Body`] arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of code a body belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BodyKind {
    Method,
    Constructor,
    Accessor,
    Operator,
    Initializer,
}

/// Statement and expression kinds of the method-body IR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NodeKind {
    Block,
    ExpressionStatement,
    Return,
    Literal,
    /// Call expression; the target is `None` when it resolves outside the snapshot.
    Invocation { target: Option<MethodId> },
    ObjectCreation,
    FieldAccess,
    PropertyAccess,
    ConditionalAccess,
    Conditional,
    Coalesce,
    Assignment,
    ArrayInitializer,
    Argument,
    BinaryOperator,
    UnaryOperator,
    Conversion,
    LocalReference,
    ParameterReference,
    Lambda,
    LocalFunction,
    Other,
}

impl NodeKind {
    /// Nodes that open a nested function body inside a method body.
    pub(crate) fn is_nested_function(self) -> bool {
        matches!(self, NodeKind::Lambda | NodeKind::LocalFunction)
    }
}

/// Compile-time constant value of an expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) constant: Option<Constant>,
}

/// Method-body tree stored as an arena with parent links.
#[derive(Clone, Debug)]
pub(crate) struct Body {
    pub(crate) kind: BodyKind,
    pub(crate) owner: Option<MethodId>,
    nodes: Vec<Node>,
}

impl Body {
    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub(crate) fn constant(&self, id: NodeId) -> Option<&Constant> {
        self.node(id).constant.as_ref()
    }

    /// Strict ancestors of `id`, nearest first.
    pub(crate) fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// Strict descendants of `id` in document order.
    pub(crate) fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.node(current).children.iter().rev().copied());
        }
        result
    }

    /// Return statements of the whole body in document order.
    pub(crate) fn returns(&self) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|id| self.kind(*id) == NodeKind::Return)
            .collect()
    }

    /// Whether `id` sits inside a lambda or local function rather than the body itself.
    pub(crate) fn in_nested_function(&self, id: NodeId) -> bool {
        self.ancestors(id)
            .any(|ancestor| self.kind(ancestor).is_nested_function())
    }
}

/// Builds a [`Body`] node by node; children are appended in document order.
pub(crate) struct BodyBuilder {
    kind: BodyKind,
    owner: Option<MethodId>,
    nodes: Vec<Node>,
}

impl BodyBuilder {
    /// Starts a body whose root is a block.
    #[cfg(test)]
    pub(crate) fn new(kind: BodyKind, owner: Option<MethodId>) -> Self {
        Self::with_root(kind, owner, NodeKind::Block)
    }

    pub(crate) fn with_root(kind: BodyKind, owner: Option<MethodId>, root: NodeKind) -> Self {
        let root = Node {
            kind: root,
            parent: None,
            children: Vec::new(),
            constant: None,
        };
        Self {
            kind,
            owner,
            nodes: vec![root],
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            constant: None,
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    #[cfg(test)]
    pub(crate) fn push_literal(&mut self, parent: NodeId, constant: Option<Constant>) -> NodeId {
        let id = self.push(parent, NodeKind::Literal);
        self.nodes[id.index()].constant = constant;
        id
    }

    #[cfg(test)]
    pub(crate) fn push_call(&mut self, parent: NodeId, target: Option<MethodId>) -> NodeId {
        self.push(parent, NodeKind::Invocation { target })
    }

    pub(crate) fn set_constant(&mut self, id: NodeId, constant: Constant) {
        self.nodes[id.index()].constant = Some(constant);
    }

    pub(crate) fn finish(self) -> Body {
        Body {
            kind: self.kind,
            owner: self.owner,
            nodes: self.nodes,
        }
    }
}
