use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;

use crate::ir::{Body, BodyBuilder, BodyKind, Constant, NodeId, NodeKind};
use crate::source::{LineIndex, TextSpan};
use crate::symbols::{MethodId, ReturnType, SymbolTable, SymbolTableBuilder, TypeId, TypeKind};

/// Document of the compilation together with its analyzable bodies.
#[derive(Clone, Debug)]
pub(crate) struct SourceUnit {
    pub(crate) uri: String,
    pub(crate) text: Option<String>,
    pub(crate) line_index: Option<LineIndex>,
    pub(crate) bodies: Vec<Body>,
    pub(crate) artifact_index: i64,
}

/// Decoded snapshot ready for analysis.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) symbols: SymbolTable,
    pub(crate) units: Vec<SourceUnit>,
    pub(crate) body_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotFile {
    #[serde(default)]
    types: Vec<TypeDecl>,
    #[serde(default)]
    units: Vec<UnitDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeDecl {
    name: String,
    kind: TypeKind,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    interfaces: Vec<String>,
    #[serde(default)]
    methods: Vec<MethodDecl>,
    #[serde(default)]
    implementations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodDecl {
    #[serde(default)]
    key: Option<String>,
    name: String,
    #[serde(default = "default_signature")]
    signature: String,
    returns: ReturnType,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    is_override: bool,
    #[serde(default)]
    overrides: Option<String>,
    #[serde(default)]
    name_span: Option<TextSpan>,
}

fn default_signature() -> String {
    "()".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitDecl {
    uri: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    bodies: Vec<BodyDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BodyDecl {
    kind: BodyKind,
    #[serde(default)]
    owner: Option<String>,
    root: NodeDecl,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeDecl {
    kind: NodeKindDecl,
    #[serde(default)]
    children: Vec<NodeDecl>,
    #[serde(default)]
    constant: Option<Constant>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    span: Option<TextSpan>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NodeKindDecl {
    Block,
    ExpressionStatement,
    Return,
    Literal,
    Invocation,
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

/// Loads the compilation snapshot at `input`.
pub(crate) fn scan_snapshot(input: &Path) -> Result<ScanOutput> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("failed to read snapshot {}", input.display()))?;
    let base_dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
    let snapshot = parse_snapshot(&content)
        .with_context(|| format!("failed to decode snapshot {}", input.display()))?;
    build_output(snapshot, Some(&base_dir))
}

/// Decodes an in-memory snapshot; unit texts must be inline.
#[cfg(test)]
pub(crate) fn scan_snapshot_str(content: &str) -> Result<ScanOutput> {
    let snapshot = parse_snapshot(content).context("failed to decode snapshot")?;
    build_output(snapshot, None)
}

fn parse_snapshot(content: &str) -> Result<SnapshotFile> {
    let deserializer = &mut serde_json::Deserializer::from_str(content);
    let snapshot = serde_path_to_error::deserialize(deserializer)?;
    Ok(snapshot)
}

fn build_output(snapshot: SnapshotFile, base_dir: Option<&Path>) -> Result<ScanOutput> {
    let (symbols, method_keys) = build_symbols(&snapshot.types)?;
    let mut artifacts = Vec::new();
    let mut units = Vec::new();
    let mut body_count = 0;
    for unit in snapshot.units {
        let text = match unit.text {
            Some(text) => Some(text),
            None => read_unit_text(base_dir, &unit.uri),
        };
        let mut bodies = Vec::with_capacity(unit.bodies.len());
        for (index, body) in unit.bodies.iter().enumerate() {
            let built = build_body(body, &method_keys)
                .with_context(|| format!("invalid body {index} in {}", unit.uri))?;
            bodies.push(built);
        }
        body_count += bodies.len();
        let artifact_index =
            push_artifact(&mut artifacts, &unit.uri, text.as_deref().map(str::len));
        let line_index = text.as_deref().map(LineIndex::new);
        units.push(SourceUnit {
            uri: unit.uri,
            text,
            line_index,
            bodies,
            artifact_index,
        });
    }
    Ok(ScanOutput {
        artifacts,
        symbols,
        units,
        body_count,
    })
}

fn read_unit_text(base_dir: Option<&Path>, uri: &str) -> Option<String> {
    let base_dir = base_dir?;
    let path: PathBuf = base_dir.join(uri);
    match fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "source text unavailable");
            None
        }
    }
}

fn push_artifact(artifacts: &mut Vec<Artifact>, uri: &str, len: Option<usize>) -> i64 {
    let location = ArtifactLocation::builder().uri(uri.to_string()).build();
    let roles = vec![
        serde_json::to_value(ArtifactRoles::AnalysisTarget).unwrap_or(serde_json::Value::Null),
    ];
    let artifact = match len {
        Some(len) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder().location(location).roles(roles).build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn build_symbols(types: &[TypeDecl]) -> Result<(SymbolTable, BTreeMap<String, MethodId>)> {
    let mut builder = SymbolTableBuilder::new();
    let mut type_ids: BTreeMap<&str, TypeId> = BTreeMap::new();
    for decl in types {
        let id = builder.add_type(&decl.name, decl.kind);
        if type_ids.insert(decl.name.as_str(), id).is_some() {
            anyhow::bail!("duplicate type found: {}", decl.name);
        }
    }

    let mut method_keys: BTreeMap<String, MethodId> = BTreeMap::new();
    for decl in types {
        let ty = type_ids[decl.name.as_str()];
        if let Some(base) = &decl.base {
            match type_ids.get(base.as_str()) {
                Some(base_id) => builder.set_base(ty, *base_id),
                None => debug!(type_name = %decl.name, base = %base, "base type not in snapshot"),
            }
        }
        for interface in &decl.interfaces {
            match type_ids.get(interface.as_str()) {
                Some(interface_id) => builder.add_interface(ty, *interface_id),
                None => {
                    debug!(type_name = %decl.name, interface = %interface, "interface not in snapshot")
                }
            }
        }
        for method in &decl.methods {
            let key = method
                .key
                .clone()
                .unwrap_or_else(|| format!("{}.{}{}", decl.name, method.name, method.signature));
            let id = builder.add_method_with_signature(
                ty,
                &key,
                &method.name,
                &method.signature,
                method.returns.clone(),
            );
            for attribute in &method.attributes {
                builder.add_attribute(id, attribute);
            }
            if let Some(span) = method.name_span {
                builder.set_name_span(id, span);
            }
            if method_keys.insert(key.clone(), id).is_some() {
                anyhow::bail!("duplicate method found: {key}");
            }
        }
    }

    for decl in types {
        let ty = type_ids[decl.name.as_str()];
        for method in &decl.methods {
            if !method.is_override && method.overrides.is_none() {
                continue;
            }
            let key = method
                .key
                .clone()
                .unwrap_or_else(|| format!("{}.{}{}", decl.name, method.name, method.signature));
            let id = method_keys[&key];
            let overridden = method.overrides.as_ref().and_then(|target| {
                let resolved = method_keys.get(target).copied();
                if resolved.is_none() {
                    debug!(method = %key, overrides = %target, "overridden method not in snapshot");
                }
                resolved
            });
            builder.set_override(id, overridden);
        }
        for (member, implementation) in &decl.implementations {
            let (Some(member_id), Some(implementation_id)) =
                (method_keys.get(member), method_keys.get(implementation))
            else {
                debug!(
                    type_name = %decl.name,
                    member = %member,
                    implementation = %implementation,
                    "implementation entry not in snapshot"
                );
                continue;
            };
            builder.map_implementation(ty, *member_id, *implementation_id);
        }
    }

    Ok((builder.finish(), method_keys))
}

fn build_body(decl: &BodyDecl, method_keys: &BTreeMap<String, MethodId>) -> Result<Body> {
    let owner = match &decl.owner {
        Some(key) => {
            let owner = method_keys.get(key).copied();
            if owner.is_none() {
                debug!(owner = %key, "body owner not in snapshot");
            }
            owner
        }
        None => None,
    };
    let root_kind = node_kind(&decl.root, method_keys);
    let mut builder = BodyBuilder::with_root(decl.kind, owner, root_kind);
    let root = builder.root();
    apply_node_details(&mut builder, root, &decl.root)?;
    for child in &decl.root.children {
        push_node(&mut builder, root, child, method_keys)?;
    }
    Ok(builder.finish())
}

fn push_node(
    builder: &mut BodyBuilder,
    parent: NodeId,
    decl: &NodeDecl,
    method_keys: &BTreeMap<String, MethodId>,
) -> Result<()> {
    let id = builder.push(parent, node_kind(decl, method_keys));
    apply_node_details(builder, id, decl)?;
    for child in &decl.children {
        push_node(builder, id, child, method_keys)?;
    }
    Ok(())
}

fn apply_node_details(builder: &mut BodyBuilder, id: NodeId, decl: &NodeDecl) -> Result<()> {
    if let Some(constant) = &decl.constant {
        builder.set_constant(id, constant.clone());
    }
    // Node spans are checked but not kept; findings are located by method name.
    if let Some(span) = decl.span {
        if span.end < span.start {
            anyhow::bail!("node span ends before it starts: {}..{}", span.start, span.end);
        }
    }
    Ok(())
}

fn node_kind(decl: &NodeDecl, method_keys: &BTreeMap<String, MethodId>) -> NodeKind {
    match decl.kind {
        NodeKindDecl::Block => NodeKind::Block,
        NodeKindDecl::ExpressionStatement => NodeKind::ExpressionStatement,
        NodeKindDecl::Return => NodeKind::Return,
        NodeKindDecl::Literal => NodeKind::Literal,
        NodeKindDecl::Invocation => {
            let target = decl.target.as_ref().and_then(|key| {
                let resolved = method_keys.get(key).copied();
                if resolved.is_none() {
                    debug!(target = %key, "call target not in snapshot");
                }
                resolved
            });
            NodeKind::Invocation { target }
        }
        NodeKindDecl::ObjectCreation => NodeKind::ObjectCreation,
        NodeKindDecl::FieldAccess => NodeKind::FieldAccess,
        NodeKindDecl::PropertyAccess => NodeKind::PropertyAccess,
        NodeKindDecl::ConditionalAccess => NodeKind::ConditionalAccess,
        NodeKindDecl::Conditional => NodeKind::Conditional,
        NodeKindDecl::Coalesce => NodeKind::Coalesce,
        NodeKindDecl::Assignment => NodeKind::Assignment,
        NodeKindDecl::ArrayInitializer => NodeKind::ArrayInitializer,
        NodeKindDecl::Argument => NodeKind::Argument,
        NodeKindDecl::BinaryOperator => NodeKind::BinaryOperator,
        NodeKindDecl::UnaryOperator => NodeKind::UnaryOperator,
        NodeKindDecl::Conversion => NodeKind::Conversion,
        NodeKindDecl::LocalReference => NodeKind::LocalReference,
        NodeKindDecl::ParameterReference => NodeKind::ParameterReference,
        NodeKindDecl::Lambda => NodeKind::Lambda,
        NodeKindDecl::LocalFunction => NodeKind::LocalFunction,
        NodeKindDecl::Other => NodeKind::Other,
    }
}
