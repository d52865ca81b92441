//! Structural description of a dataset pipeline.
//!
//! Datasets serialize themselves through a `GraphBuilder` sink; the concrete
//! `GraphDefBuilder` produces a serde-friendly `GraphDef` that is sufficient to
//! rebuild an equivalent pipeline without the original in-memory objects.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{hash_serde, Hash256};
use crate::id::NodeId;
use crate::schema::{DType, PartialShape};
use crate::types::Buffer;

/// Opaque handle used to wire one node into a larger description.
pub type NodeRef = NodeId;

/// Op name for embedded constants.
pub const CONST_OP: &str = "Const";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Func(String),
    Bool(bool),
    Int(i64),
    DTypes(Vec<DType>),
    Shapes(Vec<PartialShape>),
    Tensor(Buffer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    pub op: String,
    /// Single-valued inputs, in positional order.
    pub inputs: Vec<NodeId>,
    /// List-valued inputs (e.g. captured constants), in positional order.
    pub list_inputs: Vec<Vec<NodeId>>,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl NodeDef {
    fn attr(&self, key: &str) -> Result<&AttrValue> {
        self.attrs
            .get(key)
            .ok_or_else(|| Error::Graph(format!("node {} ({}) lacks attr '{key}'", self.id, self.op)))
    }

    fn mismatch(&self, key: &str, want: &str) -> Error {
        Error::Graph(format!(
            "node {} ({}): attr '{key}' is not {want}",
            self.id, self.op
        ))
    }

    pub fn attr_func(&self, key: &str) -> Result<&str> {
        match self.attr(key)? {
            AttrValue::Func(f) => Ok(f),
            _ => Err(self.mismatch(key, "a function")),
        }
    }

    pub fn attr_bool(&self, key: &str) -> Result<bool> {
        match self.attr(key)? {
            AttrValue::Bool(b) => Ok(*b),
            _ => Err(self.mismatch(key, "a bool")),
        }
    }

    pub fn attr_int(&self, key: &str) -> Result<i64> {
        match self.attr(key)? {
            AttrValue::Int(i) => Ok(*i),
            _ => Err(self.mismatch(key, "an int")),
        }
    }

    pub fn attr_dtypes(&self, key: &str) -> Result<&[DType]> {
        match self.attr(key)? {
            AttrValue::DTypes(v) => Ok(v),
            _ => Err(self.mismatch(key, "a dtype list")),
        }
    }

    pub fn attr_shapes(&self, key: &str) -> Result<&[PartialShape]> {
        match self.attr(key)? {
            AttrValue::Shapes(v) => Ok(v),
            _ => Err(self.mismatch(key, "a shape list")),
        }
    }

    pub fn attr_tensor(&self, key: &str) -> Result<&Buffer> {
        match self.attr(key)? {
            AttrValue::Tensor(t) => Ok(t),
            _ => Err(self.mismatch(key, "a tensor")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
    /// Names of every function referenced by a node.
    pub functions: BTreeSet<String>,
    /// Root dataset node.
    pub output: Option<NodeId>,
}

impl GraphDef {
    pub fn node(&self, id: NodeId) -> Result<&NodeDef> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::Graph(format!("dangling node reference {id}")))
    }

    pub fn output_node(&self) -> Result<&NodeDef> {
        let id = self
            .output
            .ok_or_else(|| Error::Graph("graph has no output node".into()))?;
        self.node(id)
    }

    /// Value of a `Const` node.
    pub fn constant(&self, id: NodeId) -> Result<&Buffer> {
        let node = self.node(id)?;
        if node.op != CONST_OP {
            return Err(Error::Graph(format!(
                "node {id} is a '{}' node, expected a constant",
                node.op
            )));
        }
        node.attr_tensor("value")
    }

    /// Stable digest of the whole description. Two pipelines with the same
    /// fingerprint are equivalent for checkpoint purposes.
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(self)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Graph(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Graph(e.to_string()))
    }
}

/// Sink that datasets serialize themselves into.
pub trait GraphBuilder {
    /// Embed a constant value and return its node.
    fn add_constant(&mut self, value: &Buffer) -> Result<NodeRef>;

    /// Record a reference to a function by name.
    fn add_function(&mut self, name: &str) -> Result<()>;

    /// Add a dataset node wired to already-added inputs.
    fn add_dataset(
        &mut self,
        op: &str,
        inputs: Vec<NodeRef>,
        list_inputs: Vec<Vec<NodeRef>>,
        attrs: BTreeMap<String, AttrValue>,
    ) -> Result<NodeRef>;
}

/// `GraphBuilder` that accumulates a `GraphDef`.
#[derive(Debug, Default)]
pub struct GraphDefBuilder {
    graph: GraphDef,
    next_id: u64,
}

impl GraphDefBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: NodeDef) -> NodeRef {
        let id = node.id;
        self.graph.nodes.push(node);
        id
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn check_refs(&self, refs: &[NodeRef]) -> Result<()> {
        for r in refs {
            if !self.graph.nodes.iter().any(|n| n.id == *r) {
                return Err(Error::Graph(format!("input {r} was not added to this builder")));
            }
        }
        Ok(())
    }

    /// Seal the description with `output` as its root.
    pub fn finish(mut self, output: NodeRef) -> Result<GraphDef> {
        self.check_refs(&[output])?;
        self.graph.output = Some(output);
        Ok(self.graph)
    }
}

impl GraphBuilder for GraphDefBuilder {
    fn add_constant(&mut self, value: &Buffer) -> Result<NodeRef> {
        let id = self.fresh_id();
        let mut attrs = BTreeMap::new();
        attrs.insert("value".to_string(), AttrValue::Tensor(value.clone()));
        attrs.insert("dtype".to_string(), AttrValue::DTypes(vec![value.dtype()]));
        Ok(self.push(NodeDef {
            id,
            op: CONST_OP.to_string(),
            inputs: vec![],
            list_inputs: vec![],
            attrs,
        }))
    }

    fn add_function(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Graph("function name must not be empty".into()));
        }
        self.graph.functions.insert(name.to_string());
        Ok(())
    }

    fn add_dataset(
        &mut self,
        op: &str,
        inputs: Vec<NodeRef>,
        list_inputs: Vec<Vec<NodeRef>>,
        attrs: BTreeMap<String, AttrValue>,
    ) -> Result<NodeRef> {
        self.check_refs(&inputs)?;
        for list in &list_inputs {
            self.check_refs(list)?;
        }
        let id = self.fresh_id();
        Ok(self.push(NodeDef {
            id,
            op: op.to_string(),
            inputs,
            list_inputs,
            attrs,
        }))
    }
}
