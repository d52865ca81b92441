//! Declared transform bodies.
//!
//! A body is a list of named arguments, a list of nodes in dependency order,
//! and a list of outputs. Every node input and every output names either an
//! argument or an earlier node.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use pullflow_core::schema::DType;

use crate::error::{FunctionError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDef {
    pub name: String,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyNode {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub inputs: Vec<ArgDef>,
    #[serde(default)]
    pub nodes: Vec<BodyNode>,
    pub outputs: Vec<String>,
}

/// What a name inside a body refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Arg(usize),
    Node(usize),
}

impl FunctionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.inputs.push(ArgDef {
            name: name.into(),
            dtype,
        });
        self
    }

    pub fn node(mut self, name: impl Into<String>, op: impl Into<String>, inputs: &[&str]) -> Self {
        self.nodes.push(BodyNode {
            name: name.into(),
            op: op.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn arg_dtypes(&self) -> Vec<DType> {
        self.inputs.iter().map(|a| a.dtype).collect()
    }

    /// Resolve a name against the arguments first, then the nodes.
    pub fn resolve(&self, name: &str) -> Option<Source> {
        if let Some(i) = self.inputs.iter().position(|a| a.name == name) {
            return Some(Source::Arg(i));
        }
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(Source::Node)
    }

    /// Check names are unique and every reference points backwards.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self
            .inputs
            .iter()
            .map(|a| &a.name)
            .chain(self.nodes.iter().map(|n| &n.name))
        {
            if name.is_empty() {
                return Err(FunctionError::Instantiation(format!(
                    "function '{}' has an unnamed argument or node",
                    self.name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(FunctionError::Instantiation(format!(
                    "function '{}' defines '{name}' twice",
                    self.name
                )));
            }
        }

        for (pos, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                match self.resolve(input) {
                    Some(Source::Arg(_)) => {}
                    Some(Source::Node(j)) if j < pos => {}
                    Some(Source::Node(_)) => {
                        return Err(FunctionError::Instantiation(format!(
                            "function '{}': node '{}' uses '{input}' before it is defined",
                            self.name, node.name
                        )))
                    }
                    None => {
                        return Err(FunctionError::Instantiation(format!(
                            "function '{}': node '{}' references unknown '{input}'",
                            self.name, node.name
                        )))
                    }
                }
            }
        }

        for out in &self.outputs {
            if self.resolve(out).is_none() {
                return Err(FunctionError::Instantiation(format!(
                    "function '{}': output references unknown '{out}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
