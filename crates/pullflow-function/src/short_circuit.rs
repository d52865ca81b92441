//! Short-circuit analysis.
//!
//! A body that only forwards its inputs (possibly reordered or duplicated,
//! possibly through `Identity` nodes) never needs to be invoked: each output
//! position can be filled straight from `args ++ captured`. The analysis runs
//! once per dataset; the resulting `SelectionPlan` is applied to every record.
//!
//! Move rule: an argument position may be moved into the output only if its
//! index occurs exactly once in the selection. Captured buffers are always
//! copied because every invocation and every iterator shares them.

use std::collections::HashMap;

use pullflow_core::types::Buffer;

use crate::def::{FunctionDef, Source};
use crate::error::{FunctionError, Result};

const IDENTITY_OP: &str = "Identity";

/// How one output position is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Take ownership of argument `i`.
    MoveArg(usize),
    /// Duplicate argument `i`; the input keeps its buffer.
    CopyArg(usize),
    /// Duplicate captured buffer `j`.
    CopyCaptured(usize),
}

/// Outcome of analysing a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    /// Output `i` is input `indices[i]` of `args ++ captured`.
    Selection(Vec<usize>),
    /// The body computes something; the reason is for diagnostics only.
    Ineligible(String),
}

impl Analysis {
    pub fn is_selection(&self) -> bool {
        matches!(self, Analysis::Selection(_))
    }
}

pub struct ShortCircuitAnalyzer;

impl ShortCircuitAnalyzer {
    pub fn analyze(def: &FunctionDef) -> Analysis {
        if def.outputs.is_empty() {
            return Analysis::Ineligible("function has no outputs".into());
        }
        let mut indices = Vec::with_capacity(def.outputs.len());
        for out in &def.outputs {
            match Self::trace(def, out) {
                Ok(i) => indices.push(i),
                Err(reason) => return Analysis::Ineligible(reason),
            }
        }
        Analysis::Selection(indices)
    }

    /// Follow `name` through `Identity` nodes back to an argument.
    fn trace(def: &FunctionDef, name: &str) -> std::result::Result<usize, String> {
        let mut current = name;
        // A well-formed body cannot chain more Identity nodes than it has.
        for _ in 0..=def.nodes.len() {
            match def.resolve(current) {
                Some(Source::Arg(i)) => return Ok(i),
                Some(Source::Node(n)) => {
                    let node = &def.nodes[n];
                    if node.op != IDENTITY_OP || node.inputs.len() != 1 {
                        return Err(format!(
                            "output '{name}' is computed by '{}' ({})",
                            node.name, node.op
                        ));
                    }
                    current = &node.inputs[0];
                }
                None => return Err(format!("output '{name}' references unknown '{current}'")),
            }
        }
        Err(format!("output '{name}' has a cyclic Identity chain"))
    }

    /// Analyse `def` bound to `num_captured` trailing captured inputs and build
    /// the per-element plan, or `None` when invocation is required.
    pub fn plan(def: &FunctionDef, num_captured: usize) -> Option<SelectionPlan> {
        let Analysis::Selection(indices) = Self::analyze(def) else {
            return None;
        };
        let num_args = def.inputs.len().checked_sub(num_captured)?;
        SelectionPlan::new(indices, num_args, num_captured).ok()
    }
}

/// Per-position move/copy decisions for a selection, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    indices: Vec<usize>,
    transfers: Vec<Transfer>,
    num_args: usize,
    num_captured: usize,
}

impl SelectionPlan {
    pub fn new(indices: Vec<usize>, num_args: usize, num_captured: usize) -> Result<Self> {
        let bound = num_args + num_captured;
        if let Some(bad) = indices.iter().find(|i| **i >= bound) {
            return Err(FunctionError::InvalidArgument(format!(
                "selection index {bad} is out of range for {num_args} args and {num_captured} captured"
            )));
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for i in &indices {
            *counts.entry(*i).or_default() += 1;
        }

        let transfers = indices
            .iter()
            .map(|&i| {
                if i >= num_args {
                    Transfer::CopyCaptured(i - num_args)
                } else if counts[&i] == 1 {
                    Transfer::MoveArg(i)
                } else {
                    Transfer::CopyArg(i)
                }
            })
            .collect();

        Ok(Self {
            indices,
            transfers,
            num_args,
            num_captured,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn move_eligibility(&self) -> Vec<bool> {
        self.transfers
            .iter()
            .map(|t| matches!(t, Transfer::MoveArg(_)))
            .collect()
    }

    pub fn num_args(&self) -> usize {
        self.num_args
    }

    pub fn num_captured(&self) -> usize {
        self.num_captured
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Build the output from `args` in one pass. Moved argument buffers keep
    /// their allocation; `args` is consumed either way.
    pub fn apply(&self, args: Vec<Buffer>, captured: &[Buffer]) -> Result<Vec<Buffer>> {
        if args.len() != self.num_args {
            return Err(FunctionError::InvalidArgument(format!(
                "selection expects {} args, got {}",
                self.num_args,
                args.len()
            )));
        }
        if captured.len() != self.num_captured {
            return Err(FunctionError::InvalidArgument(format!(
                "selection expects {} captured, got {}",
                self.num_captured,
                captured.len()
            )));
        }

        let mut slots: Vec<Option<Buffer>> = args.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(self.transfers.len());
        for t in &self.transfers {
            let buf = match *t {
                Transfer::MoveArg(i) => slots[i].take(),
                Transfer::CopyArg(i) => slots[i].clone(),
                Transfer::CopyCaptured(j) => Some(captured[j].clone()),
            };
            out.push(buf.ok_or_else(|| {
                FunctionError::Failed(format!("argument for {t:?} was already moved"))
            })?);
        }
        Ok(out)
    }
}
