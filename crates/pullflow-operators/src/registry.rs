//! Graph round trip: describe a dataset tree and rebuild it.
//!
//! Node layouts:
//! - `RangeDataset`: inputs `[start, stop, step]` (scalar `Int64` constants).
//! - `RecordsDataset`: one list input per record, one constant per component.
//! - `MapDataset`: input 0 is the upstream dataset, list input 1 holds the
//!   captured constants; attrs `f`, `Targuments`, `output_types`,
//!   `output_shapes`, `use_inter_op_parallelism`.

use std::sync::Arc;

use pullflow_core::config::EngineConfig;
use pullflow_core::graph::{GraphDef, GraphDefBuilder, NodeDef};
use pullflow_core::id::NodeId;
use pullflow_core::schema::OutputSignature;
use pullflow_core::types::{Buffer, Record};
use pullflow_function::FunctionLibrary;

use crate::map::{MapDataset, MAP_OP};
use crate::source::{RangeDataset, RecordsDataset, RANGE_OP, RECORDS_OP};
use crate::traits::{Dataset, OpError};

/// Serialize `dataset` and everything upstream of it.
pub fn graph_of(dataset: &dyn Dataset) -> Result<GraphDef, OpError> {
    let mut builder = GraphDefBuilder::new();
    let root = dataset.as_graph(&mut builder)?;
    Ok(builder.finish(root)?)
}

/// Rebuild the dataset rooted at `graph.output`.
pub fn dataset_from_graph(
    graph: &GraphDef,
    library: &FunctionLibrary,
    config: &EngineConfig,
) -> Result<Arc<dyn Dataset>, OpError> {
    let root = graph.output_node()?.id;
    Rebuilder {
        graph,
        library,
        config,
    }
    .build(root, 0)
}

struct Rebuilder<'a> {
    graph: &'a GraphDef,
    library: &'a FunctionLibrary,
    config: &'a EngineConfig,
}

impl Rebuilder<'_> {
    fn build(&self, id: NodeId, depth: usize) -> Result<Arc<dyn Dataset>, OpError> {
        if depth > self.graph.nodes.len() {
            return Err(OpError::Graph(format!("dataset chain through {id} is cyclic")));
        }
        let node = self.graph.node(id)?;
        match node.op.as_str() {
            RANGE_OP => {
                let &[start, stop, step] = node.inputs.as_slice() else {
                    return Err(OpError::Graph(format!(
                        "{} node {id} needs 3 inputs, has {}",
                        RANGE_OP,
                        node.inputs.len()
                    )));
                };
                let ds: Arc<dyn Dataset> = RangeDataset::new(
                    self.scalar_i64(start)?,
                    self.scalar_i64(stop)?,
                    self.scalar_i64(step)?,
                )?;
                Ok(ds)
            }
            RECORDS_OP => {
                let signature = signature_of(node)?;
                let records = node
                    .list_inputs
                    .iter()
                    .map(|list| self.constants(list).map(Record::new))
                    .collect::<Result<Vec<_>, _>>()?;
                let ds: Arc<dyn Dataset> = RecordsDataset::new(signature, records)?;
                Ok(ds)
            }
            MAP_OP => {
                let upstream = node.inputs.first().copied().ok_or_else(|| {
                    OpError::Graph(format!("{MAP_OP} node {id} has no upstream input"))
                })?;
                let input = self.build(upstream, depth + 1)?;
                let captured = match node.list_inputs.first() {
                    Some(list) => self.constants(list)?,
                    None => Vec::new(),
                };
                let declared = node.attr_dtypes("Targuments")?;
                let actual: Vec<_> = captured.iter().map(Buffer::dtype).collect();
                if declared != actual.as_slice() {
                    return Err(OpError::Graph(format!(
                        "{MAP_OP} node {id}: Targuments {declared:?} do not match captured {actual:?}"
                    )));
                }
                let ds: Arc<dyn Dataset> = MapDataset::new(
                    input,
                    node.attr_func("f")?,
                    self.library,
                    captured,
                    signature_of(node)?,
                    node.attr_bool("use_inter_op_parallelism")?,
                    self.config,
                )?;
                Ok(ds)
            }
            other => Err(OpError::Graph(format!("unknown dataset op '{other}' at {id}"))),
        }
    }

    fn constants(&self, ids: &[NodeId]) -> Result<Vec<Buffer>, OpError> {
        ids.iter()
            .map(|id| self.graph.constant(*id).cloned().map_err(OpError::from))
            .collect()
    }

    fn scalar_i64(&self, id: NodeId) -> Result<i64, OpError> {
        let buf = self.graph.constant(id)?;
        match buf.as_i64() {
            Some([v]) if buf.shape.is_empty() => Ok(*v),
            _ => Err(OpError::Graph(format!(
                "constant {id} is not a scalar int64"
            ))),
        }
    }
}

fn signature_of(node: &NodeDef) -> Result<OutputSignature, OpError> {
    Ok(OutputSignature::from_parts(
        node.attr_dtypes("output_types")?.to_vec(),
        node.attr_shapes("output_shapes")?.to_vec(),
    )?)
}
