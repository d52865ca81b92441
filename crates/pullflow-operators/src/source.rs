//! Leaf datasets: an integer range and an in-memory list of records.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pullflow_ckpt::state::full_key;
use pullflow_ckpt::{StateReader, StateWriter};
use pullflow_core::graph::{AttrValue, GraphBuilder, NodeRef};
use pullflow_core::schema::{DType, OutputSignature, TensorSpec};
use pullflow_core::types::{Buffer, Record};
use pullflow_function::IteratorContext;

use crate::traits::{check_cancelled, Dataset, DatasetIterator, Next, OpError};

pub const RANGE_OP: &str = "RangeDataset";
pub const RECORDS_OP: &str = "RecordsDataset";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn signature_attrs(sig: &OutputSignature) -> BTreeMap<String, AttrValue> {
    let mut attrs = BTreeMap::new();
    attrs.insert("output_types".to_string(), AttrValue::DTypes(sig.dtypes()));
    attrs.insert("output_shapes".to_string(), AttrValue::Shapes(sig.shapes()));
    attrs
}

/// Scalar `Int64` records `start, start + step, ...` up to `stop` (exclusive).
#[derive(Debug)]
pub struct RangeDataset {
    start: i64,
    stop: i64,
    step: i64,
    signature: OutputSignature,
}

impl RangeDataset {
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Arc<Self>, OpError> {
        if step == 0 {
            return Err(OpError::Setup("range step must not be zero".into()));
        }
        Ok(Arc::new(Self {
            start,
            stop,
            step,
            signature: OutputSignature::new(vec![TensorSpec::scalar(DType::Int64)]),
        }))
    }

    fn in_range(&self, v: i64) -> bool {
        if self.step > 0 {
            v < self.stop
        } else {
            v > self.stop
        }
    }
}

impl Dataset for RangeDataset {
    fn name(&self) -> &'static str {
        RANGE_OP
    }

    fn output_signature(&self) -> &OutputSignature {
        &self.signature
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        let next = self.start;
        Box::new(RangeIterator {
            prefix: format!("{prefix}::Range"),
            dataset: self,
            next: Mutex::new(Some(next)),
        })
    }

    fn as_graph(&self, b: &mut dyn GraphBuilder) -> Result<NodeRef, OpError> {
        let start = b.add_constant(&Buffer::scalar_i64(self.start))?;
        let stop = b.add_constant(&Buffer::scalar_i64(self.stop))?;
        let step = b.add_constant(&Buffer::scalar_i64(self.step))?;
        Ok(b.add_dataset(
            RANGE_OP,
            vec![start, stop, step],
            vec![],
            signature_attrs(&self.signature),
        )?)
    }

    fn debug_string(&self) -> String {
        format!("RangeDataset({}, {}, {})", self.start, self.stop, self.step)
    }
}

pub struct RangeIterator {
    dataset: Arc<RangeDataset>,
    prefix: String,
    /// `None` once the next value would overflow.
    next: Mutex<Option<i64>>,
}

impl DatasetIterator for RangeIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&mut self, _ctx: &IteratorContext) -> Result<(), OpError> {
        Ok(())
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Next, OpError> {
        check_cancelled(ctx)?;
        let mut next = lock(&self.next);
        match *next {
            Some(v) if self.dataset.in_range(v) => {
                *next = v.checked_add(self.dataset.step);
                Ok(Next::Record(Record::new(vec![Buffer::scalar_i64(v)])))
            }
            _ => Ok(Next::EndOfSequence),
        }
    }

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError> {
        match *lock(&self.next) {
            Some(v) => writer.write_i64(full_key(&self.prefix, "next"), v),
            None => writer.write_bool(full_key(&self.prefix, "overflowed"), true),
        }
        Ok(())
    }

    fn restore(&mut self, _ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError> {
        let overflowed = full_key(&self.prefix, "overflowed");
        let restored = if reader.contains(&overflowed) && reader.read_bool(&overflowed)? {
            None
        } else {
            Some(reader.read_i64(&full_key(&self.prefix, "next"))?)
        };
        *lock(&self.next) = restored;
        Ok(())
    }
}

/// A fixed list of records, each checked against `signature` up front.
#[derive(Debug)]
pub struct RecordsDataset {
    records: Vec<Record>,
    signature: OutputSignature,
}

impl RecordsDataset {
    pub fn new(signature: OutputSignature, records: Vec<Record>) -> Result<Arc<Self>, OpError> {
        for (i, r) in records.iter().enumerate() {
            signature
                .validate(r)
                .map_err(|e| OpError::Signature(format!("record {i}: {e}")))?;
        }
        Ok(Arc::new(Self { records, signature }))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Dataset for RecordsDataset {
    fn name(&self) -> &'static str {
        RECORDS_OP
    }

    fn output_signature(&self) -> &OutputSignature {
        &self.signature
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(RecordsIterator {
            prefix: format!("{prefix}::Records"),
            dataset: self,
            index: Mutex::new(0),
        })
    }

    fn as_graph(&self, b: &mut dyn GraphBuilder) -> Result<NodeRef, OpError> {
        let mut lists = Vec::with_capacity(self.records.len());
        for r in &self.records {
            let mut nodes = Vec::with_capacity(r.len());
            for buf in r.iter() {
                nodes.push(b.add_constant(buf)?);
            }
            lists.push(nodes);
        }
        Ok(b.add_dataset(RECORDS_OP, vec![], lists, signature_attrs(&self.signature))?)
    }

    fn debug_string(&self) -> String {
        format!(
            "RecordsDataset({} records, {} components)",
            self.records.len(),
            self.signature.len()
        )
    }
}

pub struct RecordsIterator {
    dataset: Arc<RecordsDataset>,
    prefix: String,
    index: Mutex<usize>,
}

impl DatasetIterator for RecordsIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&mut self, _ctx: &IteratorContext) -> Result<(), OpError> {
        Ok(())
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Next, OpError> {
        check_cancelled(ctx)?;
        let mut index = lock(&self.index);
        match self.dataset.records.get(*index) {
            Some(r) => {
                *index += 1;
                Ok(Next::Record(r.clone()))
            }
            None => Ok(Next::EndOfSequence),
        }
    }

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError> {
        let index = *lock(&self.index);
        writer.write_i64(full_key(&self.prefix, "index"), index as i64);
        Ok(())
    }

    fn restore(&mut self, _ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError> {
        let raw = reader.read_i64(&full_key(&self.prefix, "index"))?;
        let index = usize::try_from(raw)
            .ok()
            .filter(|i| *i <= self.dataset.records.len())
            .ok_or_else(|| {
                OpError::Checkpoint(format!(
                    "index {raw} is out of range for {} records",
                    self.dataset.records.len()
                ))
            })?;
        *lock(&self.index) = index;
        Ok(())
    }
}
