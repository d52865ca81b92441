//! Shared datasets and executors for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pullflow_ckpt::{StateReader, StateWriter};
use pullflow_core::graph::{GraphBuilder, NodeRef};
use pullflow_core::id::InstanceId;
use pullflow_core::schema::{DType, OutputSignature, PartialShape, TensorSpec};
use pullflow_core::types::{Buffer, Record};
use pullflow_function::{FunctionDef, FunctionError, FunctionExecutor, FunctionLibrary, IteratorContext};
use pullflow_operators::{Dataset, DatasetIterator, Next, OpError};

/// Yields `n` records of one `Int64[2]` buffer `[i, i]`, counting pulls and
/// remembering the address of every buffer it hands out.
pub struct CountingDataset {
    pub n: i64,
    pub pulls: Arc<AtomicUsize>,
    pub addrs: Arc<Mutex<Vec<usize>>>,
    signature: OutputSignature,
}

impl CountingDataset {
    pub fn new(n: i64) -> Arc<Self> {
        Arc::new(Self {
            n,
            pulls: Arc::new(AtomicUsize::new(0)),
            addrs: Arc::new(Mutex::new(Vec::new())),
            signature: OutputSignature::new(vec![pair_spec()]),
        })
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn addrs(&self) -> Vec<usize> {
        self.addrs.lock().unwrap().clone()
    }
}

pub fn pair_spec() -> TensorSpec {
    TensorSpec::new(DType::Int64, PartialShape::known(&[2]))
}

impl Dataset for CountingDataset {
    fn name(&self) -> &'static str {
        "CountingDataset"
    }

    fn output_signature(&self) -> &OutputSignature {
        &self.signature
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(CountingIterator {
            prefix: format!("{prefix}::Counting"),
            dataset: self,
            next: Mutex::new(0),
        })
    }

    fn as_graph(&self, _b: &mut dyn GraphBuilder) -> Result<NodeRef, OpError> {
        Err(OpError::Graph("CountingDataset has no graph form".into()))
    }

    fn debug_string(&self) -> String {
        format!("CountingDataset({})", self.n)
    }
}

struct CountingIterator {
    dataset: Arc<CountingDataset>,
    prefix: String,
    next: Mutex<i64>,
}

impl DatasetIterator for CountingIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&mut self, _ctx: &IteratorContext) -> Result<(), OpError> {
        Ok(())
    }

    fn get_next(&self, _ctx: &IteratorContext) -> Result<Next, OpError> {
        self.dataset.pulls.fetch_add(1, Ordering::SeqCst);
        let mut next = self.next.lock().unwrap();
        if *next >= self.dataset.n {
            return Ok(Next::EndOfSequence);
        }
        let buf = Buffer::from_i64(vec![2], vec![*next, *next]).unwrap();
        self.dataset
            .addrs
            .lock()
            .unwrap()
            .push(buf.as_i64().unwrap().as_ptr() as usize);
        *next += 1;
        Ok(Next::Record(Record::new(vec![buf])))
    }

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError> {
        writer.write_i64(format!("{}:next", self.prefix), *self.next.lock().unwrap());
        Ok(())
    }

    fn restore(&mut self, _ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError> {
        *self.next.lock().unwrap() = reader.read_i64(&format!("{}:next", self.prefix))?;
        Ok(())
    }
}

/// Yields scalar `Int64` records `0..ok`, then fails every later pull with
/// `OpError::Exec("upstream broke")`.
pub struct FailingDataset {
    pub ok: i64,
    pub pulls: AtomicUsize,
    signature: OutputSignature,
}

impl FailingDataset {
    pub fn new(ok: i64) -> Arc<Self> {
        Arc::new(Self {
            ok,
            pulls: AtomicUsize::new(0),
            signature: scalar_i64_sig(),
        })
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn error() -> OpError {
        OpError::Exec("upstream broke".into())
    }
}

impl Dataset for FailingDataset {
    fn name(&self) -> &'static str {
        "FailingDataset"
    }

    fn output_signature(&self) -> &OutputSignature {
        &self.signature
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(FailingIterator {
            prefix: format!("{prefix}::Failing"),
            dataset: self,
            next: Mutex::new(0),
        })
    }

    fn as_graph(&self, _b: &mut dyn GraphBuilder) -> Result<NodeRef, OpError> {
        Err(OpError::Graph("FailingDataset has no graph form".into()))
    }

    fn debug_string(&self) -> String {
        format!("FailingDataset({})", self.ok)
    }
}

struct FailingIterator {
    dataset: Arc<FailingDataset>,
    prefix: String,
    next: Mutex<i64>,
}

impl DatasetIterator for FailingIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&mut self, _ctx: &IteratorContext) -> Result<(), OpError> {
        Ok(())
    }

    fn get_next(&self, _ctx: &IteratorContext) -> Result<Next, OpError> {
        self.dataset.pulls.fetch_add(1, Ordering::SeqCst);
        let mut next = self.next.lock().unwrap();
        if *next >= self.dataset.ok {
            return Err(FailingDataset::error());
        }
        *next += 1;
        Ok(Next::Record(Record::new(vec![Buffer::scalar_i64(*next - 1)])))
    }

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError> {
        writer.write_i64(format!("{}:next", self.prefix), *self.next.lock().unwrap());
        Ok(())
    }

    fn restore(&mut self, _ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError> {
        *self.next.lock().unwrap() = reader.read_i64(&format!("{}:next", self.prefix))?;
        Ok(())
    }
}

/// Echoes its arguments, raising `EndOfRange` on call number `stop_at`.
pub struct StoppingExecutor {
    pub stop_at: usize,
    pub calls: AtomicUsize,
}

impl StoppingExecutor {
    pub fn new(stop_at: usize) -> Arc<Self> {
        Arc::new(Self {
            stop_at,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FunctionExecutor for StoppingExecutor {
    fn name(&self) -> &'static str {
        "stopping"
    }

    fn instantiate(&self, _def: &FunctionDef) -> Result<InstanceId, FunctionError> {
        Ok(InstanceId::new(1))
    }

    fn invoke(
        &self,
        _instance: InstanceId,
        args: Vec<Buffer>,
        _ctx: &IteratorContext,
    ) -> Result<Vec<Buffer>, FunctionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.stop_at {
            return Err(FunctionError::EndOfRange);
        }
        Ok(args)
    }
}

/// Functions used across the integration tests.
///
/// - `ident(x) -> x`
/// - `dup(x) -> (x, x)`
/// - `swap_capture(x, y, c) -> (c, x)` with `c` captured
/// - `through(x) -> Identity(Identity(x))`
/// - `negate(x) -> -x`
/// - `offset(x, k) -> x + k` with `k` captured
pub fn library() -> FunctionLibrary {
    FunctionLibrary::new()
        .with(FunctionDef::new("ident").arg("x", DType::Int64).output("x"))
        .and_then(|l| {
            l.with(
                FunctionDef::new("dup")
                    .arg("x", DType::Int64)
                    .output("x")
                    .output("x"),
            )
        })
        .and_then(|l| {
            l.with(
                FunctionDef::new("swap_capture")
                    .arg("x", DType::Int64)
                    .arg("y", DType::Utf8)
                    .arg("c", DType::Utf8)
                    .output("c")
                    .output("x"),
            )
        })
        .and_then(|l| {
            l.with(
                FunctionDef::new("through")
                    .arg("x", DType::Int64)
                    .node("a", "Identity", &["x"])
                    .node("b", "Identity", &["a"])
                    .output("b"),
            )
        })
        .and_then(|l| {
            l.with(
                FunctionDef::new("negate")
                    .arg("x", DType::Int64)
                    .node("y", "Neg", &["x"])
                    .output("y"),
            )
        })
        .and_then(|l| {
            l.with(
                FunctionDef::new("offset")
                    .arg("x", DType::Int64)
                    .arg("k", DType::Int64)
                    .node("y", "Add", &["x", "k"])
                    .output("y"),
            )
        })
        .expect("test library is well formed")
}

pub fn scalar_i64_sig() -> OutputSignature {
    OutputSignature::new(vec![TensorSpec::scalar(DType::Int64)])
}

pub fn values(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.buffers[0].as_i64().unwrap()[0])
        .collect()
}

pub fn drain(it: &dyn DatasetIterator, ctx: &IteratorContext) -> Vec<Record> {
    let mut out = Vec::new();
    while let Next::Record(r) = it.get_next(ctx).unwrap() {
        out.push(r);
    }
    out
}
