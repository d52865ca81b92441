//! The function execution collaborator.
//!
//! `FunctionExecutor` is the seam between datasets and whatever actually runs
//! user transforms. `LocalExecutor` interprets `FunctionDef` bodies built from
//! the kernels in `kernels`, either inline or on a worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::executor::ThreadPool;
use futures::future::{self, BoxFuture, FutureExt};
use futures::task::SpawnExt;

use pullflow_core::id::InstanceId;
use pullflow_core::schema::DType;
use pullflow_core::types::Buffer;

use crate::context::IteratorContext;
use crate::def::{FunctionDef, Source};
use crate::error::{FunctionError, Result};
use crate::kernels::Kernel;

pub trait FunctionExecutor: Send + Sync {
    /// Human-readable executor name (stable).
    fn name(&self) -> &'static str;

    /// Prepare `def` for repeated invocation.
    fn instantiate(&self, def: &FunctionDef) -> Result<InstanceId>;

    /// Run an instance to completion on the calling thread.
    fn invoke(
        &self,
        instance: InstanceId,
        args: Vec<Buffer>,
        ctx: &IteratorContext,
    ) -> Result<Vec<Buffer>>;

    /// Start an invocation and return a future for its outputs. Executors
    /// without their own threads complete the work before returning.
    fn invoke_async(
        &self,
        instance: InstanceId,
        args: Vec<Buffer>,
        ctx: &IteratorContext,
    ) -> BoxFuture<'static, Result<Vec<Buffer>>> {
        future::ready(self.invoke(instance, args, ctx)).boxed()
    }

    /// Forget `instance`; called once its last handle is dropped.
    fn release(&self, _instance: InstanceId) {}
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Arg(usize),
    Node(usize),
}

impl From<Source> for Slot {
    fn from(s: Source) -> Self {
        match s {
            Source::Arg(i) => Slot::Arg(i),
            Source::Node(i) => Slot::Node(i),
        }
    }
}

#[derive(Debug)]
struct Step {
    kernel: Kernel,
    inputs: Vec<Slot>,
}

/// A body compiled against the kernel table.
#[derive(Debug)]
struct Program {
    name: String,
    arg_dtypes: Vec<DType>,
    steps: Vec<Step>,
    outputs: Vec<Slot>,
}

impl Program {
    fn compile(def: &FunctionDef) -> Result<Self> {
        def.validate()?;
        let mut steps = Vec::with_capacity(def.nodes.len());
        for node in &def.nodes {
            let kernel = Kernel::from_op(&node.op).ok_or_else(|| {
                FunctionError::Instantiation(format!(
                    "function '{}': unknown op '{}' in node '{}'",
                    def.name, node.op, node.name
                ))
            })?;
            if let Some(n) = kernel.arity() {
                if node.inputs.len() != n {
                    return Err(FunctionError::Instantiation(format!(
                        "function '{}': {} takes {n} inputs, node '{}' has {}",
                        def.name,
                        node.op,
                        node.name,
                        node.inputs.len()
                    )));
                }
            }
            let inputs = node
                .inputs
                .iter()
                .filter_map(|i| def.resolve(i).map(Slot::from))
                .collect();
            steps.push(Step { kernel, inputs });
        }
        let outputs = def
            .outputs
            .iter()
            .filter_map(|o| def.resolve(o).map(Slot::from))
            .collect();
        Ok(Self {
            name: def.name.clone(),
            arg_dtypes: def.arg_dtypes(),
            steps,
            outputs,
        })
    }

    fn eval(&self, args: Vec<Buffer>) -> Result<Vec<Buffer>> {
        if args.len() != self.arg_dtypes.len() {
            return Err(FunctionError::InvalidArgument(format!(
                "function '{}' takes {} arguments, got {}",
                self.name,
                self.arg_dtypes.len(),
                args.len()
            )));
        }
        for (i, (buf, want)) in args.iter().zip(&self.arg_dtypes).enumerate() {
            if buf.dtype() != *want {
                return Err(FunctionError::InvalidArgument(format!(
                    "function '{}' argument {i}: expected {want}, got {}",
                    self.name,
                    buf.dtype()
                )));
            }
        }

        let mut values: Vec<Buffer> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let inputs: Vec<&Buffer> = step
                .inputs
                .iter()
                .map(|s| match *s {
                    Slot::Arg(i) => &args[i],
                    Slot::Node(i) => &values[i],
                })
                .collect();
            let out = step.kernel.eval(&inputs)?;
            values.push(out);
        }

        Ok(self
            .outputs
            .iter()
            .map(|s| match *s {
                Slot::Arg(i) => args[i].clone(),
                Slot::Node(i) => values[i].clone(),
            })
            .collect())
    }
}

/// In-process executor for bodies made of built-in kernels.
#[derive(Debug, Default)]
pub struct LocalExecutor {
    programs: RwLock<HashMap<InstanceId, Arc<Program>>>,
    next_instance: AtomicU64,
    invocations: AtomicU64,
    pool: Option<ThreadPool>,
    workers: usize,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose `invoke_async` runs on `threads` pooled workers.
    pub fn with_worker_threads(threads: usize) -> Result<Self> {
        let workers = threads.max(1);
        let pool = ThreadPool::builder()
            .pool_size(workers)
            .name_prefix("pullflow-fn-")
            .create()
            .map_err(|e| FunctionError::Failed(format!("worker pool: {e}")))?;
        Ok(Self {
            pool: Some(pool),
            workers,
            ..Self::default()
        })
    }

    /// Pooled workers behind `invoke_async`; 0 means calls run inline.
    pub fn worker_threads(&self) -> usize {
        self.workers
    }

    /// Total invocations started so far, inline or pooled.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn instances(&self) -> usize {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn program(&self, instance: InstanceId) -> Result<Arc<Program>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance)
            .cloned()
            .ok_or_else(|| {
                FunctionError::InvalidArgument(format!("{instance} is not instantiated"))
            })
    }
}

impl FunctionExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn instantiate(&self, def: &FunctionDef) -> Result<InstanceId> {
        let program = Program::compile(def)?;
        let id = InstanceId::new(self.next_instance.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(function = %def.name, instance = %id, steps = program.steps.len(), "instantiated function");
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(program));
        Ok(id)
    }

    fn invoke(
        &self,
        instance: InstanceId,
        args: Vec<Buffer>,
        ctx: &IteratorContext,
    ) -> Result<Vec<Buffer>> {
        ctx.check_cancelled()?;
        let program = self.program(instance)?;
        self.invocations.fetch_add(1, Ordering::Relaxed);
        program.eval(args)
    }

    fn invoke_async(
        &self,
        instance: InstanceId,
        args: Vec<Buffer>,
        ctx: &IteratorContext,
    ) -> BoxFuture<'static, Result<Vec<Buffer>>> {
        let Some(pool) = &self.pool else {
            return future::ready(self.invoke(instance, args, ctx)).boxed();
        };
        if let Err(e) = ctx.check_cancelled() {
            return future::ready(Err(e)).boxed();
        }
        let program = match self.program(instance) {
            Ok(p) => p,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match pool.spawn_with_handle(async move { program.eval(args) }) {
            // Dropping the handle abandons the pooled task.
            Ok(handle) => handle.boxed(),
            Err(e) => future::ready(Err(FunctionError::Failed(format!("spawn: {e}")))).boxed(),
        }
    }

    // In-flight pooled calls hold their own `Arc<Program>`.
    fn release(&self, instance: InstanceId) {
        let removed = self
            .programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance);
        if removed.is_some() {
            tracing::trace!(instance = %instance, "released function instance");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(exec: Arc<LocalExecutor>) -> IteratorContext {
        IteratorContext::new(exec)
    }

    fn affine() -> FunctionDef {
        FunctionDef::new("affine")
            .arg("x", DType::Int64)
            .arg("k", DType::Int64)
            .node("scaled", "Mul", &["x", "k"])
            .node("shifted", "Add", &["scaled", "x"])
            .output("shifted")
            .output("x")
    }

    #[test]
    fn interprets_bodies() {
        let exec = Arc::new(LocalExecutor::new());
        let id = exec.instantiate(&affine()).unwrap();
        let out = exec
            .invoke(
                id,
                vec![Buffer::scalar_i64(3), Buffer::scalar_i64(4)],
                &ctx(exec.clone()),
            )
            .unwrap();
        assert_eq!(out, vec![Buffer::scalar_i64(15), Buffer::scalar_i64(3)]);
        assert_eq!(exec.invocations(), 1);
    }

    #[test]
    fn unknown_ops_and_bad_arity_fail_instantiation() {
        let exec = LocalExecutor::new();
        let unknown = FunctionDef::new("f")
            .arg("x", DType::Int64)
            .node("y", "Conv2D", &["x"])
            .output("y");
        assert!(matches!(
            exec.instantiate(&unknown),
            Err(FunctionError::Instantiation(_))
        ));
        let arity = FunctionDef::new("g")
            .arg("x", DType::Int64)
            .node("y", "Add", &["x"])
            .output("y");
        assert!(exec.instantiate(&arity).is_err());
        assert_eq!(exec.instances(), 0);
    }

    #[test]
    fn invoke_checks_arguments_and_cancellation() {
        let exec = Arc::new(LocalExecutor::new());
        let id = exec.instantiate(&affine()).unwrap();
        let c = ctx(exec.clone());
        assert!(matches!(
            exec.invoke(id, vec![Buffer::scalar_i64(1)], &c),
            Err(FunctionError::InvalidArgument(_))
        ));
        assert!(exec
            .invoke(id, vec![Buffer::scalar_i64(1), Buffer::scalar_f64(1.0)], &c)
            .is_err());

        c.cancellation().cancel();
        assert_eq!(
            exec.invoke(id, vec![Buffer::scalar_i64(1), Buffer::scalar_i64(1)], &c),
            Err(FunctionError::Cancelled)
        );
    }

    #[test]
    fn pooled_invocations_complete() {
        let exec = Arc::new(LocalExecutor::with_worker_threads(2).unwrap());
        assert_eq!(exec.worker_threads(), 2);
        let id = exec.instantiate(&affine()).unwrap();
        let c = ctx(exec.clone());
        let futs: Vec<_> = (0..8)
            .map(|i| exec.invoke_async(id, vec![Buffer::scalar_i64(i), Buffer::scalar_i64(2)], &c))
            .collect();
        let outs = futures::executor::block_on(futures::future::join_all(futs));
        for (i, out) in outs.into_iter().enumerate() {
            assert_eq!(out.unwrap()[0], Buffer::scalar_i64(3 * i as i64));
        }
        assert_eq!(exec.invocations(), 8);
    }

    #[test]
    fn released_instances_are_forgotten() {
        let exec = Arc::new(LocalExecutor::new());
        let a = exec.instantiate(&affine()).unwrap();
        let b = exec.instantiate(&affine()).unwrap();
        assert_eq!(exec.instances(), 2);

        exec.release(a);
        exec.release(a);
        assert_eq!(exec.instances(), 1);
        let c = ctx(exec.clone());
        assert!(exec.invoke(a, vec![Buffer::scalar_i64(1), Buffer::scalar_i64(1)], &c).is_err());
        assert!(exec.invoke(b, vec![Buffer::scalar_i64(1), Buffer::scalar_i64(1)], &c).is_ok());
        exec.release(b);
        assert_eq!(exec.instances(), 0);
    }
}
