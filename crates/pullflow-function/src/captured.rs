//! A transform bound to captured buffers.
//!
//! `CapturedFunction` is owned (through an `Arc`) by the dataset that created
//! it. Each consuming iterator instantiates it once and keeps the returned
//! `InstantiatedCapturedFunction`, an owned handle that can be cloned into
//! worker threads without borrowing from the dataset. The executor instance
//! is released when the last clone of the handle is dropped.

use std::sync::Arc;

use futures::future::{self, BoxFuture, Either, FutureExt};

use pullflow_core::id::InstanceId;
use pullflow_core::types::Buffer;

use crate::context::IteratorContext;
use crate::def::FunctionDef;
use crate::error::{FunctionError, Result};
use crate::executor::FunctionExecutor;
use crate::library::FunctionLibrary;

#[derive(Debug)]
pub struct CapturedFunction {
    def: FunctionDef,
    captured: Vec<Buffer>,
    use_inter_op_parallelism: bool,
}

impl CapturedFunction {
    /// Resolve `handle` in `library` and bind `captured` to its trailing
    /// inputs.
    pub fn create(
        handle: &str,
        library: &FunctionLibrary,
        captured: Vec<Buffer>,
        use_inter_op_parallelism: bool,
    ) -> Result<Arc<Self>> {
        let def = library.lookup(handle)?.clone();
        Ok(Arc::new(Self {
            def,
            captured,
            use_inter_op_parallelism,
        }))
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &FunctionDef {
        &self.def
    }

    pub fn captured(&self) -> &[Buffer] {
        &self.captured
    }

    /// Inputs supplied per element, i.e. declared inputs minus captured ones.
    pub fn num_args(&self) -> usize {
        self.def.inputs.len().saturating_sub(self.captured.len())
    }

    pub fn use_inter_op_parallelism(&self) -> bool {
        self.use_inter_op_parallelism
    }

    fn check_signature(&self) -> Result<()> {
        let declared = self.def.inputs.len();
        if self.captured.len() > declared {
            return Err(FunctionError::Instantiation(format!(
                "function '{}' declares {declared} inputs but {} values are captured",
                self.def.name,
                self.captured.len()
            )));
        }
        let offset = declared - self.captured.len();
        for (j, (buf, arg)) in self
            .captured
            .iter()
            .zip(&self.def.inputs[offset..])
            .enumerate()
        {
            if buf.dtype() != arg.dtype {
                return Err(FunctionError::Instantiation(format!(
                    "function '{}': captured value {j} is {} but input '{}' is {}",
                    self.def.name,
                    buf.dtype(),
                    arg.name,
                    arg.dtype
                )));
            }
        }
        Ok(())
    }

    /// Prepare the executor in `ctx` for repeated invocation.
    pub fn instantiate(self: &Arc<Self>, ctx: &IteratorContext) -> Result<InstantiatedCapturedFunction> {
        self.check_signature()?;
        let executor = Arc::clone(ctx.executor());
        let instance = executor.instantiate(&self.def)?;
        tracing::debug!(
            function = %self.def.name,
            executor = executor.name(),
            captured = self.captured.len(),
            "instantiated captured function"
        );
        Ok(InstantiatedCapturedFunction {
            func: Arc::clone(self),
            handle: Arc::new(InstanceHandle { executor, instance }),
        })
    }
}

/// Executor instance owned by every clone of an instantiated function.
struct InstanceHandle {
    executor: Arc<dyn FunctionExecutor>,
    instance: InstanceId,
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        self.executor.release(self.instance);
    }
}

#[derive(Clone)]
pub struct InstantiatedCapturedFunction {
    func: Arc<CapturedFunction>,
    handle: Arc<InstanceHandle>,
}

impl InstantiatedCapturedFunction {
    pub fn function(&self) -> &Arc<CapturedFunction> {
        &self.func
    }

    pub fn instance(&self) -> InstanceId {
        self.handle.instance
    }

    fn full_args(&self, args: Vec<Buffer>) -> Result<Vec<Buffer>> {
        let def = &self.func.def;
        let num_args = self.func.num_args();
        if args.len() != num_args {
            return Err(FunctionError::InvalidArgument(format!(
                "function '{}' takes {num_args} arguments per element, got {}",
                def.name,
                args.len()
            )));
        }
        for (i, (buf, arg)) in args.iter().zip(&def.inputs).enumerate() {
            if buf.dtype() != arg.dtype {
                return Err(FunctionError::InvalidArgument(format!(
                    "function '{}' argument {i} ('{}'): expected {}, got {}",
                    def.name,
                    arg.name,
                    arg.dtype,
                    buf.dtype()
                )));
            }
        }
        let mut full = args;
        full.extend(self.func.captured.iter().cloned());
        Ok(full)
    }

    /// Invoke on `args ++ captured` and wait for the outputs.
    ///
    /// With inter-op parallelism the call goes through the executor's async
    /// path and the wait is abandoned as soon as `ctx` is cancelled.
    pub fn run(&self, ctx: &IteratorContext, args: Vec<Buffer>) -> Result<Vec<Buffer>> {
        ctx.check_cancelled()?;
        if self.func.use_inter_op_parallelism {
            futures::executor::block_on(self.run_async(ctx, args))
        } else {
            let full = self.full_args(args)?;
            self.handle.executor.invoke(self.handle.instance, full, ctx)
        }
    }

    /// Start an invocation; the future resolves to `Cancelled` if `ctx` is
    /// cancelled first.
    pub fn run_async(
        &self,
        ctx: &IteratorContext,
        args: Vec<Buffer>,
    ) -> BoxFuture<'static, Result<Vec<Buffer>>> {
        let full = match self.full_args(args) {
            Ok(full) => full,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let call = self.handle.executor.invoke_async(self.handle.instance, full, ctx);
        let cancelled = ctx.cancellation().cancelled();
        async move {
            match future::select(call, cancelled).await {
                Either::Left((out, _)) => out,
                Either::Right(((), _)) => Err(FunctionError::Cancelled),
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for InstantiatedCapturedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantiatedCapturedFunction")
            .field("function", &self.func.def.name)
            .field("executor", &self.handle.executor.name())
            .field("instance", &self.handle.instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use pullflow_core::schema::DType;

    fn library() -> FunctionLibrary {
        FunctionLibrary::new()
            .with(
                FunctionDef::new("add_offset")
                    .arg("x", DType::Int64)
                    .arg("offset", DType::Int64)
                    .node("y", "Add", &["x", "offset"])
                    .output("y"),
            )
            .unwrap()
            .with(
                FunctionDef::new("stop")
                    .arg("x", DType::Int64)
                    .node("y", "EndOfRange", &["x"])
                    .output("y"),
            )
            .unwrap()
    }

    fn ctx() -> IteratorContext {
        IteratorContext::new(Arc::new(LocalExecutor::new()))
    }

    #[test]
    fn run_appends_captured_arguments() {
        let lib = library();
        for parallel in [false, true] {
            let f = CapturedFunction::create("add_offset", &lib, vec![Buffer::scalar_i64(100)], parallel)
                .unwrap();
            assert_eq!(f.num_args(), 1);
            let c = ctx();
            let inst = f.instantiate(&c).unwrap();
            let out = inst.run(&c, vec![Buffer::scalar_i64(5)]).unwrap();
            assert_eq!(out, vec![Buffer::scalar_i64(105)]);
        }
    }

    #[test]
    fn unresolved_and_mistyped_functions_fail_instantiation() {
        let lib = library();
        assert!(matches!(
            CapturedFunction::create("nope", &lib, vec![], false),
            Err(FunctionError::Instantiation(_))
        ));

        let wrong = CapturedFunction::create("add_offset", &lib, vec![Buffer::scalar_str("x")], false)
            .unwrap();
        assert!(matches!(
            wrong.instantiate(&ctx()),
            Err(FunctionError::Instantiation(_))
        ));

        let too_many = CapturedFunction::create(
            "stop",
            &lib,
            vec![Buffer::scalar_i64(1), Buffer::scalar_i64(2)],
            false,
        )
        .unwrap();
        assert!(too_many.instantiate(&ctx()).is_err());
    }

    #[test]
    fn end_of_range_is_distinguished() {
        let f = CapturedFunction::create("stop", &library(), vec![], false).unwrap();
        let c = ctx();
        let inst = f.instantiate(&c).unwrap();
        let err = inst.run(&c, vec![Buffer::scalar_i64(1)]).unwrap_err();
        assert!(err.is_end_of_range());
    }

    #[test]
    fn run_rejects_wrong_element_arity() {
        let f = CapturedFunction::create("add_offset", &library(), vec![Buffer::scalar_i64(1)], false)
            .unwrap();
        let c = ctx();
        let inst = f.instantiate(&c).unwrap();
        assert!(matches!(
            inst.run(&c, vec![]),
            Err(FunctionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn instance_is_released_with_the_last_clone() {
        let exec = Arc::new(LocalExecutor::new());
        let c = IteratorContext::new(exec.clone());
        let f = CapturedFunction::create("add_offset", &library(), vec![Buffer::scalar_i64(1)], false)
            .unwrap();
        let inst = f.instantiate(&c).unwrap();
        let worker_copy = inst.clone();
        assert_eq!(exec.instances(), 1);

        drop(inst);
        assert_eq!(exec.instances(), 1);
        assert_eq!(
            worker_copy.run(&c, vec![Buffer::scalar_i64(2)]).unwrap(),
            vec![Buffer::scalar_i64(3)]
        );
        drop(worker_copy);
        assert_eq!(exec.instances(), 0);
    }

    struct Stalled;

    impl FunctionExecutor for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn instantiate(&self, _def: &FunctionDef) -> Result<InstanceId> {
            Ok(InstanceId::new(0))
        }
        fn invoke(&self, _: InstanceId, _: Vec<Buffer>, _: &IteratorContext) -> Result<Vec<Buffer>> {
            Err(FunctionError::Failed("blocking path unused".into()))
        }
        fn invoke_async(
            &self,
            _: InstanceId,
            _: Vec<Buffer>,
            _: &IteratorContext,
        ) -> BoxFuture<'static, Result<Vec<Buffer>>> {
            future::pending().boxed()
        }
    }

    #[test]
    fn cancellation_interrupts_a_pending_invocation() {
        let f = CapturedFunction::create("add_offset", &library(), vec![Buffer::scalar_i64(1)], true)
            .unwrap();
        let c = IteratorContext::new(Arc::new(Stalled));
        let inst = f.instantiate(&c).unwrap();

        let token = c.cancellation().clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            token.cancel();
        });
        assert_eq!(
            inst.run(&c, vec![Buffer::scalar_i64(1)]),
            Err(FunctionError::Cancelled)
        );
        canceller.join().unwrap();
    }
}
