//! Map: apply a captured function to every upstream record.
//!
//! The transform path is fixed when the dataset is built. If the body only
//! selects its inputs, a `SelectionPlan` fills each output position by move or
//! copy and the executor is never called. Otherwise every record goes through
//! `InstantiatedCapturedFunction::run`. Both paths give identical results.
//!
//! A function raising `EndOfRange` ends the sequence early; the iterator then
//! stays exhausted without pulling upstream again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pullflow_ckpt::{StateReader, StateWriter};
use pullflow_core::config::EngineConfig;
use pullflow_core::graph::{AttrValue, GraphBuilder, NodeRef};
use pullflow_core::schema::OutputSignature;
use pullflow_core::types::{Buffer, Record};
use pullflow_function::{
    CapturedFunction, FunctionError, FunctionLibrary, InstantiatedCapturedFunction,
    IteratorContext, SelectionPlan, ShortCircuitAnalyzer,
};

use crate::source::signature_attrs;
use crate::traits::{check_cancelled, Dataset, DatasetIterator, Next, OpError};

pub const MAP_OP: &str = "MapDataset";

pub struct MapDataset {
    input: Arc<dyn Dataset>,
    func: Arc<CapturedFunction>,
    /// `Some` when the body is a pure selection.
    plan: Option<SelectionPlan>,
    signature: OutputSignature,
    use_inter_op_parallelism: bool,
    validate_records: bool,
}

impl MapDataset {
    /// Bind `func` (resolved in `library`) to `captured` and check it against
    /// the upstream and declared output signatures.
    pub fn new(
        input: Arc<dyn Dataset>,
        func: &str,
        library: &FunctionLibrary,
        captured: Vec<Buffer>,
        signature: OutputSignature,
        use_inter_op_parallelism: bool,
        config: &EngineConfig,
    ) -> Result<Arc<Self>, OpError> {
        let func = CapturedFunction::create(func, library, captured, use_inter_op_parallelism)?;
        let def = func.def();

        if def.inputs.len() < func.captured().len() {
            return Err(OpError::Setup(format!(
                "function '{}' declares {} inputs but {} values are captured",
                def.name,
                def.inputs.len(),
                func.captured().len()
            )));
        }
        let upstream = input.output_signature();
        if upstream.len() != func.num_args() {
            return Err(OpError::Setup(format!(
                "function '{}' takes {} arguments per element, upstream yields {} components",
                def.name,
                func.num_args(),
                upstream.len()
            )));
        }
        for (i, (spec, arg)) in upstream.specs.iter().zip(&def.inputs).enumerate() {
            if spec.dtype != arg.dtype {
                return Err(OpError::Setup(format!(
                    "function '{}' argument {i} ('{}') is {}, upstream yields {}",
                    def.name, arg.name, arg.dtype, spec.dtype
                )));
            }
        }
        if def.outputs.len() != signature.len() {
            return Err(OpError::Setup(format!(
                "function '{}' has {} outputs, output signature has {}",
                def.name,
                def.outputs.len(),
                signature.len()
            )));
        }

        let plan = if config.short_circuit {
            ShortCircuitAnalyzer::plan(def, func.captured().len())
        } else {
            None
        };
        if let Some(plan) = &plan {
            for (i, (src, spec)) in plan.indices().iter().zip(&signature.specs).enumerate() {
                let dtype = def.inputs[*src].dtype;
                if dtype != spec.dtype {
                    return Err(OpError::Setup(format!(
                        "output {i} forwards input '{}' of type {dtype}, signature expects {}",
                        def.inputs[*src].name, spec.dtype
                    )));
                }
            }
        }
        tracing::debug!(
            function = %def.name,
            short_circuit = plan.is_some(),
            moves = plan.as_ref().map_or(0, |p| p.move_eligibility().iter().filter(|m| **m).count()),
            "built map dataset"
        );

        Ok(Arc::new(Self {
            input,
            func,
            plan,
            signature,
            use_inter_op_parallelism,
            validate_records: config.validate_records,
        }))
    }

    pub fn is_short_circuit(&self) -> bool {
        self.plan.is_some()
    }

    pub fn selection_plan(&self) -> Option<&SelectionPlan> {
        self.plan.as_ref()
    }

    pub fn function(&self) -> &Arc<CapturedFunction> {
        &self.func
    }

    pub fn input(&self) -> &Arc<dyn Dataset> {
        &self.input
    }

    pub fn use_inter_op_parallelism(&self) -> bool {
        self.use_inter_op_parallelism
    }
}

impl Dataset for MapDataset {
    fn name(&self) -> &'static str {
        MAP_OP
    }

    fn output_signature(&self) -> &OutputSignature {
        &self.signature
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(MapIterator {
            prefix: format!("{prefix}::Map"),
            dataset: self,
            input: None,
            transform: None,
            state: Mutex::new(State::Uninitialized),
        })
    }

    fn as_graph(&self, b: &mut dyn GraphBuilder) -> Result<NodeRef, OpError> {
        let input = self.input.as_graph(b)?;
        let mut captured = Vec::with_capacity(self.func.captured().len());
        for c in self.func.captured() {
            captured.push(b.add_constant(c)?);
        }
        b.add_function(self.func.name())?;

        let mut attrs: BTreeMap<String, AttrValue> = signature_attrs(&self.signature);
        attrs.insert("f".to_string(), AttrValue::Func(self.func.name().to_string()));
        attrs.insert(
            "Targuments".to_string(),
            AttrValue::DTypes(self.func.captured().iter().map(Buffer::dtype).collect()),
        );
        attrs.insert(
            "use_inter_op_parallelism".to_string(),
            AttrValue::Bool(self.use_inter_op_parallelism),
        );
        Ok(b.add_dataset(MAP_OP, vec![input], vec![captured], attrs)?)
    }

    fn debug_string(&self) -> String {
        format!(
            "MapDataset({}, f={}, {})",
            self.input.debug_string(),
            self.func.name(),
            if self.plan.is_some() { "short-circuit" } else { "invoke" }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Uninitialized,
    Ready,
    Exhausted,
    Failed(OpError),
}

pub struct MapIterator {
    dataset: Arc<MapDataset>,
    prefix: String,
    input: Option<Box<dyn DatasetIterator>>,
    /// Set on `initialize` for the invoke path only.
    transform: Option<InstantiatedCapturedFunction>,
    state: Mutex<State>,
}

impl MapIterator {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to a terminal state unless another puller got there first.
    fn finish(&self, terminal: State) {
        let mut state = self.state();
        if *state == State::Ready {
            *state = terminal;
        }
    }

    fn fail(&self, err: OpError) -> OpError {
        tracing::warn!(prefix = %self.prefix, error = %err, "map iterator failed");
        self.finish(State::Failed(err.clone()));
        err
    }

    /// Upstream iterator plus, on the invoke path, the instantiated function.
    fn setup(
        &self,
        ctx: &IteratorContext,
    ) -> Result<(Box<dyn DatasetIterator>, Option<InstantiatedCapturedFunction>), OpError> {
        let mut input = Arc::clone(&self.dataset.input).make_iterator(&self.prefix);
        input.initialize(ctx)?;
        let transform = match self.dataset.plan {
            Some(_) => None,
            None => Some(self.dataset.func.instantiate(ctx)?),
        };
        Ok((input, transform))
    }

    fn apply(&self, ctx: &IteratorContext, args: Record) -> Result<Vec<Buffer>, FunctionError> {
        match (&self.dataset.plan, &self.transform) {
            (Some(plan), _) => plan.apply(args.into_buffers(), self.dataset.func.captured()),
            (None, Some(f)) => f.run(ctx, args.into_buffers()),
            (None, None) => Err(FunctionError::Instantiation(
                "map function was not instantiated".into(),
            )),
        }
    }
}

impl DatasetIterator for MapIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&mut self, ctx: &IteratorContext) -> Result<(), OpError> {
        if *self.state() != State::Uninitialized {
            return Err(OpError::Setup(format!("{} is already initialized", self.prefix)));
        }
        match self.setup(ctx) {
            Ok((input, transform)) => {
                self.input = Some(input);
                self.transform = transform;
                *self.state() = State::Ready;
                tracing::debug!(prefix = %self.prefix, short_circuit = self.dataset.plan.is_some(), "map iterator ready");
                Ok(())
            }
            Err(e) => {
                *self.state() = State::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Next, OpError> {
        match &*self.state() {
            State::Ready => {}
            State::Exhausted => return Ok(Next::EndOfSequence),
            State::Failed(e) => return Err(e.clone()),
            State::Uninitialized => {
                return Err(OpError::Setup(format!("{} is not initialized", self.prefix)))
            }
        }
        check_cancelled(ctx)?;
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| OpError::Setup(format!("{} has no upstream iterator", self.prefix)))?;

        let args = match input.get_next(ctx) {
            Ok(Next::Record(r)) => r,
            Ok(Next::EndOfSequence) => {
                self.finish(State::Exhausted);
                return Ok(Next::EndOfSequence);
            }
            Err(OpError::Cancelled) => return Err(OpError::Cancelled),
            Err(e) => return Err(self.fail(e)),
        };

        let out = match self.apply(ctx, args) {
            Ok(out) => Record::new(out),
            Err(FunctionError::EndOfRange) => {
                tracing::debug!(prefix = %self.prefix, "function ended the sequence early");
                self.finish(State::Exhausted);
                return Ok(Next::EndOfSequence);
            }
            Err(FunctionError::Cancelled) => return Err(OpError::Cancelled),
            Err(e) => return Err(self.fail(OpError::from(e))),
        };

        if self.dataset.validate_records {
            if let Err(e) = self.dataset.signature.validate(&out) {
                return Err(self.fail(OpError::from(e)));
            }
        }
        Ok(Next::Record(out))
    }

    fn save(&self, writer: &mut StateWriter) -> Result<(), OpError> {
        match &self.input {
            Some(input) => input.save(writer),
            None => Err(OpError::Setup(format!("{} is not initialized", self.prefix))),
        }
    }

    fn restore(&mut self, ctx: &IteratorContext, reader: &StateReader) -> Result<(), OpError> {
        if *self.state() == State::Uninitialized {
            self.initialize(ctx)?;
        }
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| OpError::Setup(format!("{} has no upstream iterator", self.prefix)))?;
        input.restore(ctx, reader)?;
        if self.dataset.plan.is_none() && self.transform.is_none() {
            self.transform = Some(self.dataset.func.instantiate(ctx)?);
        }
        *self.state() = State::Ready;
        tracing::debug!(prefix = %self.prefix, "map iterator restored");
        Ok(())
    }
}
