//! Reference compiler: records replayed tensor ops into a [`CaptureGraph`] and
//! re-evaluates the recording for every later call.
use crate::compiler::{AutogradCompiler, CompiledArtifact, CompilerError, CompilerSession};
use crate::graph::{PostHook, PreHook, TensorPreHook};
use crate::tensor::{SymInt, Tensor, TensorData, TracedTensor};
use crate::trace_graph::{CaptureGraph, TraceGraphError, TraceTensorId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct TraceCompiler {
    sessions_opened: Cell<usize>,
    artifact_calls: Rc<Cell<usize>>,
}

impl TraceCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures started, i.e. cache misses served.
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.get()
    }

    /// Calls made to any artifact this compiler produced.
    pub fn artifact_calls(&self) -> usize {
        self.artifact_calls.get()
    }
}

impl AutogradCompiler for TraceCompiler {
    fn new_session(&self) -> Result<Box<dyn CompilerSession>, CompilerError> {
        self.sessions_opened.set(self.sessions_opened.get() + 1);
        Ok(Box::new(TraceCompilerSession {
            graph: Rc::new(RefCell::new(CaptureGraph::new())),
            artifact_calls: self.artifact_calls.clone(),
        }))
    }
}

pub struct TraceCompilerSession {
    graph: Rc<RefCell<CaptureGraph>>,
    artifact_calls: Rc<Cell<usize>>,
}

impl CompilerSession for TraceCompilerSession {
    fn begin_capture(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, CompilerError> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let (Some(shape), Some(dtype)) = (input.shape(), input.dtype()) else {
                    return Err(CompilerError::UndefinedInput(i));
                };
                let id = self.graph.borrow_mut().add_input(shape.to_vec(), dtype);
                Ok(TracedTensor::new(id, shape.to_vec(), dtype, self.graph.clone()).into())
            })
            .collect()
    }

    fn begin_capture_sizes(&mut self, sizes: &[i64]) -> Result<Vec<SymInt>, CompilerError> {
        let mut graph = self.graph.borrow_mut();
        Ok(sizes
            .iter()
            .map(|&x| SymInt::symbolic(x, graph.add_size_input(x)))
            .collect())
    }

    fn tensor_pre_hook(
        &mut self,
        mut inputs: Vec<Tensor>,
        hook: &TensorPreHook,
        input_nr: usize,
    ) -> Result<Vec<Tensor>, CompilerError> {
        let num_inputs = inputs.len();
        let grad = inputs
            .get_mut(input_nr)
            .ok_or(CompilerError::HookInputIndex(input_nr, num_inputs))?;
        if grad.is_defined() {
            *grad = hook.call(grad)?;
        }
        Ok(inputs)
    }

    fn pre_hook(&mut self, inputs: Vec<Tensor>, hook: &PreHook) -> Result<Vec<Tensor>, CompilerError> {
        Ok(hook.call(&inputs)?)
    }

    fn post_hook(
        &mut self,
        outputs: Vec<Tensor>,
        inputs: &[Tensor],
        hook: &PostHook,
    ) -> Result<Vec<Tensor>, CompilerError> {
        Ok(hook.call(&outputs, inputs)?)
    }

    fn end_capture(
        self: Box<Self>,
        outputs: Vec<Tensor>,
    ) -> Result<Box<dyn CompiledArtifact>, CompilerError> {
        let outputs = outputs
            .iter()
            .enumerate()
            .map(|(i, output)| match output.as_traced() {
                Some(x) if x.belongs_to(&self.graph) => Ok(CaptureOutput::Traced(x.id())),
                Some(_) => Err(CompilerError::ForeignOutput(i)),
                None if output.is_defined() => Ok(CaptureOutput::Constant(output.data()?.clone())),
                None => Ok(CaptureOutput::Undefined),
            })
            .collect::<Result<Vec<_>, CompilerError>>()?;
        let graph = self.graph.borrow().clone();
        log::debug!(
            "Captured {} ops over {} inputs and {} sizes into {} outputs",
            graph.num_ops(),
            graph.inputs().len(),
            graph.size_inputs().len(),
            outputs.len()
        );
        Ok(Box::new(CapturedProgram {
            graph,
            outputs,
            calls: self.artifact_calls,
        }))
    }
}

#[derive(Debug, Clone)]
enum CaptureOutput {
    Traced(TraceTensorId),
    /// A value that never touched a placeholder.
    Constant(Rc<TensorData>),
    Undefined,
}

pub struct CapturedProgram {
    graph: CaptureGraph,
    outputs: Vec<CaptureOutput>,
    calls: Rc<Cell<usize>>,
}

impl CapturedProgram {
    pub fn graph(&self) -> &CaptureGraph {
        &self.graph
    }
}

impl CompiledArtifact for CapturedProgram {
    fn call(&self, inputs: &[Tensor], sizes: &[i64]) -> Result<Vec<Tensor>, CompilerError> {
        self.calls.set(self.calls.get() + 1);
        let inputs = inputs
            .iter()
            .enumerate()
            .map(|(i, x)| x.data().cloned().map_err(|_| CompilerError::NonConcreteInput(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let values = self.graph.eval(&inputs, sizes)?;
        self.outputs
            .iter()
            .map(|output| match output {
                CaptureOutput::Traced(id) => values
                    .get(id)
                    .cloned()
                    .map(Tensor::from)
                    .ok_or_else(|| CompilerError::from(TraceGraphError::MissingTensor(*id))),
                CaptureOutput::Constant(x) => Ok(Tensor::from(x.clone())),
                CaptureOutput::Undefined => Ok(Tensor::undefined()),
            })
            .collect()
    }
}
