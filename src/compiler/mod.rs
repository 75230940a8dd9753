use crate::compiler::cache::{CacheNode, CacheNodeId};
use crate::compiler::flatten::flatten;
use crate::compiler::replay::replay;
use crate::compiler::swap::CaptureStats;
use crate::graph::{AutogradGraph, NodeId, PostHook, PreHook, TensorPreHook};
use crate::tensor::{SymInt, Tensor, TensorError};
use crate::trace_graph::TraceGraphError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

pub mod cache;
mod flatten;
pub mod key;
mod replay;
pub mod swap;
pub mod trace_compiler;

pub use flatten::{AutogradCompilerCall, FlattenedGraph, NodeCall, OutputRef};

/// Failures reported by a graph compiler collaborator.
#[derive(thiserror::Error, Debug)]
pub enum CompilerError {
    #[error(transparent)]
    TensorError(#[from] TensorError),
    #[error(transparent)]
    TraceGraphError(#[from] TraceGraphError),
    #[error("Hook targets input {0}, but the node has {1} inputs")]
    HookInputIndex(usize, usize),
    #[error("Input {0} has no shape to build a placeholder from")]
    UndefinedInput(usize),
    #[error("Artifact input {0} is not a concrete tensor")]
    NonConcreteInput(usize),
    #[error("Output {0} was traced into a different capture")]
    ForeignOutput(usize),
    #[error("{0}")]
    Session(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CompiledAutogradError {
    #[error(transparent)]
    CompilerError(#[from] CompilerError),
    #[error(transparent)]
    TensorError(#[from] TensorError),
    #[error("Node {0:?} was scheduled without a prepared call")]
    MissingNodeCall(NodeId),
    #[error("An edge targets {0:?}, which has no dependency count")]
    DanglingDependency(NodeId),
    #[error("Node {0:?} does not exist in the graph")]
    UnknownNode(NodeId),
    #[error("An edge into {node:?} names input {input_nr}, but the node has {num_inputs} inputs")]
    InvalidEdge {
        node: NodeId,
        input_nr: usize,
        num_inputs: usize,
    },
    #[error("Hook on {node:?} targets input {input_nr}, but the node has {num_inputs} inputs")]
    HookInputIndex {
        node: NodeId,
        input_nr: usize,
        num_inputs: usize,
    },
    #[error("Output reference {0:?} does not resolve to a produced value")]
    InvalidOutputRef(OutputRef),
    #[error("Specialization key of {node} exceeds {capacity} bytes")]
    KeyOverflow { node: &'static str, capacity: usize },
    #[error("begin_capture returned {got} placeholders for {expected} inputs")]
    PlaceholderCount { expected: usize, got: usize },
    #[error("Replay needed more than the {0} placeholders produced")]
    PlaceholdersExhausted(usize),
    #[error("begin_capture_sizes returned {got} size placeholders for {expected} size inputs")]
    SizePlaceholderCount { expected: usize, got: usize },
    #[error("Replay needed more than the {0} size placeholders produced")]
    SizePlaceholdersExhausted(usize),
    #[error("Placeholder accounting mismatch in {what}: expected {expected}, got {got}")]
    PlaceholderAccounting {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("No compiler is installed")]
    CompilerNotEnabled,
    #[error("Cache leaf {0:?} holds no artifact")]
    MissingArtifact(CacheNodeId),
    #[error("Artifact produced {got} gradients for {expected} targets")]
    GradTargetCount { expected: usize, got: usize },
}

/// A compiled backward program. Only ever called with the aggregate inputs of
/// a graph whose every key matched the one it was captured from. Tensor and
/// size values may differ from the captured ones.
pub trait CompiledArtifact {
    fn call(&self, inputs: &[Tensor], sizes: &[i64]) -> Result<Vec<Tensor>, CompilerError>;
}

/// One capture of one graph shape.
pub trait CompilerSession {
    /// Returns one placeholder per aggregate tensor input, in order.
    fn begin_capture(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, CompilerError>;

    /// Returns one symbolic size per aggregate size input, in order.
    fn begin_capture_sizes(&mut self, sizes: &[i64]) -> Result<Vec<SymInt>, CompilerError>;

    fn tensor_pre_hook(
        &mut self,
        inputs: Vec<Tensor>,
        hook: &TensorPreHook,
        input_nr: usize,
    ) -> Result<Vec<Tensor>, CompilerError>;

    fn pre_hook(&mut self, inputs: Vec<Tensor>, hook: &PreHook) -> Result<Vec<Tensor>, CompilerError>;

    fn post_hook(
        &mut self,
        outputs: Vec<Tensor>,
        inputs: &[Tensor],
        hook: &PostHook,
    ) -> Result<Vec<Tensor>, CompilerError>;

    /// Finishes the capture with the gradient values bound for each grad target.
    fn end_capture(
        self: Box<Self>,
        outputs: Vec<Tensor>,
    ) -> Result<Box<dyn CompiledArtifact>, CompilerError>;
}

pub trait AutogradCompiler {
    fn new_session(&self) -> Result<Box<dyn CompilerSession>, CompilerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompiledAutogradOptions {
    /// Byte budget of one node's specialization key.
    pub key_capacity: usize,
    /// Turn placeholder accounting mismatches into errors instead of warnings.
    pub strict_placeholder_accounting: bool,
}

impl Default for CompiledAutogradOptions {
    fn default() -> Self {
        Self {
            key_capacity: key::DEFAULT_KEY_CAPACITY,
            strict_placeholder_accounting: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub cache_hit: bool,
    pub leaf: CacheNodeId,
    pub num_calls: usize,
    pub num_implicit_adds: usize,
    pub num_tensor_inputs: usize,
    pub num_size_inputs: usize,
    pub num_grad_targets: usize,
    /// Present when this execution captured a new artifact.
    pub capture: Option<CaptureStats>,
}

/// Compiled backward execution: flattens a gradient graph into a schedule,
/// looks the schedule up in a specialization trie, captures an artifact on
/// a miss and runs the artifact with the graph's concrete values.
pub struct CompiledAutograd {
    cache: CacheNode,
    compiler: Option<Rc<dyn AutogradCompiler>>,
    options: CompiledAutogradOptions,
}

impl Default for CompiledAutograd {
    fn default() -> Self {
        Self::new(CompiledAutogradOptions::default())
    }
}

impl CompiledAutograd {
    pub fn new(options: CompiledAutogradOptions) -> Self {
        Self {
            cache: CacheNode::new(),
            compiler: None,
            options,
        }
    }

    pub fn options(&self) -> &CompiledAutogradOptions {
        &self.options
    }

    /// Installs (or with `None`, removes) the compiler and returns the previous one.
    pub fn set_autograd_compiler(
        &mut self,
        compiler: Option<Rc<dyn AutogradCompiler>>,
    ) -> Option<Rc<dyn AutogradCompiler>> {
        std::mem::replace(&mut self.compiler, compiler)
    }

    pub fn is_enabled(&self) -> bool {
        self.compiler.is_some()
    }

    pub fn cache(&self) -> &CacheNode {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn is_cache_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Builds the schedule and walks the cache without capturing or executing.
    /// Missing trie nodes are still created.
    pub fn flatten(
        &mut self,
        graph: &AutogradGraph,
        root: NodeId,
        dependencies: HashMap<NodeId, usize>,
    ) -> Result<FlattenedGraph, CompiledAutogradError> {
        let (flattened, _) = flatten(
            graph,
            root,
            dependencies,
            &mut self.cache,
            self.options.key_capacity,
        )?;
        Ok(flattened)
    }

    pub fn execute(
        &mut self,
        graph: &mut AutogradGraph,
        root: NodeId,
        dependencies: HashMap<NodeId, usize>,
    ) -> Result<ExecutionReport, CompiledAutogradError> {
        let compiler = self
            .compiler
            .clone()
            .ok_or(CompiledAutogradError::CompilerNotEnabled)?;
        let (mut flattened, leaf) = flatten(
            graph,
            root,
            dependencies,
            &mut self.cache,
            self.options.key_capacity,
        )?;

        let cache_hit = leaf.compiled_fn().is_some();
        let capture = if cache_hit {
            log::debug!("Cache hit at {:?}", leaf.id());
            None
        } else {
            log::debug!(
                "Cache miss at {:?}, capturing {} calls",
                leaf.id(),
                flattened.calls.len()
            );
            let session = compiler.new_session()?;
            let (artifact, stats) = replay(
                graph,
                &mut flattened.calls,
                &flattened.compiler_call,
                session,
                self.options.strict_placeholder_accounting,
            )?;
            leaf.set_compiled_fn(artifact);
            Some(stats)
        };

        for call in flattened.calls.iter_mut() {
            call.node_mut(graph)?.release_variables();
        }

        let artifact = leaf
            .compiled_fn()
            .ok_or(CompiledAutogradError::MissingArtifact(leaf.id()))?;
        let compiler_call = &flattened.compiler_call;
        let outputs = artifact.call(&compiler_call.inputs, &compiler_call.size_inputs)?;
        if outputs.len() != compiler_call.set_grad_targets.len() {
            return Err(CompiledAutogradError::GradTargetCount {
                expected: compiler_call.set_grad_targets.len(),
                got: outputs.len(),
            });
        }
        for (slot, grad) in compiler_call.set_grad_targets.iter().zip(outputs) {
            slot.set_grad(grad);
        }

        Ok(ExecutionReport {
            cache_hit,
            leaf: flattened.leaf,
            num_calls: flattened.calls.len(),
            num_implicit_adds: flattened.num_implicit_adds,
            num_tensor_inputs: compiler_call.inputs.len(),
            num_size_inputs: compiler_call.size_inputs.len(),
            num_grad_targets: compiler_call.set_grad_targets.len(),
            capture,
        })
    }
}
