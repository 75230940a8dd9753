pub mod compiler;
pub mod dtype;
pub mod engine;
pub mod graph;
pub mod nodes;
pub mod tensor;
pub mod trace_graph;

pub use compiler::trace_compiler::TraceCompiler;
pub use compiler::{
    AutogradCompiler, CompiledArtifact, CompiledAutograd, CompiledAutogradError,
    CompiledAutogradOptions, CompilerError, CompilerSession, ExecutionReport,
};
pub use dtype::DType;
pub use engine::{backward, execute_eager};
pub use graph::{AutogradGraph, Edge, GraphNode, NodeId, NodeKind};
pub use tensor::{GradSlot, Scalar, SymInt, Tensor, TypeAndSize};
