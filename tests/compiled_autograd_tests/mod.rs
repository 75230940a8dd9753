use compiled_autograd::compiler::CompiledAutogradOptions;
use compiled_autograd::dtype::DType;
use compiled_autograd::graph::{AutogradGraph, Edge, NodeId};
use compiled_autograd::nodes::{AccumulateGrad, AddBackward, GraphRoot, MulBackward, NegBackward};
use compiled_autograd::tensor::{GradSlot, Scalar, Tensor, TypeAndSize};
use compiled_autograd::{AutogradCompiler, CompiledAutograd, TraceCompiler};
use std::rc::Rc;

pub mod caching;
pub mod numerics;
pub mod structure;

/// A compiled-autograd instance wired to a [`TraceCompiler`] that the test can inspect.
pub struct Harness {
    pub compiled: CompiledAutograd,
    pub compiler: Rc<TraceCompiler>,
}

impl Harness {
    pub fn new(options: CompiledAutogradOptions) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let compiler = Rc::new(TraceCompiler::new());
        let mut compiled = CompiledAutograd::new(options);
        let previous = compiled.set_autograd_compiler(Some(compiler.clone() as Rc<dyn AutogradCompiler>));
        assert!(previous.is_none());
        Self { compiled, compiler }
    }
}

pub fn tensor(values: &[f64], shape: &[usize], dtype: DType) -> Tensor {
    Tensor::from_vec(values.to_vec(), shape.to_vec(), dtype).unwrap()
}

pub fn test_eq(value: &Tensor, correct: &[f64], atol: f64, rtol: f64) {
    let value_vec = value.to_vec().unwrap();
    assert_eq!(value_vec.len(), correct.len());
    for (a, b) in value_vec.iter().zip(correct) {
        let err = (a - b).abs();
        let limit = atol + rtol * (a.abs().max(b.abs()));
        assert!(err <= limit, "{a} != {b}: {err} > {limit}");
    }
}

pub fn tolerances(dtype: DType) -> (f64, f64) {
    match dtype {
        DType::F16 => (1e-5, 4e-3),
        DType::BF16 => (1e-5, 1.6e-2),
        DType::F32 => (1e-5, 1.3e-6),
        _ => (0.0, 0.0),
    }
}

pub struct Chain {
    pub graph: AutogradGraph,
    pub root: NodeId,
    pub mul: NodeId,
    pub accumulate: NodeId,
    pub x_grad: GradSlot,
}

/// root -> MulBackward(x, w) -> AccumulateGrad(x), so x.grad = seed * w.
pub fn mul_chain(x: &[f64], w: &[f64], seed: &[f64], dtype: DType) -> Chain {
    let shape = [x.len()];
    let mut graph = AutogradGraph::new();
    let x_grad = GradSlot::new();
    let accumulate = graph.add_node(AccumulateGrad::new(
        x_grad.clone(),
        TypeAndSize::new(&shape, dtype),
    ));
    let mul = graph.add_node(MulBackward::new(
        tensor(x, &shape, dtype),
        tensor(w, &shape, dtype),
        Edge::new(accumulate, 0),
        Edge::invalid(),
    ));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(seed, &shape, dtype)],
        vec![Edge::new(mul, 0)],
    ));
    Chain {
        graph,
        root,
        mul,
        accumulate,
        x_grad,
    }
}

pub struct Diamond {
    pub graph: AutogradGraph,
    pub root: NodeId,
    pub b: NodeId,
    pub c: NodeId,
    pub d: NodeId,
    pub grad: GradSlot,
}

/// root feeds B (neg) and C (add with alpha); both B and C write input 0 of D.
/// D.grad = -seed_b + seed_c * alpha.
pub fn diamond(seed_b: &[f64], seed_c: &[f64], alpha: f64, dtype: DType) -> Diamond {
    let shape = [seed_b.len()];
    let mut graph = AutogradGraph::new();
    let grad = GradSlot::new();
    let d = graph.add_node(AccumulateGrad::new(
        grad.clone(),
        TypeAndSize::new(&shape, dtype),
    ));
    let b = graph.add_node(NegBackward::new(Edge::new(d, 0)));
    let c = graph.add_node(AddBackward::new(
        Some(Scalar::Double(alpha)),
        Edge::invalid(),
        Edge::new(d, 0),
    ));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(seed_b, &shape, dtype), tensor(seed_c, &shape, dtype)],
        vec![Edge::new(b, 0), Edge::new(c, 0)],
    ));
    Diamond {
        graph,
        root,
        b,
        c,
        d,
        grad,
    }
}
