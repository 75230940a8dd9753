use crate::compiled_autograd_tests::{Harness, tensor, test_eq, tolerances};
use compiled_autograd::dtype::DType;
use compiled_autograd::engine::{backward, execute_eager};
use compiled_autograd::graph::{AutogradGraph, Edge, NodeId};
use compiled_autograd::nodes::{
    AccumulateGrad, AddBackward, ExpandBackward, GraphRoot, MulBackward, NegBackward,
};
use compiled_autograd::tensor::{GradSlot, Scalar, TypeAndSize};

struct Mixed {
    graph: AutogradGraph,
    root: NodeId,
    x_grad: GradSlot,
    w_grad: GradSlot,
}

const X: [f64; 3] = [0.5, -1.25, 2.0];
const W: [f64; 3] = [1.5, 0.75, -3.0];
const SEED: [f64; 3] = [1.0, 2.0, -0.5];

/// root -> add(alpha 0.5) -> { mul(x, w) -> x, w ; neg -> w }
/// x.grad = seed * w, w.grad = seed * x - 0.5 * seed
fn mixed(dtype: DType) -> Mixed {
    let shape = [3];
    let mut graph = AutogradGraph::new();
    let x_grad = GradSlot::new();
    let w_grad = GradSlot::new();
    let acc_x = graph.add_node(AccumulateGrad::new(x_grad.clone(), TypeAndSize::new(&shape, dtype)));
    let acc_w = graph.add_node(AccumulateGrad::new(w_grad.clone(), TypeAndSize::new(&shape, dtype)));
    let mul = graph.add_node(MulBackward::new(
        tensor(&X, &shape, dtype),
        tensor(&W, &shape, dtype),
        Edge::new(acc_x, 0),
        Edge::new(acc_w, 0),
    ));
    let neg = graph.add_node(NegBackward::new(Edge::new(acc_w, 0)));
    let add = graph.add_node(AddBackward::new(
        Some(Scalar::Double(0.5)),
        Edge::new(mul, 0),
        Edge::new(neg, 0),
    ));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(&SEED, &shape, dtype)],
        vec![Edge::new(add, 0)],
    ));
    Mixed {
        graph,
        root,
        x_grad,
        w_grad,
    }
}

fn check_against_eager(harness: &mut Harness, dtype: DType) {
    let (atol, rtol) = tolerances(dtype);
    let expected_x: Vec<f64> = SEED.iter().zip(W).map(|(s, w)| s * w).collect();
    let expected_w: Vec<f64> = SEED.iter().zip(X).map(|(s, x)| s * x - 0.5 * s).collect();

    let mut eager = mixed(dtype);
    execute_eager(&mut eager.graph, eager.root).unwrap();

    for _ in 0..2 {
        let mut compiled = mixed(dtype);
        let report = backward(&mut compiled.graph, compiled.root, Some(&mut harness.compiled))
            .unwrap()
            .unwrap();
        assert_eq!(report.num_implicit_adds, 1);
        assert_eq!(report.num_grad_targets, 2);
        assert_eq!(compiled.x_grad.grad().dtype(), Some(dtype));
        test_eq(&compiled.x_grad.grad(), &expected_x, atol, rtol);
        test_eq(&compiled.w_grad.grad(), &expected_w, atol, rtol);
        assert_eq!(
            compiled.x_grad.grad().to_vec().unwrap(),
            eager.x_grad.grad().to_vec().unwrap()
        );
        assert_eq!(
            compiled.w_grad.grad().to_vec().unwrap(),
            eager.w_grad.grad().to_vec().unwrap()
        );
    }
    assert_eq!(harness.compiler.sessions_opened(), 1);
}

pub fn test_compiled_matches_eager_fp32(harness: &mut Harness) {
    check_against_eager(harness, DType::F32);
}

pub fn test_compiled_matches_eager_f16(harness: &mut Harness) {
    check_against_eager(harness, DType::F16);
}

pub fn test_compiled_matches_eager_bf16(harness: &mut Harness) {
    check_against_eager(harness, DType::BF16);
}

pub fn test_capture_accounting_is_symmetric(harness: &mut Harness) {
    let mut graph = mixed(DType::F32);
    let report = backward(&mut graph.graph, graph.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    let stats = report.capture.unwrap();
    assert_eq!(stats.placeholders_produced, report.num_tensor_inputs);
    assert_eq!(stats.placeholders_consumed, stats.placeholders_produced);
    assert_eq!(stats.restored, stats.stashed);
    assert_eq!(stats.size_placeholders_produced, report.num_size_inputs);
    assert_eq!(stats.size_placeholders_consumed, stats.size_placeholders_produced);
    assert_eq!(report.num_tensor_inputs, 3);
}

fn expand_graph(seed: &[f64], seed_shape: &[usize], sizes: &[usize]) -> (AutogradGraph, NodeId, GradSlot) {
    let mut graph = AutogradGraph::new();
    let slot = GradSlot::new();
    let acc = graph.add_node(AccumulateGrad::new(slot.clone(), TypeAndSize::new(sizes, DType::F32)));
    let expand = graph.add_node(ExpandBackward::new(sizes, Edge::new(acc, 0)));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(seed, seed_shape, DType::F32)],
        vec![Edge::new(expand, 0)],
    ));
    (graph, root, slot)
}

pub fn test_expand_backward_sums_broadcast_dims(harness: &mut Harness) {
    let (mut graph, root, slot) = expand_graph(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], &[1, 3]);
    backward(&mut graph, root, Some(&mut harness.compiled)).unwrap();
    assert_eq!(slot.grad().shape(), Some(&[1usize, 3][..]));
    test_eq(&slot.grad(), &[5.0, 7.0, 9.0], 0.0, 0.0);

    // the recorded reduction targets the new sizes on a cache hit
    let seed: Vec<f64> = (1..=8).map(|x| x as f64).collect();
    let (mut graph, root, slot) = expand_graph(&seed, &[4, 2], &[1, 2]);
    let report = backward(&mut graph, root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(report.cache_hit);
    assert_eq!(slot.grad().shape(), Some(&[1usize, 2][..]));
    test_eq(&slot.grad(), &[16.0, 20.0], 0.0, 0.0);
}
