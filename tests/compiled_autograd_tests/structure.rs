use crate::compiled_autograd_tests::{Harness, diamond, mul_chain, tensor, test_eq};
use compiled_autograd::compiler::OutputRef;
use compiled_autograd::compiler::cache::CacheNodeId;
use compiled_autograd::dtype::DType;
use compiled_autograd::engine::{backward, execute_eager};
use compiled_autograd::graph::{AutogradGraph, Edge, NodeId, TensorPreHook};
use compiled_autograd::nodes::{
    AccumulateGrad, AddBackward, GraphRoot, MulBackward, SumBackward, ToCopyBackward,
};
use compiled_autograd::tensor::{GradSlot, Scalar, Tensor, TypeAndSize};

fn leaf_of(harness: &mut Harness, graph: &AutogradGraph, root: NodeId) -> CacheNodeId {
    let dependencies = graph.compute_dependencies(root).unwrap();
    harness.compiled.flatten(graph, root, dependencies).unwrap().leaf
}

pub fn test_fan_in_schedule(harness: &mut Harness) {
    let d = diamond(&[1.0, 2.0], &[3.0, 4.0], 0.5, DType::F32);
    let dependencies = d.graph.compute_dependencies(d.root).unwrap();
    let flattened = harness.compiled.flatten(&d.graph, d.root, dependencies).unwrap();

    assert_eq!(flattened.calls.len(), d.graph.len() + 1);
    assert_eq!(flattened.num_implicit_adds, 1);
    let order: Vec<_> = flattened.calls.iter().map(|x| x.node_id()).collect();
    assert_eq!(order, vec![Some(d.root), Some(d.b), Some(d.c), None, Some(d.d)]);

    let add = &flattened.calls[3];
    assert!(add.is_synthesized());
    assert_eq!(
        add.input_refs(),
        &[
            Some(OutputRef { call: 1, index: 0 }),
            Some(OutputRef { call: 2, index: 1 }),
        ]
    );
    assert_eq!(flattened.calls[4].input_refs(), &[Some(OutputRef { call: 3, index: 0 })]);
}

pub fn test_fan_in_matches_eager(harness: &mut Harness) {
    let mut compiled = diamond(&[1.0, 2.0], &[3.0, 4.0], 0.5, DType::F32);
    let report = backward(&mut compiled.graph, compiled.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert_eq!(report.num_implicit_adds, 1);
    test_eq(&compiled.grad.grad(), &[0.5, 0.0], 0.0, 0.0);

    let mut eager = diamond(&[1.0, 2.0], &[3.0, 4.0], 0.5, DType::F32);
    execute_eager(&mut eager.graph, eager.root).unwrap();
    assert_eq!(eager.grad.grad().to_vec().unwrap(), compiled.grad.grad().to_vec().unwrap());
}

pub fn test_scalar_values_are_structural(harness: &mut Harness) {
    let half = diamond(&[1.0], &[1.0], 0.5, DType::F32);
    let half_again = diamond(&[9.0], &[-9.0], 0.5, DType::F32);
    let quarter = diamond(&[1.0], &[1.0], 0.25, DType::F32);
    let half_leaf = leaf_of(harness, &half.graph, half.root);
    assert_eq!(leaf_of(harness, &half_again.graph, half_again.root), half_leaf);
    assert_ne!(leaf_of(harness, &quarter.graph, quarter.root), half_leaf);
}

fn add_graph(alpha: Option<Scalar>) -> (AutogradGraph, NodeId) {
    let mut graph = AutogradGraph::new();
    let acc = graph.add_node(AccumulateGrad::new(
        GradSlot::new(),
        TypeAndSize::new(&[1], DType::F32),
    ));
    let add = graph.add_node(AddBackward::new(alpha, Edge::new(acc, 0), Edge::invalid()));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(&[1.0], &[1], DType::F32)],
        vec![Edge::new(add, 0)],
    ));
    (graph, root)
}

pub fn test_optional_and_scalar_type_are_structural(harness: &mut Harness) {
    let (none, none_root) = add_graph(None);
    let (double, double_root) = add_graph(Some(Scalar::Double(1.0)));
    let (long, long_root) = add_graph(Some(Scalar::Long(1)));
    let (flag, flag_root) = add_graph(Some(Scalar::Bool(true)));
    let leaves = [
        leaf_of(harness, &none, none_root),
        leaf_of(harness, &double, double_root),
        leaf_of(harness, &long, long_root),
        leaf_of(harness, &flag, flag_root),
    ];
    for i in 0..leaves.len() {
        for j in (i + 1)..leaves.len() {
            assert_ne!(leaves[i], leaves[j]);
        }
    }
}

fn cast_graph(from: DType) -> (AutogradGraph, NodeId, GradSlot) {
    let mut graph = AutogradGraph::new();
    let slot = GradSlot::new();
    let acc = graph.add_node(AccumulateGrad::new(slot.clone(), TypeAndSize::new(&[2], from)));
    let cast = graph.add_node(ToCopyBackward::new(
        TypeAndSize::new(&[2], from),
        Edge::new(acc, 0),
    ));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(&[1.0009765625, -2.5], &[2], DType::F32)],
        vec![Edge::new(cast, 0)],
    ));
    (graph, root, slot)
}

pub fn test_dtype_is_structural(harness: &mut Harness) {
    let (f16_graph, f16_root, _) = cast_graph(DType::F16);
    let (bf16_graph, bf16_root, _) = cast_graph(DType::BF16);
    assert_ne!(
        leaf_of(harness, &f16_graph, f16_root),
        leaf_of(harness, &bf16_graph, bf16_root)
    );

    let (mut graph, root, slot) = cast_graph(DType::F16);
    backward(&mut graph, root, Some(&mut harness.compiled)).unwrap();
    assert_eq!(slot.grad().dtype(), Some(DType::F16));
    test_eq(&slot.grad(), &[1.0009765625, -2.5], 0.0, 0.0);

    let (mut graph, root, slot) = cast_graph(DType::BF16);
    backward(&mut graph, root, Some(&mut harness.compiled)).unwrap();
    assert_eq!(slot.grad().dtype(), Some(DType::BF16));
    test_eq(&slot.grad(), &[1.0, -2.5], 0.0, 0.0);
}

pub fn test_defined_flag_is_structural(harness: &mut Harness) {
    let defined = mul_chain(&[1.0], &[2.0], &[1.0], DType::F32);

    let mut graph = AutogradGraph::new();
    let acc = graph.add_node(AccumulateGrad::new(
        GradSlot::new(),
        TypeAndSize::new(&[1], DType::F32),
    ));
    let mul = graph.add_node(MulBackward::new(
        Tensor::undefined(),
        tensor(&[2.0], &[1], DType::F32),
        Edge::new(acc, 0),
        Edge::invalid(),
    ));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(&[1.0], &[1], DType::F32)],
        vec![Edge::new(mul, 0)],
    ));

    assert_ne!(
        leaf_of(harness, &defined.graph, defined.root),
        leaf_of(harness, &graph, root)
    );
}

pub fn test_hook_count_is_structural(harness: &mut Harness) {
    let plain = mul_chain(&[1.0], &[2.0], &[1.0], DType::F32);
    let mut hooked = mul_chain(&[1.0], &[2.0], &[1.0], DType::F32);
    hooked
        .graph
        .node_mut(hooked.accumulate)
        .unwrap()
        .hooks_mut()
        .add_tensor_pre_hook(0, TensorPreHook::new(|g| g.neg()));
    let mut hooked_twice = mul_chain(&[1.0], &[2.0], &[1.0], DType::F32);
    for _ in 0..2 {
        hooked_twice
            .graph
            .node_mut(hooked_twice.accumulate)
            .unwrap()
            .hooks_mut()
            .add_tensor_pre_hook(0, TensorPreHook::new(|g| g.neg()));
    }
    let plain_leaf = leaf_of(harness, &plain.graph, plain.root);
    let hooked_leaf = leaf_of(harness, &hooked.graph, hooked.root);
    let hooked_twice_leaf = leaf_of(harness, &hooked_twice.graph, hooked_twice.root);
    assert_ne!(plain_leaf, hooked_leaf);
    assert_ne!(hooked_leaf, hooked_twice_leaf);
}

fn sum_graph(sizes: &[usize]) -> (AutogradGraph, NodeId, GradSlot) {
    let mut graph = AutogradGraph::new();
    let slot = GradSlot::new();
    let acc = graph.add_node(AccumulateGrad::new(slot.clone(), TypeAndSize::new(sizes, DType::F32)));
    let sum = graph.add_node(SumBackward::new(sizes, Edge::new(acc, 0)));
    let root = graph.add_node(GraphRoot::new(
        vec![tensor(&[2.0], &[], DType::F32)],
        vec![Edge::new(sum, 0)],
    ));
    (graph, root, slot)
}

pub fn test_sizes_are_not_structural(harness: &mut Harness) {
    let (small, small_root, _) = sum_graph(&[2, 3]);
    let (large, large_root, _) = sum_graph(&[40, 7]);
    let small_flat = harness
        .compiled
        .flatten(&small, small_root, small.compute_dependencies(small_root).unwrap())
        .unwrap();
    let large_flat = harness
        .compiled
        .flatten(&large, large_root, large.compute_dependencies(large_root).unwrap())
        .unwrap();
    assert_eq!(small_flat.leaf, large_flat.leaf);
    assert_eq!(small_flat.compiler_call.size_inputs, vec![2, 3, 2, 3]);
    assert_eq!(large_flat.compiler_call.size_inputs, vec![40, 7, 40, 7]);

    // rank is structural
    let (flat, flat_root, _) = sum_graph(&[6]);
    assert_ne!(leaf_of(harness, &flat, flat_root), small_flat.leaf);

    let (mut graph, root, slot) = sum_graph(&[2, 3]);
    backward(&mut graph, root, Some(&mut harness.compiled)).unwrap();
    assert_eq!(slot.grad().shape(), Some(&[2usize, 3][..]));
    test_eq(&slot.grad(), &[2.0; 6], 0.0, 0.0);

    let (mut graph, root, slot) = sum_graph(&[4, 5]);
    let report = backward(&mut graph, root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(report.cache_hit);
    assert_eq!(slot.grad().shape(), Some(&[4usize, 5][..]));
    test_eq(&slot.grad(), &[2.0; 20], 0.0, 0.0);
}
