use crate::compiled_autograd_tests::{Harness, diamond, mul_chain, test_eq};
use compiled_autograd::dtype::DType;
use compiled_autograd::engine::{backward, execute_eager};

pub fn test_chain_compiles_once(harness: &mut Harness) {
    let mut first = mul_chain(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[1.0, 1.0, 1.0], DType::F32);
    let report = backward(&mut first.graph, first.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(!report.cache_hit);
    assert_eq!(report.num_calls, 3);
    assert_eq!(report.num_tensor_inputs, 3);
    assert_eq!(report.num_grad_targets, 1);
    test_eq(&first.x_grad.grad(), &[4.0, 5.0, 6.0], 0.0, 0.0);
    assert_eq!(harness.compiler.sessions_opened(), 1);

    let mut second = mul_chain(&[0.0, 0.0, 0.0], &[-1.0, 0.5, 2.0], &[2.0, 2.0, 3.0], DType::F32);
    let hit = backward(&mut second.graph, second.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(hit.cache_hit);
    assert!(hit.capture.is_none());
    assert_eq!(hit.leaf, report.leaf);
    test_eq(&second.x_grad.grad(), &[-2.0, 1.0, 6.0], 0.0, 0.0);
    assert!(!harness.compiled.is_cache_empty());
    assert_eq!(harness.compiler.sessions_opened(), 1);
    assert_eq!(harness.compiler.artifact_calls(), 2);
    assert_eq!(harness.compiled.cache().count_artifacts(), 1);
}

pub fn test_clear_cache_forces_recompile(harness: &mut Harness) {
    for _ in 0..2 {
        let mut chain = mul_chain(&[1.0, 2.0], &[3.0, 4.0], &[1.0, 1.0], DType::F32);
        backward(&mut chain.graph, chain.root, Some(&mut harness.compiled)).unwrap();
    }
    assert_eq!(harness.compiler.sessions_opened(), 1);

    harness.compiled.clear_cache();
    assert!(harness.compiled.is_cache_empty());

    let mut chain = mul_chain(&[1.0, 2.0], &[3.0, 4.0], &[1.0, 1.0], DType::F32);
    let report = backward(&mut chain.graph, chain.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(!report.cache_hit);
    assert_eq!(harness.compiler.sessions_opened(), 2);
    test_eq(&chain.x_grad.grad(), &[3.0, 4.0], 0.0, 0.0);
}

pub fn test_flatten_is_deterministic(harness: &mut Harness) {
    let first = diamond(&[1.0, 2.0], &[3.0, 4.0], 0.5, DType::F32);
    let second = diamond(&[5.0, 6.0], &[7.0, 8.0], 0.5, DType::F32);
    let flat_first = harness
        .compiled
        .flatten(&first.graph, first.root, first.graph.compute_dependencies(first.root).unwrap())
        .unwrap();
    let nodes_after_first = harness.compiled.cache().count_nodes();
    let flat_second = harness
        .compiled
        .flatten(&second.graph, second.root, second.graph.compute_dependencies(second.root).unwrap())
        .unwrap();
    assert_eq!(flat_first.leaf, flat_second.leaf);
    assert_eq!(harness.compiled.cache().count_nodes(), nodes_after_first);
    let order = |calls: &[compiled_autograd::compiler::NodeCall]| {
        calls.iter().map(|x| (x.node_id(), x.input_refs().to_vec())).collect::<Vec<_>>()
    };
    assert_eq!(order(&flat_first.calls), order(&flat_second.calls));
    // flattening alone never compiles
    assert_eq!(harness.compiler.sessions_opened(), 0);
    assert_eq!(harness.compiled.cache().count_artifacts(), 0);
}

pub fn test_disabled_compiler_runs_eagerly(harness: &mut Harness) {
    let previous = harness.compiled.set_autograd_compiler(None);
    assert!(previous.is_some());
    assert!(!harness.compiled.is_enabled());

    let mut chain = mul_chain(&[1.0], &[7.0], &[2.0], DType::F32);
    let report = backward(&mut chain.graph, chain.root, Some(&mut harness.compiled)).unwrap();
    assert!(report.is_none());
    test_eq(&chain.x_grad.grad(), &[14.0], 0.0, 0.0);
    assert!(harness.compiled.is_cache_empty());
    assert_eq!(harness.compiler.sessions_opened(), 0);

    let mut chain = mul_chain(&[1.0], &[7.0], &[2.0], DType::F32);
    let dependencies = chain.graph.compute_dependencies(chain.root).unwrap();
    assert!(matches!(
        harness.compiled.execute(&mut chain.graph, chain.root, dependencies),
        Err(compiled_autograd::CompiledAutogradError::CompilerNotEnabled)
    ));
}

pub fn test_saved_tensors_released_after_execution(harness: &mut Harness) {
    let mut chain = mul_chain(&[1.0, 2.0], &[3.0, 4.0], &[1.0, 1.0], DType::F32);
    backward(&mut chain.graph, chain.root, Some(&mut harness.compiled)).unwrap();
    // released saved tensors show up as undefined flags in the key
    let dependencies = chain.graph.compute_dependencies(chain.root).unwrap();
    let flattened = harness
        .compiled
        .flatten(&chain.graph, chain.root, dependencies)
        .unwrap();
    assert_eq!(flattened.compiler_call.inputs.len(), 1);
    let fresh = mul_chain(&[1.0, 2.0], &[3.0, 4.0], &[1.0, 1.0], DType::F32);
    let fresh_leaf = harness
        .compiled
        .flatten(&fresh.graph, fresh.root, fresh.graph.compute_dependencies(fresh.root).unwrap())
        .unwrap()
        .leaf;
    assert_ne!(flattened.leaf, fresh_leaf);
    assert!(chain.graph.get(chain.mul).is_some());
    assert!(chain.graph.get(chain.accumulate).is_some());
}

pub fn test_artifact_serves_new_sizes(harness: &mut Harness) {
    let mut short = mul_chain(&[1.0, 2.0], &[3.0, 4.0], &[1.0, 1.0], DType::F32);
    let captured = backward(&mut short.graph, short.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(!captured.cache_hit);
    test_eq(&short.x_grad.grad(), &[3.0, 4.0], 0.0, 0.0);

    // same keys with longer tensors: the artifact runs on the new sizes
    let mut long = mul_chain(&[1.0, 2.0, 3.0], &[3.0, 4.0, 5.0], &[1.0, 2.0, 1.0], DType::F32);
    let report = backward(&mut long.graph, long.root, Some(&mut harness.compiled))
        .unwrap()
        .unwrap();
    assert!(report.cache_hit);
    assert_eq!(report.leaf, captured.leaf);
    assert_eq!(report.num_size_inputs, 1);
    assert_eq!(harness.compiler.sessions_opened(), 1);
    assert_eq!(long.x_grad.grad().shape(), Some(&[3usize][..]));
    test_eq(&long.x_grad.grad(), &[3.0, 8.0, 5.0], 0.0, 0.0);

    let mut eager = mul_chain(&[1.0, 2.0, 3.0], &[3.0, 4.0, 5.0], &[1.0, 2.0, 1.0], DType::F32);
    execute_eager(&mut eager.graph, eager.root).unwrap();
    assert_eq!(eager.x_grad.grad().to_vec().unwrap(), long.x_grad.grad().to_vec().unwrap());
}
