use crate::compiler::{CompiledAutograd, CompiledAutogradError, ExecutionReport};
use crate::graph::{AutogradGraph, NodeId};
use crate::nodes::accumulate;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Runs the graph node by node on concrete values, in the same order a
/// compiled schedule would. Gradients meeting at one input are summed as
/// they arrive.
pub fn execute_eager(graph: &mut AutogradGraph, root: NodeId) -> Result<(), CompiledAutogradError> {
    let mut dependencies = graph.compute_dependencies(root)?;
    let mut input_buffers: HashMap<NodeId, Vec<Tensor>> = HashMap::new();
    input_buffers.insert(root, vec![Tensor::undefined(); graph.node(root)?.num_inputs()]);
    let mut worklist = vec![root];

    while let Some(id) = worklist.pop() {
        let mut inputs = input_buffers
            .remove(&id)
            .ok_or(CompiledAutogradError::MissingNodeCall(id))?;
        let node = graph.node_mut(id)?;
        let hooks = node.hooks().clone();

        for (hook, input_nr) in &hooks.tensor_pre_hooks {
            let num_inputs = inputs.len();
            let grad = inputs
                .get_mut(*input_nr)
                .ok_or(CompiledAutogradError::HookInputIndex {
                    node: id,
                    input_nr: *input_nr,
                    num_inputs,
                })?;
            if grad.is_defined() {
                *grad = hook.call(grad)?;
            }
        }
        for hook in &hooks.pre_hooks {
            inputs = hook.call(&inputs)?;
        }
        let mut outputs = node.apply(inputs.clone())?;
        for hook in &hooks.post_hooks {
            outputs = hook.call(&outputs, &inputs)?;
        }
        node.release_variables();
        log::trace!("Ran {:?} -> {} outputs", node.kind(), outputs.len());

        let edges = node.next_edges().to_vec();
        for (output_nr, edge) in edges.iter().enumerate().rev() {
            let Some(next) = edge.function else {
                continue;
            };
            let num_inputs = graph.node(next)?.num_inputs();
            let buffer = input_buffers
                .entry(next)
                .or_insert_with(|| vec![Tensor::undefined(); num_inputs]);
            let slot = buffer
                .get_mut(edge.input_nr)
                .ok_or(CompiledAutogradError::InvalidEdge {
                    node: next,
                    input_nr: edge.input_nr,
                    num_inputs,
                })?;
            let grad = outputs.get(output_nr).cloned().unwrap_or_default();
            *slot = accumulate(slot, &grad)?;

            let remaining = dependencies
                .get_mut(&next)
                .ok_or(CompiledAutogradError::DanglingDependency(next))?;
            *remaining = remaining
                .checked_sub(1)
                .ok_or(CompiledAutogradError::DanglingDependency(next))?;
            if *remaining == 0 {
                dependencies.remove(&next);
                worklist.push(next);
            }
        }
    }
    Ok(())
}

/// Runs the backward pass from `root`, through the compiled path when
/// `compiled` has a compiler installed and eagerly otherwise. Returns the
/// execution report of a compiled run.
pub fn backward(
    graph: &mut AutogradGraph,
    root: NodeId,
    compiled: Option<&mut CompiledAutograd>,
) -> Result<Option<ExecutionReport>, CompiledAutogradError> {
    match compiled {
        Some(compiled) if compiled.is_enabled() => {
            let dependencies = graph.compute_dependencies(root)?;
            Ok(Some(compiled.execute(graph, root, dependencies)?))
        }
        _ => {
            execute_eager(graph, root)?;
            Ok(None)
        }
    }
}
