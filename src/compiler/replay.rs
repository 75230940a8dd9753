use crate::compiler::flatten::{AutogradCompilerCall, NodeCall};
use crate::compiler::swap::{CaptureStats, SwapSavedVariables, TraceState};
use crate::compiler::{CompiledArtifact, CompiledAutogradError, CompilerSession};
use crate::graph::AutogradGraph;
use crate::tensor::Tensor;

/// Runs the schedule once on placeholders so `session` can record it.
/// Each call sees its inputs resolved from earlier calls' outputs, with the
/// call's hooks applied through the session and its saved values swapped
/// for placeholders.
pub(crate) fn replay(
    graph: &mut AutogradGraph,
    calls: &mut [NodeCall],
    compiler_call: &AutogradCompilerCall,
    mut session: Box<dyn CompilerSession>,
    strict: bool,
) -> Result<(Box<dyn CompiledArtifact>, CaptureStats), CompiledAutogradError> {
    let proxy_inputs = session.begin_capture(&compiler_call.inputs)?;
    if proxy_inputs.len() != compiler_call.inputs.len() {
        return Err(CompiledAutogradError::PlaceholderCount {
            expected: compiler_call.inputs.len(),
            got: proxy_inputs.len(),
        });
    }
    let size_proxies = session.begin_capture_sizes(&compiler_call.size_inputs)?;
    if size_proxies.len() != compiler_call.size_inputs.len() {
        return Err(CompiledAutogradError::SizePlaceholderCount {
            expected: compiler_call.size_inputs.len(),
            got: size_proxies.len(),
        });
    }
    let mut state = TraceState::new(proxy_inputs, size_proxies);
    let mut node_outputs: Vec<Vec<Tensor>> = Vec::with_capacity(calls.len());

    for call in calls.iter_mut() {
        let mut inputs = call
            .input_refs
            .iter()
            .map(|input_ref| match input_ref {
                Some(x) => node_outputs
                    .get(x.call)
                    .and_then(|outputs| outputs.get(x.index))
                    .cloned()
                    .ok_or(CompiledAutogradError::InvalidOutputRef(*x)),
                None => Ok(Tensor::undefined()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (hook, input_nr) in &call.tensor_pre_hooks {
            inputs = session.tensor_pre_hook(inputs, hook, *input_nr)?;
        }
        for hook in &call.pre_hooks {
            inputs = session.pre_hook(inputs, hook)?;
        }

        let node = call.node_mut(graph)?;
        let mut saved = SwapSavedVariables::new(&mut state);
        let mut outputs = node.apply_with_saved(inputs.clone(), &mut saved)?;
        saved.finish(strict)?;
        log::trace!("Replayed {:?} -> {} outputs", node.kind(), outputs.len());

        for hook in &call.post_hooks {
            outputs = session.post_hook(outputs, &inputs, hook)?;
        }
        node_outputs.push(outputs);
    }

    let (outputs, stats) = state.finish(strict)?;
    let artifact = session.end_capture(outputs)?;
    Ok((artifact, stats))
}
