use crate::compiler::CompiledAutogradError;
use crate::compiler::cache::{CacheNode, CacheNodeId};
use crate::compiler::key::CompiledNodeArgs;
use crate::graph::{AutogradGraph, GraphNode, NodeId, NodeKind, PostHook, PreHook, TensorPreHook};
use crate::nodes::ImplicitAdd;
use crate::tensor::{GradSlot, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{Debug, Formatter};

/// Output `index` of the call at position `call` in the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub call: usize,
    pub index: usize,
}

pub(crate) enum CallTarget {
    Graph(NodeId),
    /// Owned by the schedule, not the graph.
    ImplicitAdd(ImplicitAdd),
}

/// One step of the schedule: which node runs, where each of its inputs
/// comes from, and the hooks that wrap it.
pub struct NodeCall {
    target: CallTarget,
    pub(crate) input_refs: Vec<Option<OutputRef>>,
    pub(crate) tensor_pre_hooks: Vec<(TensorPreHook, usize)>,
    pub(crate) pre_hooks: Vec<PreHook>,
    pub(crate) post_hooks: Vec<PostHook>,
}

impl Debug for NodeCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("NodeCall");
        match &self.target {
            CallTarget::Graph(id) => s.field("node", id),
            CallTarget::ImplicitAdd(_) => s.field("node", &"ImplicitAdd"),
        };
        s.field("input_refs", &self.input_refs)
            .field("tensor_pre_hooks", &self.tensor_pre_hooks.len())
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .finish()
    }
}

impl NodeCall {
    fn new(target: CallTarget, num_inputs: usize) -> Self {
        Self {
            target,
            input_refs: vec![None; num_inputs],
            tensor_pre_hooks: Vec::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(num_inputs: usize) -> Self {
        Self::new(CallTarget::ImplicitAdd(ImplicitAdd::new()), num_inputs)
    }

    /// Graph node this call runs, `None` for a synthesized accumulation.
    pub fn node_id(&self) -> Option<NodeId> {
        match self.target {
            CallTarget::Graph(id) => Some(id),
            CallTarget::ImplicitAdd(_) => None,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self.target, CallTarget::ImplicitAdd(_))
    }

    pub fn input_refs(&self) -> &[Option<OutputRef>] {
        &self.input_refs
    }

    pub fn num_hooks(&self) -> usize {
        self.tensor_pre_hooks.len() + self.pre_hooks.len() + self.post_hooks.len()
    }

    pub fn kind(&self, graph: &AutogradGraph) -> Result<NodeKind, CompiledAutogradError> {
        Ok(self.node(graph)?.kind())
    }

    pub(crate) fn node<'g>(
        &'g self,
        graph: &'g AutogradGraph,
    ) -> Result<&'g dyn GraphNode, CompiledAutogradError> {
        match &self.target {
            CallTarget::Graph(id) => graph.node(*id),
            CallTarget::ImplicitAdd(node) => Ok(node),
        }
    }

    pub(crate) fn node_mut<'g>(
        &'g mut self,
        graph: &'g mut AutogradGraph,
    ) -> Result<&'g mut (dyn GraphNode + 'static), CompiledAutogradError> {
        match &mut self.target {
            CallTarget::Graph(id) => graph.node_mut(*id),
            CallTarget::ImplicitAdd(node) => Ok(node),
        }
    }
}

/// Everything the artifact consumes or produces, gathered across all calls.
#[derive(Debug, Default)]
pub struct AutogradCompilerCall {
    pub inputs: Vec<Tensor>,
    pub size_inputs: Vec<i64>,
    pub set_grad_targets: Vec<GradSlot>,
}

#[derive(Debug)]
pub struct FlattenedGraph {
    pub calls: Vec<NodeCall>,
    pub compiler_call: AutogradCompilerCall,
    pub leaf: CacheNodeId,
    pub num_implicit_adds: usize,
}

fn visit<'c>(
    cache: &'c mut CacheNode,
    compiler_call: &mut AutogradCompilerCall,
    node_call: &mut NodeCall,
    node: &dyn GraphNode,
    key_capacity: usize,
) -> Result<&'c mut CacheNode, CompiledAutogradError> {
    let mut args = CompiledNodeArgs::new(compiler_call, node_call, node.kind(), key_capacity);
    args.collect_input_refs();
    node.compiled_args(&mut args);
    args.collect_hooks_from(node.hooks());
    let key = args.key()?;
    log::trace!("{key:?}");
    Ok(cache.lookup(key))
}

/// Orders the graph reachable from `root` into a schedule where every call
/// follows the calls feeding it, synthesizing an [`ImplicitAdd`] wherever two
/// outputs feed the same input. Each call's key advances `cache` one level;
/// the node reached last is returned with the schedule.
pub(crate) fn flatten<'c>(
    graph: &AutogradGraph,
    root: NodeId,
    mut dependencies: HashMap<NodeId, usize>,
    mut cache: &'c mut CacheNode,
    key_capacity: usize,
) -> Result<(FlattenedGraph, &'c mut CacheNode), CompiledAutogradError> {
    let mut compiler_call = AutogradCompilerCall::default();
    let mut calls: Vec<NodeCall> = Vec::with_capacity(dependencies.len() + 1);
    let mut num_implicit_adds = 0;

    let mut node_inputs: HashMap<NodeId, NodeCall> = HashMap::new();
    node_inputs.insert(
        root,
        NodeCall::new(CallTarget::Graph(root), graph.node(root)?.num_inputs()),
    );
    let mut worklist = vec![root];

    while let Some(id) = worklist.pop() {
        let mut node_call = node_inputs
            .remove(&id)
            .ok_or(CompiledAutogradError::MissingNodeCall(id))?;
        let node = graph.node(id)?;
        cache = visit(cache, &mut compiler_call, &mut node_call, node, key_capacity)?;
        calls.push(node_call);
        let call = calls.len() - 1;

        for (index, edge) in node.next_edges().iter().enumerate().rev() {
            let Some(next) = edge.function else {
                continue;
            };
            let input_buffer = match node_inputs.entry(next) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let num_inputs = graph.node(next)?.num_inputs();
                    entry.insert(NodeCall::new(CallTarget::Graph(next), num_inputs))
                }
            };
            let num_inputs = input_buffer.input_refs.len();
            let slot = input_buffer.input_refs.get_mut(edge.input_nr).ok_or(
                CompiledAutogradError::InvalidEdge {
                    node: next,
                    input_nr: edge.input_nr,
                    num_inputs,
                },
            )?;

            let produced = OutputRef { call, index };
            match *slot {
                None => *slot = Some(produced),
                Some(previous) => {
                    let add = ImplicitAdd::new();
                    let mut implicit_add = NodeCall::new(CallTarget::ImplicitAdd(add.clone()), 2);
                    implicit_add.input_refs = vec![Some(previous), Some(produced)];
                    cache = visit(cache, &mut compiler_call, &mut implicit_add, &add, key_capacity)?;
                    calls.push(implicit_add);
                    num_implicit_adds += 1;
                    *slot = Some(OutputRef {
                        call: calls.len() - 1,
                        index: 0,
                    });
                }
            }

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

    log::debug!(
        "Flattened {} calls ({} implicit adds), {} tensor inputs, {} size inputs",
        calls.len(),
        num_implicit_adds,
        compiler_call.inputs.len(),
        compiler_call.size_inputs.len()
    );

    let leaf = cache.id();
    Ok((
        FlattenedGraph {
            calls,
            compiler_call,
            leaf,
            num_implicit_adds,
        },
        cache,
    ))
}
