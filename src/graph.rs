//! Backbone of the gradient graph the compiled path consumes.
//!
//! Goals:
//! - Node kinds implement one capability trait ([`GraphNode`]) instead of relying on
//!   runtime subclassing: arity, edges, kind identity, key contribution, execution, hooks.
//! - Nodes live in an arena ([`AutogradGraph`]) and refer to each other by [`NodeId`],
//!   so a flattening pass only ever holds indices into a graph it borrows.
use crate::compiler::CompiledAutogradError;
use crate::compiler::key::CompiledNodeArgs;
use crate::compiler::swap::SwapSavedVariables;
use crate::tensor::{Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId {
    inner: usize,
}

impl NodeId {
    pub fn index(&self) -> usize {
        self.inner
    }
}

/// Runtime identity of a node kind; the first-level discriminator of a cache key.
/// Equality, ordering and hashing look at the type only, the name is for display.
#[derive(Clone, Copy)]
pub struct NodeKind {
    type_id: TypeId,
    name: &'static str,
}

impl NodeKind {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>().rsplit("::").next().unwrap_or("?"),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for NodeKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for NodeKind {}

impl PartialOrd for NodeKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl Hash for NodeKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state)
    }
}

impl Debug for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Connection from one output of a node to input `input_nr` of `function`.
/// An edge without a function carries no gradient and is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub function: Option<NodeId>,
    pub input_nr: usize,
}

impl Edge {
    pub fn new(function: NodeId, input_nr: usize) -> Self {
        Self {
            function: Some(function),
            input_nr,
        }
    }

    pub fn invalid() -> Self {
        Self {
            function: None,
            input_nr: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.function.is_some()
    }
}

type TensorPreHookFn = dyn Fn(&Tensor) -> Result<Tensor, TensorError>;
type PreHookFn = dyn Fn(&[Tensor]) -> Result<Vec<Tensor>, TensorError>;
type PostHookFn = dyn Fn(&[Tensor], &[Tensor]) -> Result<Vec<Tensor>, TensorError>;

/// Hook on a single gradient flowing into a node.
#[derive(Clone)]
pub struct TensorPreHook(Rc<TensorPreHookFn>);

impl TensorPreHook {
    pub fn new(hook: impl Fn(&Tensor) -> Result<Tensor, TensorError> + 'static) -> Self {
        Self(Rc::new(hook))
    }

    pub fn call(&self, grad: &Tensor) -> Result<Tensor, TensorError> {
        (self.0)(grad)
    }
}

/// Hook on the full input list of a node, run before the node.
#[derive(Clone)]
pub struct PreHook(Rc<PreHookFn>);

impl PreHook {
    pub fn new(hook: impl Fn(&[Tensor]) -> Result<Vec<Tensor>, TensorError> + 'static) -> Self {
        Self(Rc::new(hook))
    }

    pub fn call(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, TensorError> {
        (self.0)(inputs)
    }
}

/// Hook on `(outputs, inputs)` of a node, run after the node.
#[derive(Clone)]
pub struct PostHook(Rc<PostHookFn>);

impl PostHook {
    pub fn new(
        hook: impl Fn(&[Tensor], &[Tensor]) -> Result<Vec<Tensor>, TensorError> + 'static,
    ) -> Self {
        Self(Rc::new(hook))
    }

    pub fn call(&self, outputs: &[Tensor], inputs: &[Tensor]) -> Result<Vec<Tensor>, TensorError> {
        (self.0)(outputs, inputs)
    }
}

macro_rules! opaque_debug {
    ($($name:ident),*) => {
        $(impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({:p})"), Rc::as_ptr(&self.0))
            }
        })*
    };
}

opaque_debug!(TensorPreHook, PreHook, PostHook);

/// Hooks registered on one node, in registration order.
#[derive(Debug, Clone, Default)]
pub struct NodeHooks {
    pub tensor_pre_hooks: Vec<(TensorPreHook, usize)>,
    pub pre_hooks: Vec<PreHook>,
    pub post_hooks: Vec<PostHook>,
}

impl NodeHooks {
    pub fn add_tensor_pre_hook(&mut self, input_nr: usize, hook: TensorPreHook) {
        self.tensor_pre_hooks.push((hook, input_nr));
    }

    pub fn add_pre_hook(&mut self, hook: PreHook) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: PostHook) {
        self.post_hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.tensor_pre_hooks.is_empty() && self.pre_hooks.is_empty() && self.post_hooks.is_empty()
    }
}

/// A unit of gradient computation.
pub trait GraphNode {
    /// Stable identity of the node's type.
    fn kind(&self) -> NodeKind;

    /// Number of incoming gradients.
    fn num_inputs(&self) -> usize;

    /// Outgoing edges, indexed by output number.
    fn next_edges(&self) -> &[Edge];

    fn num_outputs(&self) -> usize {
        self.next_edges().len()
    }

    fn hooks(&self) -> &NodeHooks;

    fn hooks_mut(&mut self) -> &mut NodeHooks;

    /// Feeds every field that can change generated code into the key builder,
    /// and every tensor/size value into the aggregate inputs.
    fn compiled_args(&self, args: &mut CompiledNodeArgs<'_>);

    /// Eager execution on concrete values.
    fn apply(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, TensorError>;

    /// Execution during capture: saved values are swapped for placeholders around
    /// the computation, in the same order `compiled_args` collected them.
    fn apply_with_saved(
        &mut self,
        inputs: Vec<Tensor>,
        saved: &mut SwapSavedVariables<'_>,
    ) -> Result<Vec<Tensor>, CompiledAutogradError>;

    /// Drops saved values once they are no longer needed.
    fn release_variables(&mut self) {}
}

#[derive(Default)]
pub struct AutogradGraph {
    nodes: Vec<Box<dyn GraphNode>>,
}

impl AutogradGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: impl GraphNode + 'static) -> NodeId {
        let id = NodeId {
            inner: self.nodes.len(),
        };
        self.nodes.push(Box::new(node));
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&dyn GraphNode> {
        self.nodes.get(id.inner).map(|x| x.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut (dyn GraphNode + 'static)> {
        self.nodes.get_mut(id.inner).map(|x| x.as_mut())
    }

    pub fn node(&self, id: NodeId) -> Result<&dyn GraphNode, CompiledAutogradError> {
        self.get(id).ok_or(CompiledAutogradError::UnknownNode(id))
    }

    pub fn node_mut(
        &mut self,
        id: NodeId,
    ) -> Result<&mut (dyn GraphNode + 'static), CompiledAutogradError> {
        self.get_mut(id).ok_or(CompiledAutogradError::UnknownNode(id))
    }

    /// Counts, for every node reachable from `root`, how many valid edges point at it.
    pub fn compute_dependencies(
        &self,
        root: NodeId,
    ) -> Result<HashMap<NodeId, usize>, CompiledAutogradError> {
        let mut dependencies = HashMap::new();
        let mut seen = vec![root];
        let mut queue = vec![root];
        while let Some(id) = queue.pop() {
            for edge in self.node(id)?.next_edges() {
                if let Some(next) = edge.function {
                    *dependencies.entry(next).or_insert(0) += 1;
                    if !seen.contains(&next) {
                        seen.push(next);
                        queue.push(next);
                    }
                }
            }
        }
        Ok(dependencies)
    }
}
