use crate::fields::Fields;
use crate::node::Node;
use crate::node_id::NodeId;
use crate::pipe::Pipe;
use crate::tuple::Tuple;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// -------- Pipeline + nodes --------
/// A flat node table; edges are the `inputs` of each entry, so the graph
/// never holds back-references.
pub struct Pipeline {
    pub(crate) inner: Arc<Mutex<PipelineInner>>,
}

#[derive(Clone, Debug)]
pub struct NodeEntry {
    pub id: NodeId,
    pub node: Node,
    /// Upstream nodes, one per input slot (per branch for groups).
    pub inputs: Vec<NodeId>,
}

#[derive(Default)]
pub struct PipelineInner {
    pub nodes: Vec<NodeEntry>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PipelineInner::default())),
        }
    }
}

/// Allow `Pipeline` cloning; clones share one graph.
impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Pipeline {
    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert_node(&self, node: Node, inputs: Vec<NodeId>) -> NodeId {
        let mut g = self.lock();
        let id = NodeId::new(u64::try_from(g.nodes.len()).unwrap_or(u64::MAX));
        g.nodes.push(NodeEntry { id, node, inputs });
        id
    }

    /// Copy of the node table.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.lock().nodes.clone()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.lock().nodes.iter().map(|n| n.inputs.len()).sum()
    }

    /// Whether `other` shares this pipeline's graph.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add an in-memory source emitting `data` with the given `fields`.
    pub fn source(&self, name: impl Into<String>, fields: Fields, data: Vec<Tuple>) -> Pipe {
        let id = self.insert_node(
            Node::Source {
                name: name.into(),
                fields,
                data: Arc::new(data),
            },
            Vec::new(),
        );
        Pipe::new(self.clone(), id)
    }
}
