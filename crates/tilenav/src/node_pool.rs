//! Search node pool and open list
//!
//! Every search clears and reuses one arena of nodes; nothing is allocated
//! per query once the pool has grown to its working size. Node identity is
//! the pair (polygon reference, state), where the state carries the
//! boundary-crossing side for searches that must distinguish the direction a
//! tile border was entered from.

use tilenav_common::{next_pow2, Vec3};

use crate::nav_mesh::PolyRef;

/// Index of a node within the pool. The value 0 is reserved to mean "no
/// node" in parent chains; stored indices are offset by one.
pub type NodeIndex = u16;

/// State flag bits of a search node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);
    /// The node's stored parent is not adjacent to it (raycast shortcut).
    pub const PARENT_DETACHED: NodeFlags = NodeFlags(0x04);

    pub fn contains(self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One node of the search graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Position used for cost and heuristic evaluation.
    pub pos: Vec3,
    /// Accumulated cost from the search start.
    pub cost: f32,
    /// Cost plus heuristic; the open list orders by this.
    pub total: f32,
    /// Parent node index + 1, or 0 for the search root.
    pub pidx: NodeIndex,
    /// Extra identity state (boundary-crossing side).
    pub state: u8,
    pub flags: NodeFlags,
    /// Polygon the node stands on.
    pub id: PolyRef,
}

impl Node {
    fn new(id: PolyRef, state: u8) -> Self {
        Self {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            pidx: 0,
            state,
            flags: NodeFlags::default(),
            id,
        }
    }
}

const NULL_IDX: NodeIndex = NodeIndex::MAX;

/// Arena of search nodes with hash-bucket lookup by (reference, state).
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<NodeIndex>,
    next: Vec<NodeIndex>,
    max_nodes: usize,
    hash_mask: usize,
}

impl NodePool {
    pub fn new(max_nodes: usize) -> Self {
        let max_nodes = max_nodes.clamp(1, (NodeIndex::MAX - 1) as usize);
        let hash_size = next_pow2((max_nodes / 4).max(16) as u32) as usize;
        Self {
            nodes: Vec::with_capacity(max_nodes.min(256)),
            first: vec![NULL_IDX; hash_size],
            next: Vec::with_capacity(max_nodes.min(256)),
            max_nodes,
            hash_mask: hash_size - 1,
        }
    }

    /// Empties the pool without releasing storage.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.next.clear();
        self.first.fill(NULL_IDX);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the node for (id, state), allocating it on first use. `None`
    /// when the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(id, state) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node::new(id, state));

        let bucket = self.bucket(id);
        self.next.push(self.first[bucket]);
        self.first[bucket] = idx;
        Some(idx)
    }

    /// Finds an existing node for (id, state).
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        let mut idx = self.first[self.bucket(id)];
        while idx != NULL_IDX {
            let node = &self.nodes[idx as usize];
            if node.id == id && node.state == state {
                return Some(idx);
            }
            idx = self.next[idx as usize];
        }
        None
    }

    /// Finds any node standing on the polygon, regardless of state.
    pub fn find_node_any_state(&self, id: PolyRef) -> Option<NodeIndex> {
        let mut idx = self.first[self.bucket(id)];
        while idx != NULL_IDX {
            if self.nodes[idx as usize].id == id {
                return Some(idx);
            }
            idx = self.next[idx as usize];
        }
        None
    }

    /// Encodes a node index for storage in a parent chain (0 = none).
    pub fn pidx_of(idx: NodeIndex) -> NodeIndex {
        idx + 1
    }

    /// Decodes a parent-chain value back to a node index.
    pub fn node_from_pidx(pidx: NodeIndex) -> Option<NodeIndex> {
        if pidx == 0 {
            None
        } else {
            Some(pidx - 1)
        }
    }

    fn bucket(&self, id: PolyRef) -> usize {
        // Fibonacci hashing over the raw reference bits.
        let (salt, tile, poly) = id.decode();
        let raw = ((salt as u64) << 48) | ((tile as u64) << 20) | poly as u64;
        (raw.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 33) as usize & self.hash_mask
    }
}

/// Binary min-heap of node indices ordered by node total cost.
///
/// The heap stores indices into a [`NodePool`]; callers pass the pool's node
/// slice to every operation so ordering always reflects current totals.
pub struct NodeQueue {
    heap: Vec<NodeIndex>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, idx: NodeIndex, nodes: &[Node]) {
        self.heap.push(idx);
        self.bubble_up(self.heap.len() - 1, idx, nodes);
    }

    pub fn pop(&mut self, nodes: &[Node]) -> Option<NodeIndex> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap[0];
        let last = self.heap.pop().unwrap();
        if !self.heap.is_empty() {
            self.trickle_down(0, last, nodes);
        }
        Some(top)
    }

    /// Re-sorts a node whose total decreased while on the heap.
    pub fn modify(&mut self, idx: NodeIndex, nodes: &[Node]) {
        for i in 0..self.heap.len() {
            if self.heap[i] == idx {
                self.bubble_up(i, idx, nodes);
                return;
            }
        }
    }

    fn bubble_up(&mut self, mut i: usize, idx: NodeIndex, nodes: &[Node]) {
        let total = nodes[idx as usize].total;
        while i > 0 {
            let parent = (i - 1) / 2;
            if total >= nodes[self.heap[parent] as usize].total {
                break;
            }
            self.heap[i] = self.heap[parent];
            i = parent;
        }
        self.heap[i] = idx;
    }

    fn trickle_down(&mut self, mut i: usize, idx: NodeIndex, nodes: &[Node]) {
        let total = nodes[idx as usize].total;
        loop {
            let child1 = 2 * i + 1;
            if child1 >= self.heap.len() {
                break;
            }
            let child2 = child1 + 1;
            let mut min_child = child1;
            if child2 < self.heap.len()
                && nodes[self.heap[child2] as usize].total < nodes[self.heap[child1] as usize].total
            {
                min_child = child2;
            }
            if total <= nodes[self.heap[min_child] as usize].total {
                break;
            }
            self.heap[i] = self.heap[min_child];
            i = min_child;
        }
        self.heap[i] = idx;
    }
}

impl Default for NodeQueue {
    fn default() -> Self {
        Self::new()
    }
}
