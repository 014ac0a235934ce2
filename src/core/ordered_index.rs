//! Purpose: Red-black tree index mapping keys to row identifiers.
//! Exports: `OrderedIndex`, `Iter`.
//! Role: The `ordered` index strategy; O(log n) insert, search and delete.
//! Invariants: Nodes live in an arena addressed by `NodeId`; slot 0 is the black
//! nil sentinel, whose `entry` is always `None`.
//! Invariants: Insert never merges duplicate keys. Equal keys descend right on
//! insert, so search returns whichever duplicate its descent reaches first.
//! Invariants: Root is black, red nodes have black children, and every path to a
//! leaf carries the same number of black nodes.

use serde::{Deserialize, Serialize};

use crate::core::value::RowId;

type NodeId = usize;

const NIL: NodeId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Color {
    Red,
    Black,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Node<K> {
    entry: Option<(K, RowId)>,
    color: Color,
    parent: NodeId,
    left: NodeId,
    right: NodeId,
}

impl<K> Node<K> {
    fn nil() -> Self {
        Self {
            entry: None,
            color: Color::Black,
            parent: NIL,
            left: NIL,
            right: NIL,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    try_from = "RawOrderedIndex<K>",
    bound(deserialize = "K: Deserialize<'de> + Ord")
)]
pub struct OrderedIndex<K> {
    nodes: Vec<Node<K>>,
    root: NodeId,
    free: Vec<NodeId>,
    len: usize,
}

// Unchecked persisted form; `TryFrom` rejects arenas that would index out of
// bounds, loop, or break the red-black shape.
#[derive(Deserialize)]
struct RawOrderedIndex<K> {
    nodes: Vec<Node<K>>,
    root: NodeId,
    free: Vec<NodeId>,
    len: usize,
}

impl<K: Ord> TryFrom<RawOrderedIndex<K>> for OrderedIndex<K> {
    type Error = String;

    fn try_from(raw: RawOrderedIndex<K>) -> Result<Self, Self::Error> {
        let index = OrderedIndex {
            nodes: raw.nodes,
            root: raw.root,
            free: raw.free,
            len: raw.len,
        };
        index.check_arena()?;
        index.verify()?;
        Ok(index)
    }
}

impl<K: Ord> OrderedIndex<K> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::nil()],
            root: NIL,
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, key: K, row_id: RowId) {
        let mut parent = NIL;
        let mut cur = self.root;
        let mut go_left = false;
        while let Some((existing, _)) = self.nodes[cur].entry.as_ref() {
            parent = cur;
            go_left = key < *existing;
            cur = if go_left {
                self.nodes[cur].left
            } else {
                self.nodes[cur].right
            };
        }

        let node = self.alloc(key, row_id, parent);
        if parent == NIL {
            self.root = node;
        } else if go_left {
            self.nodes[parent].left = node;
        } else {
            self.nodes[parent].right = node;
        }
        self.len += 1;
        self.insert_fixup(node);
    }

    pub fn search(&self, key: &K) -> Option<RowId> {
        let node = self.find(key);
        self.nodes[node].entry.as_ref().map(|(_, row_id)| *row_id)
    }

    /// Removes one node holding `key` (the one `search` would return).
    pub fn remove(&mut self, key: &K) -> Option<RowId> {
        let node = self.find(key);
        let row_id = self.nodes[node].entry.as_ref().map(|(_, row_id)| *row_id)?;
        self.delete_node(node);
        Some(row_id)
    }

    pub fn min(&self) -> Option<(&K, RowId)> {
        if self.root == NIL {
            return None;
        }
        self.entry(self.minimum(self.root))
    }

    pub fn max(&self) -> Option<(&K, RowId)> {
        let mut cur = self.root;
        if cur == NIL {
            return None;
        }
        while self.nodes[cur].right != NIL {
            cur = self.nodes[cur].right;
        }
        self.entry(cur)
    }

    /// Smallest entry whose key is strictly greater than `key`.
    pub fn successor(&self, key: &K) -> Option<(&K, RowId)> {
        let mut cur = self.root;
        let mut best = NIL;
        while let Some((existing, _)) = self.nodes[cur].entry.as_ref() {
            if key < existing {
                best = cur;
                cur = self.nodes[cur].left;
            } else {
                cur = self.nodes[cur].right;
            }
        }
        self.entry(best)
    }

    /// Largest entry whose key is strictly less than `key`.
    pub fn predecessor(&self, key: &K) -> Option<(&K, RowId)> {
        let mut cur = self.root;
        let mut best = NIL;
        while let Some((existing, _)) = self.nodes[cur].entry.as_ref() {
            if existing < key {
                best = cur;
                cur = self.nodes[cur].right;
            } else {
                cur = self.nodes[cur].left;
            }
        }
        self.entry(best)
    }

    /// In-order traversal; duplicates appear adjacent.
    pub fn iter(&self) -> Iter<'_, K> {
        let mut iter = Iter {
            index: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    fn find(&self, key: &K) -> NodeId {
        let mut cur = self.root;
        while let Some((existing, _)) = self.nodes[cur].entry.as_ref() {
            cur = match key.cmp(existing) {
                std::cmp::Ordering::Less => self.nodes[cur].left,
                std::cmp::Ordering::Greater => self.nodes[cur].right,
                std::cmp::Ordering::Equal => return cur,
            };
        }
        NIL
    }

    fn entry(&self, node: NodeId) -> Option<(&K, RowId)> {
        self.nodes[node]
            .entry
            .as_ref()
            .map(|(key, row_id)| (key, *row_id))
    }

    fn alloc(&mut self, key: K, row_id: RowId, parent: NodeId) -> NodeId {
        let node = Node {
            entry: Some((key, row_id)),
            color: Color::Red,
            parent,
            left: NIL,
            right: NIL,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn minimum(&self, mut node: NodeId) -> NodeId {
        while self.nodes[node].left != NIL {
            node = self.nodes[node].left;
        }
        node
    }

    fn color(&self, node: NodeId) -> Color {
        self.nodes[node].color
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if self.nodes[x_parent].left == x {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if self.nodes[x_parent].right == x {
            self.nodes[x_parent].right = y;
        } else {
            self.nodes[x_parent].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        while self.color(self.nodes[z].parent) == Color::Red {
            let parent = self.nodes[z].parent;
            let grand = self.nodes[parent].parent;
            if parent == self.nodes[grand].left {
                let uncle = self.nodes[grand].right;
                if self.color(uncle) == Color::Red {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grand].color = Color::Red;
                    z = grand;
                } else {
                    if z == self.nodes[parent].right {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grand = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grand].color = Color::Red;
                    self.rotate_right(grand);
                }
            } else {
                let uncle = self.nodes[grand].left;
                if self.color(uncle) == Color::Red {
                    self.nodes[parent].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[grand].color = Color::Red;
                    z = grand;
                } else {
                    if z == self.nodes[parent].left {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.nodes[z].parent;
                    let grand = self.nodes[parent].parent;
                    self.nodes[parent].color = Color::Black;
                    self.nodes[grand].color = Color::Red;
                    self.rotate_left(grand);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    fn transplant(&mut self, u: NodeId, v: NodeId) {
        let u_parent = self.nodes[u].parent;
        if u_parent == NIL {
            self.root = v;
        } else if u == self.nodes[u_parent].left {
            self.nodes[u_parent].left = v;
        } else {
            self.nodes[u_parent].right = v;
        }
        // May write the sentinel's parent; delete_fixup relies on that.
        self.nodes[v].parent = u_parent;
    }

    fn delete_node(&mut self, z: NodeId) {
        let mut removed_color = self.color(z);
        let x;
        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            self.transplant(z, x);
        } else {
            let y = self.minimum(self.nodes[z].right);
            removed_color = self.color(y);
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                let z_right = self.nodes[z].right;
                self.nodes[y].right = z_right;
                self.nodes[z_right].parent = y;
            }
            self.transplant(z, y);
            let z_left = self.nodes[z].left;
            self.nodes[y].left = z_left;
            self.nodes[z_left].parent = y;
            self.nodes[y].color = self.nodes[z].color;
        }
        if removed_color == Color::Black {
            self.delete_fixup(x);
        }

        self.nodes[z] = Node::nil();
        self.free.push(z);
        self.nodes[NIL] = Node::nil();
        self.len -= 1;
    }

    fn delete_fixup(&mut self, mut x: NodeId) {
        while x != self.root && self.color(x) == Color::Black {
            let parent = self.nodes[x].parent;
            if x == self.nodes[parent].left {
                let mut w = self.nodes[parent].right;
                if self.color(w) == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.rotate_left(parent);
                    w = self.nodes[parent].right;
                }
                let (w_left, w_right) = (self.nodes[w].left, self.nodes[w].right);
                if self.color(w_left) == Color::Black && self.color(w_right) == Color::Black {
                    self.nodes[w].color = Color::Red;
                    x = parent;
                } else {
                    if self.color(w_right) == Color::Black {
                        self.nodes[w_left].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.rotate_right(w);
                        w = self.nodes[parent].right;
                    }
                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    let w_right = self.nodes[w].right;
                    self.nodes[w_right].color = Color::Black;
                    self.rotate_left(parent);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[parent].left;
                if self.color(w) == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[parent].color = Color::Red;
                    self.rotate_right(parent);
                    w = self.nodes[parent].left;
                }
                let (w_left, w_right) = (self.nodes[w].left, self.nodes[w].right);
                if self.color(w_left) == Color::Black && self.color(w_right) == Color::Black {
                    self.nodes[w].color = Color::Red;
                    x = parent;
                } else {
                    if self.color(w_left) == Color::Black {
                        self.nodes[w_right].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.rotate_left(w);
                        w = self.nodes[parent].left;
                    }
                    self.nodes[w].color = self.nodes[parent].color;
                    self.nodes[parent].color = Color::Black;
                    let w_left = self.nodes[w].left;
                    self.nodes[w_left].color = Color::Black;
                    self.rotate_right(parent);
                    x = self.root;
                }
            }
        }
        self.nodes[x].color = Color::Black;
    }

    /// Bounds, sentinel, free-list and reachability checks on an untrusted arena.
    ///
    /// Walks iteratively and caps depth at the red-black height bound, so
    /// `verify` can recurse safely afterwards.
    fn check_arena(&self) -> Result<(), String> {
        let slots = self.nodes.len();
        let Some(sentinel) = self.nodes.first() else {
            return Err("arena has no sentinel slot".to_string());
        };
        if sentinel.entry.is_some() || sentinel.color != Color::Black {
            return Err("slot 0 is not the black nil sentinel".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if [node.parent, node.left, node.right].iter().any(|&link| link >= slots) {
                return Err(format!("node {id} links outside the arena"));
            }
        }
        if self.root >= slots {
            return Err("root is outside the arena".to_string());
        }

        let mut seen = vec![false; slots];
        seen[NIL] = true;
        for &slot in &self.free {
            if slot == NIL || slot >= slots || self.nodes[slot].entry.is_some() {
                return Err(format!("free list holds invalid slot {slot}"));
            }
            if std::mem::replace(&mut seen[slot], true) {
                return Err(format!("free list repeats slot {slot}"));
            }
        }

        let max_depth = 2 * (usize::BITS - self.len.saturating_add(1).leading_zeros()) as usize;
        let mut reachable = 0usize;
        let mut stack = Vec::new();
        if self.root != NIL {
            if self.nodes[self.root].parent != NIL {
                return Err("root has a parent".to_string());
            }
            stack.push((self.root, 1usize));
        }
        while let Some((node, depth)) = stack.pop() {
            if std::mem::replace(&mut seen[node], true) {
                return Err(format!("node {node} is reachable twice"));
            }
            if self.nodes[node].entry.is_none() {
                return Err(format!("node {node} is linked but empty"));
            }
            if depth > max_depth {
                return Err("tree is deeper than its length allows".to_string());
            }
            reachable += 1;
            for child in [self.nodes[node].left, self.nodes[node].right] {
                if child == NIL {
                    continue;
                }
                if self.nodes[child].parent != node {
                    return Err(format!("broken parent link at node {child}"));
                }
                stack.push((child, depth + 1));
            }
        }
        if reachable != self.len {
            return Err(format!("len {} but {reachable} reachable nodes", self.len));
        }
        if reachable + self.free.len() + 1 != slots {
            return Err("arena holds slots that are neither live nor free".to_string());
        }
        Ok(())
    }

    /// Checks every red-black and ordering invariant, returning the black height.
    fn verify(&self) -> Result<usize, String> {
        if self.color(self.root) != Color::Black {
            return Err("root is red".to_string());
        }
        if self.color(NIL) != Color::Black || self.nodes[NIL].entry.is_some() {
            return Err("sentinel was modified".to_string());
        }
        if self.root != NIL && self.nodes[self.root].parent != NIL {
            return Err("root has a parent".to_string());
        }
        let mut count = 0;
        let height = self.verify_node(self.root, &mut count)?;
        if count != self.len {
            return Err(format!("len {} but {} reachable nodes", self.len, count));
        }
        Ok(height)
    }

    fn verify_node(&self, node: NodeId, count: &mut usize) -> Result<usize, String> {
        let Some((key, _)) = self.nodes[node].entry.as_ref() else {
            return Ok(1);
        };
        *count += 1;
        let (left, right) = (self.nodes[node].left, self.nodes[node].right);
        for child in [left, right] {
            if child != NIL && self.nodes[child].parent != node {
                return Err(format!("broken parent link at node {child}"));
            }
        }
        if self.color(node) == Color::Red
            && (self.color(left) == Color::Red || self.color(right) == Color::Red)
        {
            return Err(format!("red node {node} has a red child"));
        }
        if let Some((left_key, _)) = self.nodes[left].entry.as_ref() {
            if left_key > key {
                return Err(format!("left child of {node} is greater"));
            }
        }
        if let Some((right_key, _)) = self.nodes[right].entry.as_ref() {
            if right_key < key {
                return Err(format!("right child of {node} is smaller"));
            }
        }
        let left_height = self.verify_node(left, count)?;
        let right_height = self.verify_node(right, count)?;
        if left_height != right_height {
            return Err(format!("black heights differ under node {node}"));
        }
        Ok(left_height + usize::from(self.color(node) == Color::Black))
    }
}

impl<K: Ord> Default for OrderedIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, K> {
    index: &'a OrderedIndex<K>,
    stack: Vec<NodeId>,
}

impl<K> Iter<'_, K> {
    fn push_left(&mut self, mut node: NodeId) {
        while self.index.nodes[node].entry.is_some() {
            self.stack.push(node);
            node = self.index.nodes[node].left;
        }
    }
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = (&'a K, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let index = self.index;
        self.push_left(index.nodes[node].right);
        index.nodes[node]
            .entry
            .as_ref()
            .map(|(key, row_id)| (key, *row_id))
    }
}
