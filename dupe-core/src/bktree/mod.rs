//! BK-tree near-neighbor index, one independent instance per hash algorithm.
//! Grounded on the teacher's original `src/bktree.rs`: a node holds one
//! hash/payload and a `children: HashMap<Distance, _>` map; we keep that
//! exact shape but back it with a plain in-memory arena (`Vec<Node>`,
//! children addressed by index) instead of the teacher's persistent
//! heap-backed store — persistence is the catalog's job, out of scope here.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::model::FileId;

pub type Distance = u32;

/// One entry stored at a BK-tree node: the hash, the owning file, and an
/// insertion sequence number used to break distance ties in search results,
/// ordering equal-distance results by insertion time.
#[derive(Clone, Debug)]
pub struct Entry {
    pub file_id: FileId,
    pub hash: u64,
    pub width: u32,
    pub height: u32,
    pub computed_at: chrono::DateTime<chrono::Utc>,
    seq: u64,
}

struct Node {
    hash: u64,
    /// A BK-tree node starts from a single inserted hash; subsequent inserts
    /// at distance 0 from it are duplicate payloads on the very same node.
    entries: Vec<Entry>,
    children: HashMap<Distance, usize>,
}

/// A single metric tree over Hamming distance. Construct one per algorithm —
/// mixing dHash and pHash entries in the same tree would make distances
/// meaningless.
pub struct BKTree {
    nodes: Vec<Node>,
    root: Option<usize>,
    insertion_counter: u64,
    inserted_count: usize,
}

impl Default for BKTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BKTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            insertion_counter: 0,
            inserted_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of successful inserts.
    pub fn count(&self) -> usize {
        self.inserted_count
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.insertion_counter = 0;
        self.inserted_count = 0;
    }

    pub fn insert(&mut self, file_id: FileId, hash: u64, width: u32, height: u32) {
        let seq = self.insertion_counter;
        self.insertion_counter += 1;
        self.inserted_count += 1;

        let entry = Entry {
            file_id,
            hash,
            width,
            height,
            computed_at: chrono::Utc::now(),
            seq,
        };

        let Some(root) = self.root else {
            self.nodes.push(Node {
                hash,
                entries: vec![entry],
                children: HashMap::new(),
            });
            self.root = Some(0);
            return;
        };

        let mut cur = root;
        loop {
            let dist = crate::hashing::hamming_distance(self.nodes[cur].hash, hash);
            if dist == 0 {
                self.nodes[cur].entries.push(entry);
                return;
            }
            match self.nodes[cur].children.get(&dist) {
                Some(&child) => cur = child,
                None => {
                    let new_index = self.nodes.len();
                    self.nodes.push(Node {
                        hash,
                        entries: vec![entry],
                        children: HashMap::new(),
                    });
                    self.nodes[cur].children.insert(dist, new_index);
                    return;
                }
            }
        }
    }

    /// Range query: every entry within Hamming distance `within` of `query`,
    /// excluding any file id in `exclude_ids`. Results are sorted by distance
    /// ascending, then by insertion order.
    pub fn search(
        &self,
        query: u64,
        within: Distance,
        exclude_ids: &HashSet<FileId>,
    ) -> Vec<(Distance, &Entry)> {
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return out;
        };

        let mut stack = vec![root];
        let mut ordered: Vec<(Distance, u64, &Entry)> = Vec::new();

        while let Some(cur) = stack.pop() {
            let node = &self.nodes[cur];
            let dist = crate::hashing::hamming_distance(node.hash, query);

            if dist <= within {
                for entry in &node.entries {
                    if !exclude_ids.contains(&entry.file_id) {
                        ordered.push((dist, entry.seq, entry));
                    }
                }
            }

            // Triangle-inequality pruning: only children whose edge distance
            // lies within [dist - within, dist + within] can contain a match.
            let lo = dist.saturating_sub(within);
            let hi = dist.saturating_add(within);
            for (&edge, &child) in &node.children {
                if edge >= lo && edge <= hi {
                    stack.push(child);
                }
            }
        }

        ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        out.extend(ordered.into_iter().map(|(d, _, e)| (d, e)));
        out
    }

    pub fn for_each(&self, mut visit: impl FnMut(&Entry)) {
        for node in &self.nodes {
            for entry in &node.entries {
                visit(entry);
            }
        }
    }

    /// Remove every stored entry belonging to one of `file_ids`. Nodes are
    /// left in place (their structural role in the tree is independent of
    /// which payload they carry) with an empty `entries` list.
    pub fn remove_any_of(&mut self, file_ids: &HashSet<FileId>) {
        for node in &mut self.nodes {
            let before = node.entries.len();
            node.entries.retain(|e| !file_ids.contains(&e.file_id));
            self.inserted_count -= before - node.entries.len();
        }
    }
}

/// One [`BKTree`] per [`crate::model::HashAlgo`] — a distinct index per
/// algorithm is mandatory, since distances across algorithms aren't
/// comparable.
#[derive(Default)]
pub struct AlgoIndex {
    trees: HashMap<crate::model::HashAlgo, BKTree>,
}

impl AlgoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, algo: crate::model::HashAlgo, file_id: FileId, hash: &crate::model::ImageHash) {
        self.trees
            .entry(algo)
            .or_default()
            .insert(file_id, hash.value, hash.width, hash.height);
    }

    pub fn search(
        &self,
        algo: crate::model::HashAlgo,
        query: u64,
        within: Distance,
        exclude_ids: &HashSet<FileId>,
    ) -> Vec<(Distance, &Entry)> {
        match self.trees.get(&algo) {
            Some(tree) => tree.search(query, within, exclude_ids),
            None => Vec::new(),
        }
    }

    pub fn tree(&self, algo: crate::model::HashAlgo) -> Option<&BKTree> {
        self.trees.get(&algo)
    }

    pub fn remove_any_of(&mut self, file_ids: &HashSet<FileId>) {
        for tree in self.trees.values_mut() {
            tree.remove_any_of(file_ids);
        }
    }
}
