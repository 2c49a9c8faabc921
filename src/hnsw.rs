//! In-memory hierarchical navigable small-world graph for approximate
//! nearest-neighbor search over fixed-dimension vectors.
//!
//! No HNSW implementation exists anywhere in the corpus this crate
//! was grown from, so this module is designed directly from the
//! algorithm description and glossary rather than adapted from an
//! existing file. It follows the arena + index pattern named
//! explicitly for this structure: nodes live in one contiguous
//! `Vec<HnswNode>`, referenced by `NodeId(u32)`, so neighbor
//! back-edges are plain indices rather than `Rc<RefCell<_>>` cycles.

use std::collections::{BTreeSet, BinaryHeap};
use std::cmp::Ordering;
use std::sync::RwLock;

use rand::Rng as _;
use thiserror::Error;

use crate::config::HnswParams;
use crate::vector::{distance, VectorMetric};

#[derive(Error, Debug)]
pub enum HnswError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, HnswError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

struct HnswNode {
    key: Vec<u8>,
    vector: Vec<f32>,
    layer: usize,
    /// `neighbors[l]` holds this node's edges at layer `l`, for `l` in `0..=layer`.
    neighbors: Vec<Vec<NodeId>>,
    deleted: bool,
}

struct Candidate {
    dist: f32,
    id: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(Ordering::Equal)
    }
}

/// Min-heap wrapper (closest first) built from `Candidate`'s natural,
/// farthest-first ordering.
struct MinCandidate(Candidate);
impl PartialEq for MinCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.0.dist == other.0.dist
    }
}
impl Eq for MinCandidate {}
impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

pub struct HnswIndex {
    dimension: usize,
    metric: VectorMetric,
    params: HnswParams,
    inner: RwLock<Inner>,
}

struct Inner {
    nodes: Vec<HnswNode>,
    key_to_id: std::collections::HashMap<Vec<u8>, NodeId>,
    entry_point: Option<NodeId>,
    max_layer: usize,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: VectorMetric, params: HnswParams) -> Self {
        HnswIndex {
            dimension,
            metric,
            params,
            inner: RwLock::new(Inner {
                nodes: Vec::new(),
                key_to_id: std::collections::HashMap::new(),
                entry_point: None,
                max_layer: 0,
            }),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(HnswError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn sample_layer(&self) -> usize {
        let level_multiplier = 1.0 / (self.params.m as f64).ln().max(1e-9);
        let u: f64 = rand::rng().random_range(1e-12..1.0);
        let layer = (-u.ln() * level_multiplier).floor() as usize;
        layer.min(self.params.max_layers.saturating_sub(1))
    }

    /// Inserts `key` with `vector`. Fails without modifying the index
    /// on a dimension mismatch or a duplicate key.
    pub fn insert(&self, key: Vec<u8>, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        let mut inner = self.inner.write().expect("hnsw lock poisoned");
        if inner.key_to_id.contains_key(&key) {
            return Err(HnswError::AlreadyExists(String::from_utf8_lossy(&key).into_owned()));
        }

        let layer = self.sample_layer();
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(HnswNode {
            key: key.clone(),
            vector: vector.clone(),
            layer,
            neighbors: vec![Vec::new(); layer + 1],
            deleted: false,
        });
        inner.key_to_id.insert(key, id);

        let Some(entry) = inner.entry_point else {
            inner.entry_point = Some(id);
            inner.max_layer = layer;
            return Ok(());
        };

        let mut current = entry;
        // Descend from the top layer down to `layer + 1`, keeping only
        // the single nearest neighbor as the next layer's entry point.
        for l in (layer + 1..=inner.max_layer).rev() {
            current = self.greedy_closest(&inner, &vector, current, l);
        }

        for l in (0..=layer.min(inner.max_layer)).rev() {
            let ef = self.params.ef_construction;
            let candidates = self.search_layer_locked(&inner, &vector, current, ef, l);
            let m = if l == 0 { self.params.m * 2 } else { self.params.m };
            let selected: Vec<NodeId> = candidates.iter().take(m).map(|c| c.id).collect();

            inner.nodes[id.0 as usize].neighbors[l] = selected.clone();
            for &neighbor in &selected {
                let neighbor_layer_vec = &mut inner.nodes[neighbor.0 as usize].neighbors;
                if neighbor_layer_vec.len() > l {
                    neighbor_layer_vec[l].push(id);
                    if neighbor_layer_vec[l].len() > m {
                        // Trim back to the `m` nearest by recomputing
                        // distances from that neighbor's own vector.
                        let origin = inner.nodes[neighbor.0 as usize].vector.clone();
                        let metric = self.metric;
                        inner.nodes[neighbor.0 as usize].neighbors[l].sort_by(|a, b| {
                            let da = distance(metric, &origin, &inner.nodes[a.0 as usize].vector);
                            let db = distance(metric, &origin, &inner.nodes[b.0 as usize].vector);
                            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
                        });
                        inner.nodes[neighbor.0 as usize].neighbors[l].truncate(m);
                    }
                }
            }
            if let Some(best) = candidates.first() {
                current = best.id;
            }
        }

        if layer > inner.max_layer {
            inner.max_layer = layer;
            inner.entry_point = Some(id);
        }
        Ok(())
    }

    fn greedy_closest(&self, inner: &Inner, query: &[f32], start: NodeId, layer: usize) -> NodeId {
        let mut current = start;
        let mut current_dist = distance(self.metric, query, &inner.nodes[current.0 as usize].vector);
        loop {
            let mut improved = false;
            if inner.nodes[current.0 as usize].neighbors.len() > layer {
                for &neighbor in inner.nodes[current.0 as usize].neighbors[layer].clone().iter() {
                    let d = distance(self.metric, query, &inner.nodes[neighbor.0 as usize].vector);
                    if d < current_dist {
                        current = neighbor;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }
        current
    }

    /// Standard HNSW greedy expansion with a min-heap of candidates to
    /// visit and a bounded result set of size <= `ef`. Terminates once
    /// the nearest unvisited candidate is farther than the worst
    /// currently-kept result.
    fn search_layer_locked(
        &self,
        inner: &Inner,
        query: &[f32],
        entry: NodeId,
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited = BTreeSet::new();
        visited.insert(entry.0);
        let entry_dist = distance(self.metric, query, &inner.nodes[entry.0 as usize].vector);

        let mut to_visit = BinaryHeap::new();
        to_visit.push(MinCandidate(Candidate { dist: entry_dist, id: entry }));
        let mut results = BinaryHeap::new();
        results.push(Candidate { dist: entry_dist, id: entry });

        while let Some(MinCandidate(current)) = to_visit.pop() {
            let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && results.len() >= ef {
                break;
            }
            let node = &inner.nodes[current.id.0 as usize];
            if node.neighbors.len() <= layer {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor.0) {
                    continue;
                }
                let d = distance(self.metric, query, &inner.nodes[neighbor.0 as usize].vector);
                let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < worst {
                    to_visit.push(MinCandidate(Candidate { dist: d, id: neighbor }));
                    results.push(Candidate { dist: d, id: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap_or(Ordering::Equal));
        out
    }

    /// Returns up to `k` nearest neighbors to `query`, filtering
    /// deleted nodes and sorting ascending by distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Vec<u8>, f32)>> {
        self.check_dimension(query)?;
        let inner = self.inner.read().expect("hnsw lock poisoned");
        let Some(entry) = inner.entry_point else {
            return Ok(Vec::new());
        };

        let mut current = entry;
        for l in (1..=inner.max_layer).rev() {
            current = self.greedy_closest(&inner, query, current, l);
        }
        let ef = self.params.ef_search.max(k);
        let mut candidates = self.search_layer_locked(&inner, query, current, ef, 0);
        candidates.retain(|c| !inner.nodes[c.id.0 as usize].deleted);
        candidates.truncate(k);
        Ok(candidates
            .into_iter()
            .map(|c| (inner.nodes[c.id.0 as usize].key.clone(), c.dist))
            .collect())
    }

    /// Marks `key` deleted and removes it from the key index. Outgoing
    /// edges remain in the graph until a future compaction; searches
    /// filter deleted nodes out of the final result set.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().expect("hnsw lock poisoned");
        let id = inner
            .key_to_id
            .remove(key)
            .ok_or_else(|| HnswError::NotFound(String::from_utf8_lossy(key).into_owned()))?;
        inner.nodes[id.0 as usize].deleted = true;
        Ok(())
    }

    /// Looks up `key`'s stored vector. Returns `None` for an absent or
    /// deleted key.
    pub fn get(&self, key: &[u8]) -> Option<Vec<f32>> {
        let inner = self.inner.read().expect("hnsw lock poisoned");
        let id = *inner.key_to_id.get(key)?;
        let node = &inner.nodes[id.0 as usize];
        if node.deleted {
            return None;
        }
        Some(node.vector.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("hnsw lock poisoned").key_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> HnswIndex {
        HnswIndex::new(4, VectorMetric::Euclidean, HnswParams::default())
    }

    #[test]
    fn insert_then_search_finds_exact_match() {
        let idx = index();
        idx.insert(b"a".to_vec(), vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        idx.insert(b"b".to_vec(), vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, b"a");
        assert!(results[0].1 < 1e-4);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let idx = index();
        idx.insert(b"a".to_vec(), vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(idx.insert(b"a".to_vec(), vec![0.0, 1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected_without_mutation() {
        let idx = index();
        assert!(idx.insert(b"a".to_vec(), vec![1.0, 0.0]).is_err());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn removed_key_is_filtered_from_search() {
        let idx = index();
        idx.insert(b"a".to_vec(), vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        idx.insert(b"b".to_vec(), vec![0.9, 0.1, 0.0, 0.0]).unwrap();
        idx.remove(b"a").unwrap();
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert!(results.iter().all(|(k, _)| k != b"a"));
    }

    #[test]
    fn search_on_empty_index_returns_empty() {
        let idx = index();
        assert!(idx.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn near_duplicate_search_over_many_vectors() {
        let idx = HnswIndex::new(8, VectorMetric::Euclidean, HnswParams::default());
        let mut rng = rand::rng();
        let mut target = None;
        for i in 0..200u32 {
            let v: Vec<f32> = (0..8).map(|_| rng.random_range(-1.0..1.0)).collect();
            if i == 100 {
                target = Some(v.clone());
            }
            idx.insert(format!("k{i}").into_bytes(), v).unwrap();
        }
        let results = idx.search(&target.unwrap(), 5).unwrap();
        assert_eq!(results[0].0, b"k100".to_vec());
        assert!(results[0].1 < 1e-4);
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1 + 1e-6);
        }
    }
}
