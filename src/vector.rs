//! Fixed-dimension float vectors and the distance metrics the HNSW
//! index searches under.

use crate::error::{CoreError, CoreResult};

/// A fixed-dimension sequence of single-precision floats. Dimension
/// is a configuration invariant set at open; every vector handed to
/// the index must match it.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector(Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        Vector(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// `u32 dimension || dimension * 4 bytes LE floats`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.0.len() * 4);
        buf.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        for f in &self.0 {
            buf.extend_from_slice(&f.to_le_bytes());
        }
        buf
    }

    pub fn deserialize(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < 4 {
            return Err(CoreError::corruption("vector buffer shorter than header"));
        }
        let dim = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if buf.len() != 4 + dim * 4 {
            return Err(CoreError::corruption("vector buffer length mismatch"));
        }
        let values = buf[4..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(Vector(values))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
    Cosine,
    Euclidean,
    DotProduct,
    Manhattan,
}

/// Computes the distance between `a` and `b` under `metric`. Lower is
/// always "closer", including for `DotProduct` (the metric is
/// negated so the ordering matches the other three).
pub fn distance(metric: VectorMetric, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match metric {
        VectorMetric::Cosine => cosine_distance(a, b),
        VectorMetric::Euclidean => euclidean_distance(a, b),
        VectorMetric::DotProduct => -dot(a, b),
        VectorMetric::Manhattan => manhattan_distance(a, b),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// `1 - cos(a,b)`. A zero vector has undefined cosine similarity; per
/// the glossary this yields distance 1 (treated as orthogonal) rather
/// than NaN or a panic.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (na * nb)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}
