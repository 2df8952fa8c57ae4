use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use crate::models::RankedCandidate;

/// Decodes a raw embedding blob into little-endian f32 components
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// In-memory index over (film id, unit-normalized vector) pairs
///
/// Rebuilt per request from the request's own filtered candidate set; the
/// catalog is small enough that exact brute-force scoring beats maintaining
/// a shared long-lived index.
pub struct VectorIndex {
    dim: usize,
    film_ids: Vec<i64>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            film_ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.film_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.film_ids.is_empty()
    }

    /// Replaces the index content with the given (film id, raw vector) pairs
    ///
    /// Each vector is L2-normalized on load so scoring reduces to a dot
    /// product. A zero vector stays all-zero and scores 0 against any query.
    /// Vectors of the wrong dimensionality are skipped with a warning.
    pub fn load(&mut self, entries: Vec<(i64, Vec<f32>)>) {
        self.film_ids.clear();
        self.vectors.clear();

        for (film_id, mut vector) in entries {
            if vector.len() != self.dim {
                tracing::warn!(
                    film_id,
                    got = vector.len(),
                    expected = self.dim,
                    "Skipping embedding with wrong dimensionality"
                );
                continue;
            }
            normalize(&mut vector);
            self.film_ids.push(film_id);
            self.vectors.push(vector);
        }

        tracing::debug!(count = self.film_ids.len(), "Loaded film embeddings");
    }

    /// Returns the top-k films by cosine similarity to the query vector
    ///
    /// The query is normalized first (a zero query yields no results). When
    /// `allowed_ids` is given, only those films are scored. Scores are
    /// clamped to [0, 1]; opposite-direction signal has no meaning here.
    /// Results are in deterministic descending order, ties broken by
    /// original pool order.
    pub fn query(
        &self,
        query: &[f32],
        top_k: usize,
        allowed_ids: Option<&HashSet<i64>>,
    ) -> Vec<RankedCandidate> {
        if self.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut user = query.to_vec();
        if !normalize(&mut user) {
            return Vec::new();
        }

        let start = Instant::now();

        // Restrict the pool before scoring
        let pool: Vec<usize> = match allowed_ids {
            Some(allowed) => (0..self.film_ids.len())
                .filter(|&i| allowed.contains(&self.film_ids[i]))
                .collect(),
            None => (0..self.film_ids.len()).collect(),
        };
        if pool.is_empty() {
            return Vec::new();
        }

        let scores: Vec<f32> = pool
            .iter()
            .map(|&i| dot(&self.vectors[i], &user).clamp(0.0, 1.0))
            .collect();

        // Pool positions, partially selected when the pool exceeds top_k so
        // a full O(n log n) sort is only paid on the k winners.
        let mut order: Vec<usize> = (0..pool.len()).collect();
        if order.len() > top_k {
            order.select_nth_unstable_by(top_k, |&a, &b| cmp_desc(scores[a], scores[b]));
            order.truncate(top_k);
        }
        order.sort_by(|&a, &b| cmp_desc(scores[a], scores[b]).then(a.cmp(&b)));

        let elapsed = start.elapsed().as_millis();
        if elapsed > 100 {
            tracing::warn!(elapsed_ms = elapsed, pool = pool.len(), "Slow similarity scan");
        }

        order
            .into_iter()
            .map(|i| RankedCandidate {
                film_id: self.film_ids[pool[i]],
                score: scores[i],
            })
            .collect()
    }
}

fn cmp_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Divides the vector by its Euclidean norm in place
///
/// Returns false for the zero vector, which is left untouched.
fn normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return false;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}
