use crate::error::{Result, VectorStoreError};
use codechat_chunker::ChunkId;
use ndarray::{Array1, Array2, ArrayView1};
use std::collections::HashMap;

/// Exact cosine index: one normalized row per entry, scanned with a single
/// matrix-vector product. Freed rows are zeroed and recycled.
pub struct FlatIndex {
    dimension: usize,
    rows: Array2<f32>,
    owners: Vec<Option<ChunkId>>,
    slots: HashMap<ChunkId, usize>,
    free: Vec<usize>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: Array2::zeros((0, dimension)),
            owners: Vec::new(),
            slots: HashMap::new(),
            free: Vec::new(),
        }
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or overwrite the vector for `id`
    pub fn insert(&mut self, id: &ChunkId, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector.len())?;
        let mut normalized = vector.to_vec();
        normalize(&mut normalized);
        self.insert_normalized(id, &normalized)
    }

    pub(crate) fn insert_normalized(&mut self, id: &ChunkId, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector.len())?;
        let view = ArrayView1::from(vector);

        if let Some(&slot) = self.slots.get(id) {
            self.rows.row_mut(slot).assign(&view);
            return Ok(());
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.rows.row_mut(slot).assign(&view);
                self.owners[slot] = Some(id.clone());
                slot
            }
            None => {
                self.rows
                    .push_row(view)
                    .map_err(|e| VectorStoreError::Other(format!("index growth failed: {e}")))?;
                self.owners.push(Some(id.clone()));
                self.owners.len() - 1
            }
        };
        self.slots.insert(id.clone(), slot);
        Ok(())
    }

    /// Remove vector; returns whether it was present
    pub fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        self.owners[slot] = None;
        self.rows.row_mut(slot).fill(0.0);
        self.free.push(slot);
        true
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.slots.contains_key(id)
    }

    /// Normalized vector stored for `id`
    pub fn vector(&self, id: &ChunkId) -> Option<Vec<f32>> {
        self.slots.get(id).map(|&slot| self.rows.row(slot).to_vec())
    }

    /// Top `k` entries accepted by `accept`, by descending similarity.
    /// Equal scores are ordered by id so rankings are reproducible.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        accept: impl Fn(&ChunkId) -> bool,
    ) -> Result<Vec<(ChunkId, f32)>> {
        self.check_dimension(query.len())?;
        if k == 0 || self.slots.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);
        let scores: Array1<f32> = self.rows.dot(&Array1::from(q));

        let mut ranked: Vec<(ChunkId, f32)> = self
            .owners
            .iter()
            .zip(scores.iter())
            .filter_map(|(owner, score)| owner.as_ref().map(|id| (id, *score)))
            .filter(|(id, _)| accept(id))
            .map(|(id, score)| (id.clone(), score))
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        Ok(ranked)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}
