/// Compute the magnitude (L2 norm) of a vector.
pub fn magnitude(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Cosine similarity using pre-computed magnitudes.
/// Returns 0.0 for zero-magnitude vectors or dimension mismatches; the
/// result is clamped to [-1.0, 1.0].
pub fn cosine_with_magnitude(a: &[f32], b: &[f32], mag_a: f64, mag_b: f64) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let denom = mag_a * mag_b;
    if denom == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    let result = dot / denom;
    if !result.is_finite() {
        return 0.0;
    }
    result.clamp(-1.0, 1.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine_with_magnitude(a, b, magnitude(a), magnitude(b))
}

/// Row-major embedding table with cached row norms.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    data: Vec<f32>,
    dim: usize,
    norms: Vec<f64>,
}

impl EmbeddingTable {
    pub fn new(data: Vec<f32>, dim: usize) -> Self {
        let norms = data.chunks(dim.max(1)).map(magnitude).collect();
        Self { data, dim, norms }
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Cosine similarity of row `query` against every row, in row order.
    pub fn similarities(&self, query: usize) -> Vec<f32> {
        let q = self.row(query);
        let qn = self.norms[query];
        (0..self.len())
            .map(|i| cosine_with_magnitude(q, self.row(i), qn, self.norms[i]) as f32)
            .collect()
    }
}
