//! Vector helpers shared by the index, the ranking engine and the concept tree

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity, tolerant of zero vectors (a zero norm counts as 1.0)
pub fn cosine(u: &[f32], v: &[f32]) -> f32 {
    let dot: f32 = u.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
    let norm_u = nonzero(u.iter().map(|x| x * x).sum::<f32>().sqrt());
    let norm_v = nonzero(v.iter().map(|x| x * x).sum::<f32>().sqrt());
    dot / (norm_u * norm_v)
}

fn nonzero(norm: f32) -> f32 {
    if norm == 0.0 {
        1.0
    } else {
        norm
    }
}

/// Mean of `vectors`, re-normalized. Empty input yields an empty vector.
pub fn centroid(vectors: &[&[f32]]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let mut mean = vec![0.0f32; first.len()];
    for vector in vectors {
        for (acc, x) in mean.iter_mut().zip(vector.iter()) {
            *acc += x;
        }
    }

    let n = vectors.len() as f32;
    mean.iter_mut().for_each(|x| *x /= n);
    l2_normalize(&mut mean);
    mean
}

/// True when every component is a finite number
pub fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}
