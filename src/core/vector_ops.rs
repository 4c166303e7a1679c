use sha2::{Digest, Sha256};

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let mag = magnitude(v);
    if mag == 0.0 || !mag.is_finite() {
        return;
    }
    for x in v.iter_mut() {
        *x /= mag;
    }
}

/// Normalizes every `dim`-wide row of a flat row-major buffer.
pub fn normalize_rows(data: &mut [f32], dim: usize) {
    if dim == 0 {
        return;
    }
    for row in data.chunks_mut(dim) {
        l2_normalize(row);
    }
}

/// True for the "no face" sentinel.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

pub fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Maps a distance onto a "higher is better" score in (0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Truncates or zero-pads `v` to exactly `dim` components.
pub fn conform_dimension(mut v: Vec<f32>, dim: usize) -> Vec<f32> {
    v.resize(dim, 0.0);
    v
}

/// Hex-encoded sha-256 of the raw bytes, used for content dedup.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
