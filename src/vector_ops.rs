use crate::config::{Number, EPSILON};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use wide::f32x8;

/// How two embeddings are compared. Higher scores are more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Raw dot product over the vectors as the embedder produced them.
    InnerProduct,
    /// Dot product over unit-length copies.
    Cosine,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner_product" | "ip" => Ok(Metric::InnerProduct),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::InnerProduct => "inner_product",
            Metric::Cosine => "cosine",
        }
    }

    /// Brings a vector into the space the metric scores in.
    pub fn prepare(&self, vector: &mut [Number]) {
        if *self == Metric::Cosine {
            normalize_vector(vector);
        }
    }
}

/// Dot product of two equal-length vectors using SIMD lanes of 8.
pub fn inner_product_simd(a: &[Number], b: &[Number]) -> Number {
    debug_assert_eq!(a.len(), b.len());
    let len = a.len().min(b.len());
    let simd_len = len - (len % 8);

    let mut acc = f32x8::splat(0.0);
    for i in (0..simd_len).step_by(8) {
        let va = f32x8::new([
            a[i],
            a[i + 1],
            a[i + 2],
            a[i + 3],
            a[i + 4],
            a[i + 5],
            a[i + 6],
            a[i + 7],
        ]);
        let vb = f32x8::new([
            b[i],
            b[i + 1],
            b[i + 2],
            b[i + 3],
            b[i + 4],
            b[i + 5],
            b[i + 6],
            b[i + 7],
        ]);
        acc += va * vb;
    }

    let mut dot = acc.reduce_add();
    // Handle remaining elements
    for i in simd_len..len {
        dot += a[i] * b[i];
    }
    dot
}

pub fn normalize_vector(vector: &mut [Number]) {
    let magnitude: Number = vector.iter().map(|&x| x * x).sum::<Number>().sqrt();
    if magnitude > EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn inner_product_matches_naive_with_remainder() {
        let a: Vec<f32> = (0..13).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..13).map(|i| 1.0 - i as f32 * 0.25).collect();
        let got = inner_product_simd(&a, &b);
        assert!((got - naive_dot(&a, &b)).abs() < 1e-4);
    }

    #[test]
    fn inner_product_is_not_normalized() {
        let a = [2.0f32; 8];
        let b = [3.0f32; 8];
        assert!((inner_product_simd(&a, &b) - 48.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut zero = vec![0.0f32; 4];
        normalize_vector(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);

        let mut v = vec![3.0f32, 4.0];
        normalize_vector(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn metric_parses_config_names() {
        assert_eq!("inner_product".parse::<Metric>(), Ok(Metric::InnerProduct));
        assert_eq!("cosine".parse::<Metric>(), Ok(Metric::Cosine));
        assert!("euclid".parse::<Metric>().is_err());
    }
}
