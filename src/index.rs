use rayon::prelude::*;
use std::cmp::Ordering;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

use crate::ann::RandomProjectionIndex;
use crate::config::Number;
use crate::error::{RagError, Result};
use crate::vector_ops::{inner_product_simd, Metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Exact,
    /// LSH candidates re-scored exactly; exact scan when the probe comes up short.
    Ann,
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(SearchMethod::Exact),
            "ann" => Ok(SearchMethod::Ann),
            other => Err(format!("unknown search method '{}'", other)),
        }
    }
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Exact => "exact",
            SearchMethod::Ann => "ann",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: usize,
    pub score: Number,
}

/// Flat, row-major store of one embedding per document.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: Option<usize>,
    data: Vec<Number>,
    count: usize,
    metric: Metric,
    method: SearchMethod,
    ann: Option<RandomProjectionIndex>,
    ann_num_projections: usize,
}

impl VectorIndex {
    /// Builds an exact inner-product index. An empty sequence yields an
    /// empty index that rejects searches.
    pub fn build(embeddings: Vec<Vec<Number>>) -> Result<Self> {
        Self::build_with(embeddings, Metric::InnerProduct, SearchMethod::Exact, 10)
    }

    pub fn build_with(
        embeddings: Vec<Vec<Number>>,
        metric: Metric,
        method: SearchMethod,
        ann_num_projections: usize,
    ) -> Result<Self> {
        Self::assemble(embeddings, metric, method, ann_num_projections, true)
    }

    /// Rebuilds from vectors previously read back through [`VectorIndex::vectors`].
    pub(crate) fn from_stored(
        rows: Vec<Vec<Number>>,
        metric: Metric,
        method: SearchMethod,
        ann_num_projections: usize,
    ) -> Result<Self> {
        Self::assemble(rows, metric, method, ann_num_projections, false)
    }

    fn assemble(
        embeddings: Vec<Vec<Number>>,
        metric: Metric,
        method: SearchMethod,
        ann_num_projections: usize,
        prepare: bool,
    ) -> Result<Self> {
        let dimensions = embeddings.first().map(Vec::len);
        if let Some(expected) = dimensions {
            if expected == 0 {
                return Err(RagError::InvalidArgument(
                    "embeddings must have at least one dimension".into(),
                ));
            }
            if let Some(bad) = embeddings.iter().find(|v| v.len() != expected) {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        let count = embeddings.len();
        let mut data = Vec::with_capacity(count * dimensions.unwrap_or(0));
        for mut vector in embeddings {
            if prepare {
                metric.prepare(&mut vector);
            }
            data.extend_from_slice(&vector);
        }

        let mut index = Self {
            dimensions,
            data,
            count,
            metric,
            method,
            ann: None,
            ann_num_projections,
        };
        if method == SearchMethod::Ann {
            index.rebuild_ann();
        }
        debug!(
            "built {} index over {} vectors ({} dims, {})",
            method.as_str(),
            count,
            dimensions.unwrap_or(0),
            metric.as_str()
        );
        Ok(index)
    }

    fn rebuild_ann(&mut self) {
        let Some(dim) = self.dimensions else {
            self.ann = None;
            return;
        };
        let mut ann = RandomProjectionIndex::new(dim, self.count, self.ann_num_projections);
        for id in 0..self.count {
            ann.add(self.row(id), id);
        }
        self.ann = Some(ann);
    }

    /// Appends one vector and returns its id.
    pub fn insert(&mut self, mut vector: Vec<Number>) -> Result<usize> {
        match self.dimensions {
            Some(expected) if expected != vector.len() => {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                })
            }
            Some(_) => {}
            None if vector.is_empty() => {
                return Err(RagError::InvalidArgument(
                    "embeddings must have at least one dimension".into(),
                ))
            }
            None => self.dimensions = Some(vector.len()),
        }

        self.metric.prepare(&mut vector);
        self.data.extend_from_slice(&vector);
        let id = self.count;
        self.count += 1;

        if self.method == SearchMethod::Ann {
            match &mut self.ann {
                Some(ann) => ann.add(&vector, id),
                None => self.rebuild_ann(),
            }
        }
        Ok(id)
    }

    /// Top `k` ids by score, highest first; equal scores keep the lower id first.
    pub fn search(&self, query_vector: &[Number], k: usize) -> Result<Vec<ScoredId>> {
        let dim = match self.dimensions {
            Some(dim) if self.count > 0 => dim,
            _ => return Err(RagError::EmptyIndex),
        };
        if query_vector.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be at least 1".into()));
        }

        let start = Instant::now();
        let mut query = query_vector.to_vec();
        self.metric.prepare(&mut query);

        let mut results = match &self.ann {
            Some(ann) => {
                let candidates = ann.candidates(&query);
                if candidates.len() >= k.min(self.count) {
                    candidates
                        .into_iter()
                        .map(|id| self.score(&query, id))
                        .collect()
                } else {
                    debug!("ann probe found fewer than {} candidates, scanning", k);
                    self.exact_scan(&query)
                }
            }
            None => self.exact_scan(&query),
        };

        sort_and_limit_results(&mut results, k);
        debug!(
            "search over {} vectors returned {} results in {:?}",
            self.count,
            results.len(),
            start.elapsed()
        );
        Ok(results)
    }

    fn exact_scan(&self, query: &[Number]) -> Vec<ScoredId> {
        (0..self.count)
            .into_par_iter()
            .map(|id| self.score(query, id))
            .collect()
    }

    fn score(&self, query: &[Number], id: usize) -> ScoredId {
        ScoredId {
            id,
            score: inner_product_simd(query, self.row(id)),
        }
    }

    fn row(&self, id: usize) -> &[Number] {
        let dim = self.dimensions.unwrap_or(0);
        &self.data[id * dim..(id + 1) * dim]
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[Number]> + '_ {
        (0..self.count).map(move |id| self.row(id))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn search_method(&self) -> SearchMethod {
        self.method
    }
}

/// Highest score first, equal scores by ascending id. NaN scores rank after every number.
fn rank(a: &ScoredId, b: &ScoredId) -> Ordering {
    let by_score = match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
    };
    by_score.then(a.id.cmp(&b.id))
}

fn sort_and_limit_results(results: &mut Vec<ScoredId>, limit: usize) {
    results.sort_by(rank);
    results.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(results: &[ScoredId]) -> Vec<usize> {
        results.iter().map(|r| r.id).collect()
    }

    #[test]
    fn empty_build_rejects_search() {
        let index = VectorIndex::build(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), None);
        assert!(matches!(
            index.search(&[1.0; 8], 1),
            Err(RagError::EmptyIndex)
        ));
    }

    #[test]
    fn inconsistent_lengths_fail_the_build() {
        let err = VectorIndex::build(vec![vec![1.0; 8], vec![1.0; 7]]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn query_length_must_match() {
        let index = VectorIndex::build(vec![vec![0.5; 8], vec![0.25; 8]]).unwrap();
        let err = index.search(&[1.0; 10], 1).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 8,
                actual: 10
            }
        ));
    }

    #[test]
    fn results_are_sorted_by_raw_inner_product() {
        let index = VectorIndex::build(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 3.0, 0.0],
            vec![0.0, 1.0, 1.0],
        ])
        .unwrap();
        let results = index.search(&[0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&results), vec![1, 2, 0]);
        assert!((results[0].score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn nan_scores_rank_last_without_panicking() {
        let rows: Vec<Vec<f32>> = (0..40)
            .map(|i| if i % 3 == 0 { vec![f32::NAN] } else { vec![i as f32] })
            .collect();
        let index = VectorIndex::build(rows).unwrap();
        assert_eq!(index.dimensions(), Some(1));

        let results = index.search(&[1.0], 40).unwrap();
        let mut expected: Vec<usize> = (0..40).rev().filter(|i| i % 3 != 0).collect();
        expected.extend((0..40).filter(|i| i % 3 == 0));
        assert_eq!(ids(&results), expected);
        assert!(results[..26].iter().all(|r| !r.score.is_nan()));
        assert!(results[26..].iter().all(|r| r.score.is_nan()));

        let top = index.search(&[1.0], 2).unwrap();
        assert_eq!(ids(&top), vec![38, 37]);
    }

    #[test]
    fn ties_go_to_the_lower_id() {
        let index = VectorIndex::build(vec![
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![1.0, 1.0],
        ])
        .unwrap();
        let results = index.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(ids(&results), vec![1, 2]);
        assert_eq!(results[0].score, results[1].score);
    }

    #[test]
    fn k_larger_than_count_returns_everything() {
        let index = VectorIndex::build(vec![vec![1.0], vec![2.0]]).unwrap();
        assert_eq!(index.search(&[1.0], 10).unwrap().len(), 2);
        assert!(matches!(
            index.search(&[1.0], 0),
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let vectors = vec![vec![10.0, 0.0], vec![0.6, 0.8]];
        let ip = VectorIndex::build(vectors.clone()).unwrap();
        assert_eq!(ids(&ip.search(&[0.6, 0.8], 1).unwrap()), vec![0]);

        let cos =
            VectorIndex::build_with(vectors, Metric::Cosine, SearchMethod::Exact, 10).unwrap();
        assert_eq!(ids(&cos.search(&[0.6, 0.8], 1).unwrap()), vec![1]);
    }

    #[test]
    fn insert_after_build_is_searchable() {
        let mut index = VectorIndex::build(Vec::new()).unwrap();
        assert_eq!(index.insert(vec![1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.insert(vec![0.0, 1.0]).unwrap(), 1);
        assert!(matches!(
            index.insert(vec![1.0]),
            Err(RagError::DimensionMismatch { .. })
        ));
        assert_eq!(ids(&index.search(&[0.0, 2.0], 1).unwrap()), vec![1]);
    }

    #[test]
    fn ann_finds_an_exact_copy() {
        let dim = 16;
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|seed| {
                (0..dim)
                    .map(|i| (((i + 1) * (seed + 3)) % 17) as f32 - 8.0)
                    .collect()
            })
            .collect();
        let index = VectorIndex::build_with(
            vectors.clone(),
            Metric::Cosine,
            SearchMethod::Ann,
            10,
        )
        .unwrap();
        assert_eq!(index.search_method(), SearchMethod::Ann);
        for (id, v) in vectors.iter().enumerate().take(5) {
            let top = index.search(v, 1).unwrap();
            assert!((top[0].score - 1.0).abs() < 1e-4, "query {}", id);
        }
    }
}
