use rand::prelude::*;
use rand_distr::StandardNormal;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

use crate::config::Number;
use crate::vector_ops::inner_product_simd;

const SEED: u64 = 42;
const MIN_PROJECTIONS: usize = 2;
const MAX_PROJECTIONS: usize = 16;
const MIN_TABLES: usize = 1;
const MAX_TABLES: usize = 8;

/// Random-hyperplane LSH over document ids. Only produces candidates;
/// scoring stays with the caller.
#[derive(Debug, Clone)]
pub struct RandomProjectionIndex {
    random_vectors: Vec<Vec<Number>>,
    hash_tables: Vec<HashMap<u64, Vec<usize>>>,
    num_tables: usize,
    num_projections: usize,
}

impl RandomProjectionIndex {
    pub fn new(dim: usize, data_size: usize, max_projections: usize) -> Self {
        let (num_projections, num_tables) = Self::calculate_params(data_size, max_projections);
        trace!(
            "using {} projections and {} tables",
            num_projections,
            num_tables
        );

        let mut rng = StdRng::seed_from_u64(SEED);
        let random_vectors: Vec<Vec<Number>> = (0..num_tables * num_projections)
            .map(|_| {
                (0..dim)
                    .map(|_| rng.sample::<Number, _>(StandardNormal))
                    .collect()
            })
            .collect();

        RandomProjectionIndex {
            random_vectors,
            hash_tables: vec![HashMap::new(); num_tables],
            num_tables,
            num_projections,
        }
    }

    fn calculate_params(data_size: usize, max_projections: usize) -> (usize, usize) {
        let log_size = (data_size.max(1) as f64).log2() as usize;
        let upper = max_projections.clamp(MIN_PROJECTIONS, MAX_PROJECTIONS);
        let num_projections = (log_size + 2).clamp(MIN_PROJECTIONS, upper);
        let num_tables = (log_size / 2 + 2).clamp(MIN_TABLES, MAX_TABLES);
        (num_projections, num_tables)
    }

    fn hash_vector(&self, vector: &[Number], table_index: usize) -> u64 {
        let start = table_index * self.num_projections;
        let end = start + self.num_projections;

        self.random_vectors[start..end]
            .iter()
            .map(|rv| inner_product_simd(rv, vector))
            .enumerate()
            .fold(0u64, |acc, (i, proj)| {
                if proj >= 0.0 {
                    acc | (1 << i)
                } else {
                    acc
                }
            })
    }

    pub fn add(&mut self, vector: &[Number], id: usize) {
        for i in 0..self.num_tables {
            let hash = self.hash_vector(vector, i);
            self.hash_tables[i].entry(hash).or_default().push(id);
        }
    }

    /// Ids sharing a bucket with `query`, or one bit away from it, in any table.
    pub fn candidates(&self, query: &[Number]) -> BTreeSet<usize> {
        let mut candidates = BTreeSet::new();

        for i in 0..self.num_tables {
            let query_hash = self.hash_vector(query, i);

            if let Some(bucket) = self.hash_tables[i].get(&query_hash) {
                candidates.extend(bucket);
            }

            // multi-probe
            for j in 0..self.num_projections {
                let neighbor_hash = query_hash ^ (1 << j);
                if let Some(bucket) = self.hash_tables[i].get(&neighbor_hash) {
                    candidates.extend(bucket);
                }
            }
        }

        trace!("ann probe produced {} candidates", candidates.len());
        candidates
    }

    pub fn len(&self) -> usize {
        self.hash_tables
            .first()
            .map(|table| table.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}
