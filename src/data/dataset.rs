//! Binned dataset construction and access.
//!
//! A [`Dataset`] owns the binned feature columns, the row count and the
//! [`Metadata`]. Construction fits one [`BinMapper`] per feature from a
//! seeded row sample, bins every value, and then picks dense or
//! ordered-sparse storage per feature. Validation datasets are built against
//! the training dataset so they reuse its mappers bin-for-bin.

use std::collections::HashSet;

use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::Config;
use crate::data::bin::{DenseBin, SparseBin, SparseBinIterator};
use crate::data::bin_mapper::BinMapper;
use crate::data::metadata::Metadata;
use crate::error::{Error, Result};

// =============================================================================
// Storage
// =============================================================================

/// Per-feature column storage.
#[derive(Clone, Debug)]
pub enum BinStorage {
    Dense(DenseBin),
    Sparse(SparseBin),
}

// =============================================================================
// Feature
// =============================================================================

/// One used feature: its mapper plus its binned column.
#[derive(Clone, Debug)]
pub struct Feature {
    /// Index in the raw input matrix.
    real_index: usize,
    mapper: BinMapper,
    storage: BinStorage,
}

impl Feature {
    #[inline]
    pub fn real_index(&self) -> usize {
        self.real_index
    }

    #[inline]
    pub fn mapper(&self) -> &BinMapper {
        &self.mapper
    }

    #[inline]
    pub fn storage(&self) -> &BinStorage {
        &self.storage
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.mapper.num_bins()
    }

    /// Sequential-access bin reader for this feature.
    pub fn bin_iterator(&self) -> BinIterator<'_> {
        match &self.storage {
            BinStorage::Dense(dense) => BinIterator::Dense(dense),
            BinStorage::Sparse(sparse) => BinIterator::Sparse(sparse.iterator()),
        }
    }
}

/// Random access for dense columns, ascending-row access for sparse ones.
pub enum BinIterator<'a> {
    Dense(&'a DenseBin),
    Sparse(SparseBinIterator<'a>),
}

impl<'a> BinIterator<'a> {
    /// Bin of `row`. Sparse-backed iterators require ascending rows.
    #[inline]
    pub fn get(&mut self, row: usize) -> u32 {
        match self {
            BinIterator::Dense(dense) => dense.get(row),
            BinIterator::Sparse(iter) => iter.get(row),
        }
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// A fully binned training or validation dataset.
#[derive(Clone, Debug)]
pub struct Dataset {
    num_data: usize,
    num_total_features: usize,
    features: Vec<Feature>,
    /// Real feature index -> used feature index, or -1 for unused features.
    used_feature_map: Vec<i32>,
    feature_names: Vec<String>,
    metadata: Metadata,
}

impl Dataset {
    #[inline]
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// Number of used (non-trivial) features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Number of columns in the raw input, including unused ones.
    #[inline]
    pub fn num_total_features(&self) -> usize {
        self.num_total_features
    }

    #[inline]
    pub fn feature(&self, inner: usize) -> &Feature {
        &self.features[inner]
    }

    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[inline]
    pub fn inner_feature_index(&self, real: usize) -> i32 {
        self.used_feature_map[real]
    }

    #[inline]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[inline]
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Per-feature bin counts, in used-feature order.
    pub fn bin_counts(&self) -> Vec<usize> {
        self.features.iter().map(|f| f.num_bins()).collect()
    }
}

// =============================================================================
// DatasetBuilder
// =============================================================================

/// Builds a [`Dataset`] from raw values.
///
/// # Example
///
/// ```ignore
/// let config = Config::default();
/// let train = DatasetBuilder::new(&config).from_array(values.view(), &labels)?;
/// let valid = DatasetBuilder::new(&config)
///     .reference(&train)
///     .from_array(valid_values.view(), &valid_labels)?;
/// ```
pub struct DatasetBuilder<'a> {
    max_bin: usize,
    sample_cnt: usize,
    is_enable_sparse: bool,
    sparse_threshold: f64,
    seed: u64,
    num_class: usize,
    categorical_features: HashSet<usize>,
    reference: Option<&'a Dataset>,
    feature_names: Vec<String>,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(config: &Config) -> Self {
        Self {
            max_bin: config.max_bin,
            sample_cnt: config.bin_construct_sample_cnt,
            is_enable_sparse: config.is_enable_sparse,
            sparse_threshold: config.sparse_threshold,
            seed: config.data_random_seed,
            num_class: config.num_class,
            categorical_features: HashSet::new(),
            reference: None,
            feature_names: Vec::new(),
        }
    }

    /// Mark raw feature columns as categorical.
    pub fn categorical_features<I: IntoIterator<Item = usize>>(mut self, features: I) -> Self {
        self.categorical_features = features.into_iter().collect();
        self
    }

    /// Reuse the bin mappers of a previously built (training) dataset.
    pub fn reference(mut self, dataset: &'a Dataset) -> Self {
        self.reference = Some(dataset);
        self
    }

    /// Explicit feature names (defaults to `Column_i`).
    pub fn feature_names<S: Into<String>, I: IntoIterator<Item = S>>(mut self, names: I) -> Self {
        self.feature_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build from a dense row-major matrix.
    pub fn from_array(self, values: ArrayView2<'_, f64>, label: &[f32]) -> Result<Dataset> {
        let num_data = values.nrows();
        let num_cols = values.ncols();
        let columns: Vec<Vec<f64>> = (0..num_cols)
            .map(|j| values.column(j).iter().copied().collect())
            .collect();
        self.from_columns(columns, num_data, label)
    }

    /// Build from CSR triplets. Missing entries are zeros.
    pub fn from_csr(
        self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f64],
        num_cols: usize,
        label: &[f32],
    ) -> Result<Dataset> {
        if indptr.is_empty() || *indptr.last().unwrap() != data.len() {
            return Err(Error::DataShape("indptr does not match data length".into()));
        }
        let num_data = indptr.len() - 1;
        let mut columns: Vec<Vec<f64>> = vec![vec![0.0; num_data]; num_cols];
        for row in 0..num_data {
            for k in indptr[row]..indptr[row + 1] {
                let col = indices[k] as usize;
                if col >= num_cols {
                    return Err(Error::DataShape(format!(
                        "column index {} out of range ({} columns)",
                        col, num_cols
                    )));
                }
                columns[col][row] = data[k];
            }
        }
        self.from_columns(columns, num_data, label)
    }

    /// Build from CSC triplets (column-compressed). Missing entries are
    /// zeros.
    pub fn from_csc(
        self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f64],
        num_rows: usize,
        label: &[f32],
    ) -> Result<Dataset> {
        if indptr.is_empty() || *indptr.last().unwrap() != data.len() {
            return Err(Error::DataShape("indptr does not match data length".into()));
        }
        let num_cols = indptr.len() - 1;
        let mut columns: Vec<Vec<f64>> = vec![vec![0.0; num_rows]; num_cols];
        for col in 0..num_cols {
            for k in indptr[col]..indptr[col + 1] {
                let row = indices[k] as usize;
                if row >= num_rows {
                    return Err(Error::DataShape(format!(
                        "row index {} out of range ({} rows)",
                        row, num_rows
                    )));
                }
                columns[col][row] = data[k];
            }
        }
        self.from_columns(columns, num_rows, label)
    }

    pub(crate) fn from_columns(
        self,
        columns: Vec<Vec<f64>>,
        num_data: usize,
        label: &[f32],
    ) -> Result<Dataset> {
        if num_data == 0 {
            return Err(Error::DataShape("dataset has no rows".into()));
        }
        if label.len() != num_data {
            return Err(Error::DataShape(format!(
                "label length {} != num_data {}",
                label.len(),
                num_data
            )));
        }
        let num_total_features = columns.len();

        // Fit mappers, or borrow them from the reference dataset.
        let mappers: Vec<Option<BinMapper>> = match self.reference {
            Some(reference) => {
                if reference.num_total_features() != num_total_features {
                    return Err(Error::DataShape(format!(
                        "reference dataset has {} features, input has {}",
                        reference.num_total_features(),
                        num_total_features
                    )));
                }
                (0..num_total_features)
                    .map(|real| {
                        let inner = reference.inner_feature_index(real);
                        if inner < 0 {
                            None
                        } else {
                            Some(reference.feature(inner as usize).mapper().clone())
                        }
                    })
                    .collect()
            }
            None => {
                let sample_rows = self.sample_rows(num_data);
                columns
                    .iter()
                    .enumerate()
                    .map(|(real, column)| {
                        let sample: Vec<f64> =
                            sample_rows.iter().map(|&r| column[r]).collect();
                        let mapper = if self.categorical_features.contains(&real) {
                            BinMapper::fit_categorical(&sample, self.max_bin)
                        } else {
                            BinMapper::fit_numerical(&sample, self.max_bin)
                        };
                        if mapper.is_trivial() {
                            None
                        } else {
                            Some(mapper)
                        }
                    })
                    .collect()
            }
        };

        // Bin every column and pick its storage.
        let mut features = Vec::new();
        let mut used_feature_map = vec![-1i32; num_total_features];
        for (real, column) in columns.into_iter().enumerate() {
            let Some(mapper) = mappers[real].clone() else {
                continue;
            };
            let bins: Vec<u8> = column
                .iter()
                .map(|&v| mapper.value_to_bin(v) as u8)
                .collect();
            let zero_count = bins.iter().filter(|&&b| b == 0).count();
            let zero_fraction = zero_count as f64 / num_data as f64;
            let storage = if self.is_enable_sparse
                && mapper.zero_bin() == 0
                && zero_fraction >= self.sparse_threshold
            {
                let pairs: Vec<(u32, u8)> = bins
                    .iter()
                    .enumerate()
                    .filter(|(_, &b)| b != 0)
                    .map(|(row, &b)| (row as u32, b))
                    .collect();
                BinStorage::Sparse(SparseBin::from_pairs(&pairs, num_data))
            } else {
                BinStorage::Dense(DenseBin::new(bins))
            };
            used_feature_map[real] = features.len() as i32;
            features.push(Feature {
                real_index: real,
                mapper,
                storage,
            });
        }

        let feature_names = if self.feature_names.len() == num_total_features {
            self.feature_names
        } else {
            (0..num_total_features)
                .map(|i| format!("Column_{}", i))
                .collect()
        };

        let mut metadata = Metadata::new(num_data, self.num_class);
        metadata.set_label(label)?;

        Ok(Dataset {
            num_data,
            num_total_features,
            features,
            used_feature_map,
            feature_names,
            metadata,
        })
    }

    /// Uniform row sample used for fitting bin boundaries.
    fn sample_rows(&self, num_data: usize) -> Vec<usize> {
        if num_data <= self.sample_cnt {
            return (0..num_data).collect();
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let mut rows: Vec<usize> = (0..num_data).collect();
        rows.shuffle(&mut rng);
        rows.truncate(self.sample_cnt);
        rows.sort_unstable();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn config_with(params: &str) -> Config {
        Config::from_str_params(params).unwrap()
    }

    fn simple_matrix() -> (Array2<f64>, Vec<f32>) {
        let values = Array2::from_shape_fn((8, 2), |(i, j)| {
            if j == 0 {
                (i / 4) as f64
            } else {
                i as f64
            }
        });
        let label: Vec<f32> = (0..8).map(|i| (i / 4) as f32).collect();
        (values, label)
    }

    #[test]
    fn test_from_array_basic() {
        let (values, label) = simple_matrix();
        let config = Config::default();
        let dataset = DatasetBuilder::new(&config)
            .from_array(values.view(), &label)
            .unwrap();
        assert_eq!(dataset.num_data(), 8);
        assert_eq!(dataset.num_features(), 2);
        assert_eq!(dataset.feature(0).num_bins(), 2);
        assert_eq!(dataset.metadata().label().len(), 8);
    }

    #[test]
    fn test_trivial_feature_dropped() {
        let mut values = Array2::zeros((6, 2));
        for i in 0..6 {
            values[[i, 1]] = i as f64;
        }
        let label = vec![0.0f32; 6];
        let config = Config::default();
        let dataset = DatasetBuilder::new(&config)
            .from_array(values.view(), &label)
            .unwrap();
        // Column 0 is constant: unused.
        assert_eq!(dataset.num_features(), 1);
        assert_eq!(dataset.inner_feature_index(0), -1);
        assert_eq!(dataset.inner_feature_index(1), 0);
        assert_eq!(dataset.num_total_features(), 2);
    }

    #[test]
    fn test_sparse_storage_chosen() {
        let mut values = Array2::zeros((100, 1));
        for i in 0..5 {
            values[[i * 20 + 3, 0]] = (i + 1) as f64;
        }
        let label = vec![0.0f32; 100];
        let config = config_with("is_enable_sparse=true sparse_threshold=0.8");
        let dataset = DatasetBuilder::new(&config)
            .from_array(values.view(), &label)
            .unwrap();
        match dataset.feature(0).storage() {
            BinStorage::Sparse(sparse) => assert_eq!(sparse.num_nonzero(), 5),
            BinStorage::Dense(_) => panic!("expected sparse storage"),
        }
    }

    #[test]
    fn test_sparse_disabled_by_config() {
        let mut values = Array2::zeros((100, 1));
        for i in 0..5 {
            values[[i, 0]] = (i + 1) as f64;
        }
        let label = vec![0.0f32; 100];
        let config = config_with("is_enable_sparse=false");
        let dataset = DatasetBuilder::new(&config)
            .from_array(values.view(), &label)
            .unwrap();
        assert!(matches!(dataset.feature(0).storage(), BinStorage::Dense(_)));
    }

    #[test]
    fn test_reference_shares_mappers() {
        let (values, label) = simple_matrix();
        let config = Config::default();
        let train = DatasetBuilder::new(&config)
            .from_array(values.view(), &label)
            .unwrap();

        // Validation values outside the training range clamp to end bins.
        let valid_values = Array2::from_shape_fn((4, 2), |(i, j)| {
            if j == 0 {
                10.0
            } else {
                -5.0 + i as f64
            }
        });
        let valid_label = vec![1.0f32; 4];
        let valid = DatasetBuilder::new(&config)
            .reference(&train)
            .from_array(valid_values.view(), &valid_label)
            .unwrap();

        assert_eq!(valid.num_features(), train.num_features());
        for f in 0..train.num_features() {
            assert_eq!(
                valid.feature(f).mapper().num_bins(),
                train.feature(f).mapper().num_bins()
            );
        }
        // Clamped to the top bin of feature 0.
        match valid.feature(0).storage() {
            BinStorage::Dense(dense) => assert_eq!(dense.get(0), 1),
            BinStorage::Sparse(_) => panic!("expected dense storage"),
        }
    }

    #[test]
    fn test_from_csr() {
        let indptr = vec![0usize, 1, 2, 2, 3];
        let indices = vec![0u32, 1, 0];
        let data = vec![1.0, 2.0, 3.0];
        let label = vec![0.0f32; 4];
        let config = Config::default();
        let dataset = DatasetBuilder::new(&config)
            .from_csr(&indptr, &indices, &data, 2, &label)
            .unwrap();
        assert_eq!(dataset.num_data(), 4);
        assert_eq!(dataset.num_features(), 2);
    }

    #[test]
    fn test_from_csc_matches_from_csr() {
        let config = Config::default();
        let label = vec![0.0f32; 3];
        // 3 x 2 matrix: [[1, 0], [0, 2], [3, 0]].
        let by_rows = DatasetBuilder::new(&config)
            .from_csr(&[0usize, 1, 2, 3], &[0u32, 1, 0], &[1.0, 2.0, 3.0], 2, &label)
            .unwrap();
        let by_cols = DatasetBuilder::new(&config)
            .from_csc(&[0usize, 2, 3], &[0u32, 2, 1], &[1.0, 3.0, 2.0], 3, &label)
            .unwrap();
        assert_eq!(by_rows.num_features(), by_cols.num_features());
        for f in 0..by_rows.num_features() {
            assert_eq!(
                by_rows.feature(f).mapper().num_bins(),
                by_cols.feature(f).mapper().num_bins()
            );
        }
    }

    #[test]
    fn test_csr_shape_errors() {
        let config = Config::default();
        let result = DatasetBuilder::new(&config).from_csr(
            &[0usize, 2],
            &[0u32, 5],
            &[1.0, 2.0],
            2,
            &[0.0],
        );
        assert!(result.is_err());
    }
}
