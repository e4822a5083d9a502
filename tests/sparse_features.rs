//! Ordered-sparse feature behavior: storage choice, histogram contents and
//! the sibling-sum identity under splits on another feature.

use leafboost::data::{BinStorage, OrderedSparseBin};
use leafboost::training::{construct_histograms, HistogramEntry};
use leafboost::{Boosting, Config, DatasetBuilder};
use ndarray::Array2;

const NONZERO_ROWS: [usize; 5] = [7, 23, 41, 63, 88];

/// 100 rows, 2 features. Feature 0 is dense (alternating halves), feature 1
/// has exactly five non-zeros.
fn sparse_dataset(config: &Config) -> leafboost::Dataset {
    let values = Array2::from_shape_fn((100, 2), |(i, j)| {
        if j == 0 {
            (i / 50) as f64
        } else if let Some(k) = NONZERO_ROWS.iter().position(|&r| r == i) {
            (k + 1) as f64
        } else {
            0.0
        }
    });
    let label: Vec<f32> = (0..100).map(|i| (i % 2) as f32).collect();
    DatasetBuilder::new(config)
        .from_array(values.view(), &label)
        .unwrap()
}

fn build_leaf_histogram(
    dataset: &leafboost::Dataset,
    ordered_bins: &[Option<OrderedSparseBin>],
    leaf: usize,
    rows: &[u32],
    gradients: &[f32],
    hessians: &[f32],
) -> Vec<HistogramEntry> {
    let bin_counts = dataset.bin_counts();
    let mut offsets = vec![0usize];
    for &n in &bin_counts {
        offsets.push(offsets.last().unwrap() + n);
    }
    let sum_grad: f64 = rows.iter().map(|&r| gradients[r as usize] as f64).sum();
    let sum_hess: f64 = rows.iter().map(|&r| hessians[r as usize] as f64).sum();

    let mut histogram = vec![HistogramEntry::default(); *offsets.last().unwrap()];
    construct_histograms(
        &mut histogram,
        &offsets,
        dataset.features(),
        &vec![true; dataset.num_features()],
        rows,
        ordered_bins,
        leaf,
        sum_grad,
        sum_hess,
        gradients,
        hessians,
    );
    histogram
}

#[test]
fn sparse_storage_is_chosen_and_root_histogram_is_exact() {
    let config = Config::from_str_params("is_enable_sparse=true sparse_threshold=0.8").unwrap();
    let dataset = sparse_dataset(&config);

    // Feature 1 is 95% zeros: stored ordered-sparse.
    let BinStorage::Sparse(sparse) = dataset.feature(1).storage() else {
        panic!("expected sparse storage for feature 1");
    };
    assert_eq!(sparse.num_nonzero(), 5);
    assert!(matches!(dataset.feature(0).storage(), BinStorage::Dense(_)));

    let mut ordered_bins: Vec<Option<OrderedSparseBin>> = vec![None, None];
    let mut ordered = OrderedSparseBin::new(2);
    ordered.init(sparse, None);
    ordered_bins[1] = Some(ordered);

    let gradients: Vec<f32> = (0..100).map(|i| (i % 3) as f32 - 1.0).collect();
    let hessians = vec![1.0f32; 100];
    let rows: Vec<u32> = (0..100).collect();
    let histogram =
        build_leaf_histogram(&dataset, &ordered_bins, 0, &rows, &gradients, &hessians);

    // Feature 1's histogram: exactly 95 rows in bin 0, the five non-zeros
    // spread over the remaining bins.
    let offset = dataset.feature(0).num_bins();
    let feature1 = &histogram[offset..offset + dataset.feature(1).num_bins()];
    assert_eq!(feature1[0].count, 95);
    let nonzero_count: u32 = feature1[1..].iter().map(|e| e.count).sum();
    assert_eq!(nonzero_count, 5);

    // Bin 0's sums equal the totals minus the non-zero rows' contribution.
    let nonzero_grad: f64 = NONZERO_ROWS.iter().map(|&r| gradients[r] as f64).sum();
    let total_grad: f64 = gradients.iter().map(|&g| g as f64).sum();
    assert!((feature1[0].sum_grad - (total_grad - nonzero_grad)).abs() < 1e-9);
}

#[test]
fn children_histograms_sum_to_parent_after_foreign_split() {
    let config = Config::from_str_params("is_enable_sparse=true sparse_threshold=0.8").unwrap();
    let dataset = sparse_dataset(&config);

    let BinStorage::Sparse(sparse) = dataset.feature(1).storage() else {
        panic!("expected sparse storage for feature 1");
    };
    let mut ordered = OrderedSparseBin::new(3);
    ordered.init(sparse, None);

    let gradients: Vec<f32> = (0..100).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
    let hessians: Vec<f32> = (0..100).map(|i| 1.0 + (i % 4) as f32 * 0.25).collect();

    let rows: Vec<u32> = (0..100).collect();
    let mut ordered_bins = vec![None, Some(ordered)];
    let parent =
        build_leaf_histogram(&dataset, &ordered_bins, 0, &rows, &gradients, &hessians);

    // Split on feature 0 (rows < 50 left); the sparse feature rearranges by
    // the same row mask.
    let goes_left: Vec<bool> = (0..100).map(|r| r < 50).collect();
    let left_rows: Vec<u32> = (0..50).collect();
    let right_rows: Vec<u32> = (50..100).collect();
    ordered_bins
        .iter_mut()
        .flatten()
        .for_each(|ob| ob.split(0, 1, &goes_left));

    let left =
        build_leaf_histogram(&dataset, &ordered_bins, 0, &left_rows, &gradients, &hessians);
    let right =
        build_leaf_histogram(&dataset, &ordered_bins, 1, &right_rows, &gradients, &hessians);

    for bin in 0..parent.len() {
        let grad_sum = left[bin].sum_grad + right[bin].sum_grad;
        let hess_sum = left[bin].sum_hess + right[bin].sum_hess;
        let tolerance = 1e-5 * parent[bin].sum_grad.abs().max(1.0);
        assert!((parent[bin].sum_grad - grad_sum).abs() < tolerance);
        assert!((parent[bin].sum_hess - hess_sum).abs() < tolerance);
        assert_eq!(parent[bin].count, left[bin].count + right[bin].count);
    }
}

/// Training with sparse storage must agree with the same run on dense
/// storage: the representation is an optimization, not a semantic. Bin-0
/// reconstruction reorders float sums, so agreement is up to rounding noise.
#[test]
fn sparse_and_dense_storage_train_equivalent_models() {
    let probes: Vec<Vec<f64>> = (0..6)
        .map(|i| vec![(i % 2) as f64, if i < 5 { i as f64 } else { 0.0 }])
        .collect();
    let train = |sparse: bool| -> Vec<f64> {
        let config = Config::from_str_params(&format!(
            "objective=binary num_iterations=5 learning_rate=0.5 num_leaves=4 \
             min_data_in_leaf=1 min_sum_hessian_in_leaf=0.0 is_enable_sparse={}",
            sparse
        ))
        .unwrap();
        let dataset = sparse_dataset(&config);
        let mut booster = leafboost::create_boosting(&config, &dataset).unwrap();
        booster.train().unwrap();
        probes.iter().map(|row| booster.predict_raw(row)[0]).collect()
    };
    let predictions_sparse = train(true);
    let predictions_dense = train(false);
    for (sparse, dense) in predictions_sparse.iter().zip(&predictions_dense) {
        assert!((sparse - dense).abs() < 1e-6, "{} vs {}", sparse, dense);
    }
}
