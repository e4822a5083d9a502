//! Save/load round trips through the text model format.

use leafboost::{create_boosting, Boosting, Config, DatasetBuilder, LoadedModel};
use ndarray::Array2;

fn trained_binary() -> (Config, leafboost::Dataset) {
    let config = Config::from_str_params(
        "objective=binary num_iterations=10 learning_rate=0.3 num_leaves=8 \
         min_data_in_leaf=2 min_sum_hessian_in_leaf=0.0",
    )
    .unwrap();
    let values = Array2::from_shape_fn((120, 3), |(i, j)| ((i * (j + 2)) % 11) as f64);
    let label: Vec<f32> = (0..120).map(|i| if i % 11 > 5 { 1.0 } else { 0.0 }).collect();
    let dataset = DatasetBuilder::new(&config)
        .from_array(values.view(), &label)
        .unwrap();
    (config, dataset)
}

#[test]
fn saved_model_predicts_identically() {
    let (config, dataset) = trained_binary();
    let mut booster = create_boosting(&config, &dataset).unwrap();
    booster.train().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.txt");
    booster.save_model(path.to_str().unwrap()).unwrap();

    let loaded = LoadedModel::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded.num_iterations(), booster.num_iterations_trained());

    for i in 0..20 {
        let row = vec![(i % 11) as f64, ((i * 3) % 11) as f64, ((i * 5) % 11) as f64];
        let expected = booster.predict_raw(&row)[0];
        let actual = loaded.predict_raw(&row)[0];
        let tolerance = 1e-6 * expected.abs().max(1.0);
        assert!(
            (expected - actual).abs() < tolerance,
            "row {}: {} vs {}",
            i,
            expected,
            actual
        );
        // Transformed outputs agree too (sigmoid survives the header).
        let p_live = booster.predict(&row)[0];
        let p_loaded = loaded.predict(&row)[0];
        assert!((p_live - p_loaded).abs() < 1e-6);
        // Leaf-index prediction round-trips.
        assert_eq!(booster.predict_leaf_index(&row), loaded.predict_leaf_index(&row));
    }
}

#[test]
fn reload_into_live_booster() {
    let (config, dataset) = trained_binary();
    let mut booster = create_boosting(&config, &dataset).unwrap();
    booster.train().unwrap();
    let text = booster.to_model_string();

    let mut fresh = create_boosting(&config, &dataset).unwrap();
    fresh.models_from_string(&text).unwrap();
    assert_eq!(
        fresh.num_iterations_trained(),
        booster.num_iterations_trained()
    );
    for i in 0..10 {
        let row = vec![i as f64, (i * 2) as f64, (i * 3) as f64];
        assert_eq!(booster.predict_raw(&row), fresh.predict_raw(&row));
    }
}

#[test]
fn model_file_layout() {
    let (config, dataset) = trained_binary();
    let mut booster = create_boosting(&config, &dataset).unwrap();
    booster.train().unwrap();
    let text = booster.to_model_string();

    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("gbdt"));
    assert_eq!(lines.next(), Some("num_class=1"));
    assert_eq!(lines.next(), Some("label_index=0"));
    assert_eq!(lines.next(), Some("max_feature_idx=2"));
    assert!(lines.next().unwrap().starts_with("sigmoid="));
    assert_eq!(lines.next(), Some(""));
    assert!(lines.next().unwrap().starts_with("Tree=0"));
    assert!(text.contains("\nfeature importances:\n"));
    // Importance section lists every raw feature with a count.
    for name in dataset.feature_names() {
        assert!(text.contains(&format!("{}=", name)));
    }
}
