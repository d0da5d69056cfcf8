use loadwarden::regression::{DetectionMethod, RegressionThreshold};
use loadwarden::settings::{load_settings, save_settings, PersistentSettings};
use tempfile::TempDir;

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nonexistent.json");
    let settings = load_settings(&path);
    assert!(settings.thresholds.is_empty());
}

#[test]
fn test_load_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json at all {{{").unwrap();
    let settings = load_settings(&path);
    // Should return defaults instead of panicking
    assert!(settings.thresholds.is_empty());
}

#[test]
fn test_save_and_load_thresholds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");

    let mut p95 = RegressionThreshold::new("responseTime.p95", 10.0, 25.0);
    p95.method = DetectionMethod::Statistical;
    let settings = PersistentSettings {
        thresholds: vec![p95],
    };

    save_settings(&path, &settings).unwrap();
    let loaded = load_settings(&path);

    assert_eq!(loaded.thresholds.len(), 1);
    assert_eq!(loaded.thresholds[0], settings.thresholds[0]);
}

#[test]
fn test_partial_threshold_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.json");

    std::fs::write(
        &path,
        r#"{"thresholds": [{"metric": "errorRate", "warningPct": 20, "criticalPct": 60}]}"#,
    )
    .unwrap();
    let loaded = load_settings(&path);

    let t = &loaded.thresholds[0];
    assert_eq!(t.metric, "errorRate");
    assert_eq!(t.method, DetectionMethod::Absolute);
    assert_eq!(t.min_sample_size, 5);
    assert!((t.confidence - 0.95).abs() < 1e-12);
}

#[test]
fn test_empty_object_is_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.json");
    std::fs::write(&path, "{}").unwrap();
    assert!(load_settings(&path).thresholds.is_empty());
}

#[test]
fn test_save_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.json");
    save_settings(&path, &PersistentSettings::default()).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}
