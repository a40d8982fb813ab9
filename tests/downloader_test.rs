// * Download stage scenarios: concurrency bound, retry exhaustion,
// * integrity rejection, and filename collision handling.

mod common;

use common::{record, FetchBehavior, MockEngine};
use pixel_flow::config::DownloadSettings;
use pixel_flow::engine::EngineKind;
use pixel_flow::pipeline::Downloader;
use std::sync::Arc;
use std::time::Duration;

fn settings(max_concurrent: usize) -> DownloadSettings {
    DownloadSettings {
        timeout: 5,
        max_retries: 2,
        delay: 0.0,
        max_concurrent_downloads: max_concurrent,
        min_file_bytes: 16,
    }
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_ten_records_three_workers_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..10)
        .map(|i| record(&format!("https://cdn.example.com/img_{}.jpg", i)))
        .collect();
    let engine = Arc::new(MockEngine::with_records(EngineKind::Simple, Vec::new()));

    let report = Downloader::from_settings(&settings(3))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 10);
    assert_eq!(report.failure_count, 0);
    assert_eq!(report.total_bytes, 10 * 1024);
    assert_eq!(file_names(dir.path()).len(), 10);
}

#[tokio::test]
async fn test_persistent_failure_counts_once_and_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..10)
        .map(|i| record(&format!("https://cdn.example.com/img_{}.jpg", i)))
        .collect();
    let engine = Arc::new(
        MockEngine::with_records(EngineKind::Simple, Vec::new())
            .script("https://cdn.example.com/img_3.jpg", FetchBehavior::Fail),
    );

    let report = Downloader::from_settings(&settings(3))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 9);
    assert_eq!(report.failure_count, 1);
    let names = file_names(dir.path());
    assert_eq!(names.len(), 9);
    assert!(!names.contains(&"img_3.jpg".to_string()));
}

#[tokio::test]
async fn test_zero_byte_result_never_reaches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![
        record("https://cdn.example.com/good.jpg"),
        record("https://cdn.example.com/empty.jpg"),
    ];
    let engine = Arc::new(
        MockEngine::with_records(EngineKind::Simple, Vec::new())
            .script("https://cdn.example.com/empty.jpg", FetchBehavior::Empty),
    );

    let report = Downloader::from_settings(&settings(2))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 1);

    // * No zero-byte artifact and no stray .part file
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        assert!(entry.metadata().unwrap().len() > 0);
        assert!(!entry.file_name().to_string_lossy().ends_with(".part"));
    }
    assert_eq!(file_names(dir.path()), vec!["good.jpg".to_string()]);
}

#[tokio::test]
async fn test_undersized_body_is_an_integrity_failure() {
    let dir = tempfile::tempdir().unwrap();
    let records = vec![record("https://cdn.example.com/tiny.jpg")];
    let engine = Arc::new(
        MockEngine::with_records(EngineKind::Simple, Vec::new()).script(
            "https://cdn.example.com/tiny.jpg",
            FetchBehavior::Bytes(vec![1, 2, 3]),
        ),
    );

    let report = Downloader::from_settings(&settings(1))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.failure_count, 1);
    assert!(file_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_same_suggested_filename_yields_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    // * Four distinct URLs whose paths all end in photo.jpg
    let records: Vec<_> = (0..4)
        .map(|i| record(&format!("https://cdn.example.com/album{}/photo.jpg", i)))
        .collect();
    assert!(records.iter().all(|r| r.suggested_filename == "photo.jpg"));

    let engine = Arc::new(MockEngine::with_records(EngineKind::Simple, Vec::new()));
    let report = Downloader::from_settings(&settings(4))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 4);
    let names = file_names(dir.path());
    assert_eq!(names.len(), 4);
    assert!(names.contains(&"photo.jpg".to_string()));
    assert!(names.contains(&"photo_1.jpg".to_string()));
    assert!(names.contains(&"photo_2.jpg".to_string()));
    assert!(names.contains(&"photo_3.jpg".to_string()));
}

#[tokio::test]
async fn test_completed_records_carry_download_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockEngine::with_records(EngineKind::Simple, Vec::new()));

    let report = Downloader::from_settings(&settings(1))
        .download_all(
            engine,
            vec![record("https://cdn.example.com/pic.jpg")],
            dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 1);
    let done = &report.completed[0];
    assert_eq!(done.size_bytes, Some(1024));
    assert_eq!(done.content_format.as_deref(), Some("image/png"));
    assert_eq!(done.suggested_filename, "pic.jpg");
    assert!(dir.path().join(&done.suggested_filename).exists());
}

#[tokio::test]
async fn test_completed_records_reflect_collision_renames() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..3)
        .map(|i| record(&format!("https://cdn.example.com/album{}/photo.jpg", i)))
        .collect();
    let engine = Arc::new(MockEngine::with_records(EngineKind::Simple, Vec::new()));

    let report = Downloader::from_settings(&settings(3))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    // * Each completed record names the file it actually landed in
    let mut names: Vec<_> = report
        .completed
        .iter()
        .map(|r| r.suggested_filename.clone())
        .collect();
    names.sort();
    assert_eq!(names, file_names(dir.path()));
}

#[tokio::test]
async fn test_stale_part_files_are_swept_before_a_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("old.jpg.part"), b"leftover").unwrap();

    let engine = Arc::new(MockEngine::with_records(EngineKind::Simple, Vec::new()));
    let report = Downloader::from_settings(&settings(1))
        .download_all(
            engine,
            vec![record("https://cdn.example.com/new.jpg")],
            dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.success_count, 1);
    let names = file_names(dir.path());
    assert!(!names.iter().any(|n| n.ends_with(".part")));
    assert_eq!(names, vec!["new.jpg".to_string()]);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..12)
        .map(|i| record(&format!("https://cdn.example.com/img_{}.jpg", i)))
        .collect();
    let engine = Arc::new(
        MockEngine::with_records(EngineKind::Simple, Vec::new())
            .with_fetch_delay(Duration::from_millis(30)),
    );

    let report = Downloader::from_settings(&settings(3))
        .download_all(Arc::clone(&engine) as _, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 12);
    assert!(
        engine.max_observed_concurrency() <= 3,
        "observed {} concurrent fetches with a bound of 3",
        engine.max_observed_concurrency()
    );
}

#[tokio::test]
async fn test_stats_are_deterministic_across_completion_orders() {
    // * Varying delays shuffle completion order; totals must not change
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..6)
        .map(|i| record(&format!("https://cdn.example.com/img_{}.jpg", i)))
        .collect();
    let engine = Arc::new(
        MockEngine::with_records(EngineKind::Simple, Vec::new())
            .with_fetch_delay(Duration::from_millis(5)),
    );

    let report = Downloader::from_settings(&settings(6))
        .download_all(engine, records, dir.path())
        .await
        .unwrap();

    assert_eq!(report.success_count, 6);
    assert_eq!(report.total_bytes, 6 * 1024);
}
