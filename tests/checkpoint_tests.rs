// Integration tests for checkpointed, resumable runs

mod common;

use common::{flat_series, permissive_params, rising_series, shared};
use pool_backtester::simulation::fingerprint_of;
use pool_backtester::{
    AssetSeries, BacktestEngine, CheckpointKey, CheckpointStore, FileCheckpointStore, ResumeMode, RunClass,
    SchedulerOptions, SimulationError, Stage,
};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn file_store(dir: &TempDir) -> Arc<dyn CheckpointStore> {
    Arc::new(FileCheckpointStore::new(dir.path()).expect("Failed to create checkpoint store"))
}

fn options(resume: ResumeMode) -> SchedulerOptions {
    SchedulerOptions {
        workers: 2,
        resume,
        ..Default::default()
    }
}

fn universe() -> Vec<Arc<AssetSeries>> {
    shared(vec![
        rising_series("a", 250),
        rising_series("b", 260),
        flat_series("c", 250, 1000.0),
        rising_series("short", 40),
    ])
}

fn checkpoint_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
        .filter(|n| n.ends_with(".json"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
#[serial]
async fn test_completed_run_is_not_repeated() {
    let dir = TempDir::new().unwrap();
    let series = universe();
    let params = permissive_params(1, 10);

    let engine = BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)));
    let first = engine.run(&params, &series).await.unwrap();
    assert_eq!(first.scan.processed_this_run, 4);
    assert_eq!(first.exit.processed_this_run, 3);

    let files = checkpoint_files(dir.path());
    assert_eq!(files.len(), 2, "one finalized checkpoint per phase: {:?}", files);
    assert!(files.iter().any(|f| f.starts_with("checkpoint_normal_entry_scan_")));
    assert!(files.iter().any(|f| f.starts_with("checkpoint_normal_exit_simulation_")));

    // fresh engine over the same directory, as after a restart
    let engine = BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)));
    let second = engine.run(&params, &series).await.unwrap();
    assert_eq!(second.scan.processed_this_run, 0);
    assert_eq!(second.exit.processed_this_run, 0);
    assert_eq!(second.opportunities.len(), first.opportunities.len());

    let exits = |r: &pool_backtester::PipelineReport| -> Vec<(String, usize)> {
        r.trades.iter().map(|t| (t.asset_id.clone(), t.exit_index)).collect()
    };
    assert_eq!(exits(&first), exits(&second));
}

#[tokio::test]
#[serial]
async fn test_force_new_reprocesses_everything() {
    let dir = TempDir::new().unwrap();
    let series = universe();
    let params = permissive_params(1, 10);

    BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)))
        .run(&params, &series)
        .await
        .unwrap();

    let report = BacktestEngine::new(options(ResumeMode::ForceNew), Some(file_store(&dir)))
        .run(&params, &series)
        .await
        .unwrap();
    assert_eq!(report.scan.processed_this_run, 4);
    assert!(!report.scan.resumed);
    assert_eq!(report.trades.len(), 3);
}

#[tokio::test]
#[serial]
async fn test_interrupted_run_resumes_to_the_same_result() {
    let dir = TempDir::new().unwrap();
    let series = universe();
    let params = permissive_params(1, 10);

    let engine = BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)));
    let interrupted = engine.run_until(&params, &series, async {}).await;
    assert!(matches!(interrupted, Err(SimulationError::Interrupted { total: 4, .. })));
    assert!(!checkpoint_files(dir.path()).is_empty());

    let resumed = engine.run(&params, &series).await.unwrap();
    let reference = BacktestEngine::new(options(ResumeMode::Resume), None)
        .run(&params, &series)
        .await
        .unwrap();

    assert_eq!(resumed.scan.succeeded, reference.scan.succeeded);
    assert_eq!(resumed.scan.skipped, reference.scan.skipped);
    assert_eq!(resumed.trades.len(), reference.trades.len());
    for (a, b) in resumed.trades.iter().zip(&reference.trades) {
        assert_eq!(a.asset_id, b.asset_id);
        assert_eq!(a.exit_reason, b.exit_reason);
        assert_eq!(a.exit_index, b.exit_index);
    }
}

#[tokio::test]
#[serial]
async fn test_partial_scan_checkpoint_resumes_remaining_assets() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let series = universe();
    let params = permissive_params(1, 10);

    let engine = BacktestEngine::new(options(ResumeMode::Resume), Some(Arc::clone(&store)));
    let first = engine.run(&params, &series).await.unwrap();
    assert_eq!(first.scan.succeeded, 3);

    // roll the finished scan back to "a" and "short" done
    let scan_key = CheckpointKey::new(
        RunClass::Normal,
        Stage::EntryScan,
        fingerprint_of(&(&params.entry, &String::new())),
    );
    let mut partial = store.latest_completed(&scan_key).unwrap().expect("scan checkpoint");
    for id in ["b", "c"] {
        assert!(partial.completed_units.remove(id));
        assert!(partial.results.remove(id).is_some());
    }
    partial.succeeded -= 2;
    partial.completed = false;
    store.save(&partial).unwrap();

    let resumed = engine.run(&params, &series).await.unwrap();
    assert!(resumed.scan.resumed);
    assert_eq!(resumed.scan.processed_this_run, 2);
    assert_eq!(resumed.scan.succeeded, 3);
    assert_eq!(resumed.scan.skipped, 1);
    assert_eq!(resumed.scan.unfinished, 0);
    assert_eq!(resumed.opportunities.len(), first.opportunities.len());
    for (a, b) in resumed.opportunities.iter().zip(&first.opportunities) {
        assert_eq!(a.asset_id, b.asset_id);
        assert_eq!(a.entry_index, b.entry_index);
    }
    assert!(store.latest_incomplete(&scan_key).unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_changed_parameters_do_not_reuse_checkpoints() {
    let dir = TempDir::new().unwrap();
    let series = universe();

    let engine = BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)));
    engine.run(&permissive_params(1, 10), &series).await.unwrap();

    let report = engine.run(&permissive_params(10, 10), &series).await.unwrap();
    assert_eq!(report.scan.processed_this_run, 4);
    assert!(report.opportunities.iter().all(|o| o.entry_index == 30));
}

#[tokio::test]
#[serial]
async fn test_data_tag_separates_checkpoints() {
    let dir = TempDir::new().unwrap();
    let series = universe();
    let params = permissive_params(1, 10);

    BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)))
        .with_data_tag("first.json")
        .run(&params, &series)
        .await
        .unwrap();

    let report = BacktestEngine::new(options(ResumeMode::Resume), Some(file_store(&dir)))
        .with_data_tag("second.json")
        .run(&params, &series)
        .await
        .unwrap();
    assert_eq!(report.scan.processed_this_run, 4);
}
