//! # ModelRegistry Test Suite
//!
//! Registration policy, single-flight loading, preloading, idle eviction and
//! teardown of [`crate::registry::ModelRegistry`].

use crate::error::MlError;
use crate::model::ModelState;
use crate::registry::ModelRegistry;
use crate::test_support::{MockBackend, MockStats, mock_model, tensor_model_with};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_register_and_get() {
  let registry = ModelRegistry::new();
  let (model, _) = mock_model("a");
  assert!(registry.register("a", model.clone()));
  assert!(registry.contains("a"));
  assert_eq!(registry.len(), 1);
  assert!(Arc::ptr_eq(&registry.get("a").unwrap(), &model));
  assert!(registry.get("missing").is_none());
}

#[test]
fn test_duplicate_register_does_not_overwrite() {
  let registry = ModelRegistry::new();
  let (first, _) = mock_model("first");
  let (second, _) = mock_model("second");
  assert!(registry.register("id", first.clone()));
  assert!(!registry.register("id", second));
  assert!(Arc::ptr_eq(&registry.get("id").unwrap(), &first));
  assert_eq!(registry.len(), 1);
}

#[test]
fn test_get_bumps_usage_but_entry_info_does_not() {
  let registry = ModelRegistry::new();
  let (model, _) = mock_model("a");
  registry.register("a", model);
  registry.get("a");
  registry.get("a");
  let info = registry.entry_info("a").unwrap();
  assert_eq!(info.use_count, 2);
  assert_eq!(registry.entry_info("a").unwrap().use_count, 2);
  assert_eq!(info.name, "a");
  assert_eq!(info.state, ModelState::Unloaded);
}

#[test]
fn test_ids_are_sorted() {
  let registry = ModelRegistry::new();
  for id in ["c", "a", "b"] {
    registry.register(id, mock_model(id).0);
  }
  assert_eq!(registry.ids(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_unregister_disposes() {
  let registry = ModelRegistry::new();
  let (model, stats) = mock_model("a");
  registry.register("a", model.clone());
  assert!(registry.unregister("a").await);
  assert!(!registry.unregister("a").await);
  assert_eq!(model.state(), ModelState::Disposed);
  assert_eq!(stats.disposes(), 1);
  assert!(registry.is_empty());
}

// ============================================================================
// get_or_load
// ============================================================================

#[tokio::test]
async fn test_get_or_load_unregistered_fails() {
  let registry = ModelRegistry::new();
  let err = registry.get_or_load("nope").await.unwrap_err();
  assert_eq!(err, MlError::NotRegistered("nope".to_string()));
}

#[tokio::test]
async fn test_concurrent_get_or_load_loads_once() {
  let registry = Arc::new(ModelRegistry::new());
  let stats = Arc::new(MockStats::default());
  let backend = MockBackend::new(stats.clone()).with_load_delay(Duration::from_millis(25));
  let model = tensor_model_with("modelA", backend);
  registry.register("modelA", model.clone());

  let handles: Vec<_> = (0..10)
    .map(|_| {
      let registry = registry.clone();
      tokio::spawn(async move { registry.get_or_load("modelA").await })
    })
    .collect();

  for handle in handles {
    let loaded = handle.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&loaded, &model));
    assert!(loaded.is_ready());
  }
  assert_eq!(stats.loads(), 1);
}

#[tokio::test]
async fn test_get_or_load_failure_is_shared_and_retryable() {
  let registry = ModelRegistry::new();
  let stats = Arc::new(MockStats::default());
  stats.fail_load.store(true, Ordering::SeqCst);
  let backend = MockBackend::new(stats.clone()).with_load_delay(Duration::from_millis(10));
  registry.register("m", tensor_model_with("m", backend));

  let (a, b) = tokio::join!(registry.get_or_load("m"), registry.get_or_load("m"));
  assert!(matches!(a, Err(MlError::Load(_))));
  assert_eq!(a.unwrap_err(), b.unwrap_err());
  assert_eq!(stats.loads(), 1);

  stats.fail_load.store(false, Ordering::SeqCst);
  assert!(registry.get_or_load("m").await.is_ok());
  assert_eq!(stats.loads(), 2);
}

#[tokio::test]
async fn test_get_or_load_ready_model_skips_load() {
  let registry = ModelRegistry::new();
  let (model, stats) = mock_model("m");
  model.load().await.unwrap();
  registry.register("m", model);
  registry.get_or_load("m").await.unwrap();
  assert_eq!(stats.loads(), 1);
}

#[tokio::test]
async fn test_preload_reports_per_id() {
  let registry = ModelRegistry::new();
  let (good, _) = mock_model("good");
  let (bad, bad_stats) = mock_model("bad");
  bad_stats.fail_load.store(true, Ordering::SeqCst);
  registry.register("good", good.clone());
  registry.register("bad", bad);

  let results = registry.preload_models(&["good", "bad", "ghost"]).await;
  assert_eq!(results.len(), 3);
  assert!(results["good"]);
  assert!(!results["bad"]);
  assert!(!results["ghost"]);
  assert!(good.is_ready());
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test]
async fn test_cleanup_evicts_only_unused_model() {
  let registry = ModelRegistry::new();
  let mut stats = Vec::new();
  for id in ["A", "B", "C"] {
    let (model, s) = mock_model(id);
    model.load().await.unwrap();
    registry.register(id, model);
    stats.push(s);
  }
  let c = registry.entry_info("C").unwrap();
  assert_eq!(c.state, ModelState::Ready);

  registry.get("A");
  registry.get("B");
  tokio::time::sleep(Duration::from_millis(1)).await;

  assert_eq!(registry.cleanup_unused(Duration::ZERO).await, 1);
  assert_eq!(registry.ids(), vec!["A", "B"]);
  assert_eq!(stats[2].disposes(), 1);
  assert_eq!(stats[0].disposes(), 0);
  assert_eq!(stats[1].disposes(), 0);
}

#[tokio::test]
async fn test_cleanup_survivors_need_fresh_use() {
  let registry = ModelRegistry::new();
  let (model, _) = mock_model("A");
  model.load().await.unwrap();
  registry.register("A", model);
  registry.get("A");
  tokio::time::sleep(Duration::from_millis(1)).await;

  assert_eq!(registry.cleanup_unused(Duration::ZERO).await, 0);
  tokio::time::sleep(Duration::from_millis(1)).await;
  assert_eq!(registry.cleanup_unused(Duration::ZERO).await, 1);
  assert!(registry.is_empty());
}

#[tokio::test]
async fn test_cleanup_skips_models_that_are_not_ready() {
  let registry = ModelRegistry::new();
  let (unloaded, _) = mock_model("unloaded");
  let (failed, failed_stats) = mock_model("failed");
  failed_stats.fail_load.store(true, Ordering::SeqCst);
  let _ = failed.load().await;
  registry.register("unloaded", unloaded);
  registry.register("failed", failed);
  tokio::time::sleep(Duration::from_millis(1)).await;

  assert_eq!(registry.cleanup_unused(Duration::ZERO).await, 0);
  assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_cleanup_respects_max_age() {
  let registry = ModelRegistry::new();
  let (model, _) = mock_model("A");
  model.load().await.unwrap();
  registry.register("A", model);
  assert_eq!(registry.cleanup_unused_default().await, 0);
  assert_eq!(registry.len(), 1);
}

// ============================================================================
// Aggregates and teardown
// ============================================================================

#[tokio::test]
async fn test_stats_and_memory() {
  let registry = ModelRegistry::new();
  let (ready, _) = mock_model("ready");
  ready.load().await.unwrap();
  let (idle, _) = mock_model("idle");
  registry.register("ready", ready);
  registry.register("idle", idle);
  registry.get("ready");

  let stats = registry.stats();
  assert_eq!(stats.total_models, 2);
  assert_eq!(stats.ready_models, 1);
  assert_eq!(stats.total_uses, 1);
  assert_eq!(registry.total_memory_usage_mb(), 1.5);
}

#[tokio::test]
async fn test_dispose_all() {
  let registry = ModelRegistry::new();
  let (a, a_stats) = mock_model("a");
  let (b, b_stats) = mock_model("b");
  a.load().await.unwrap();
  registry.register("a", a);
  registry.register("b", b.clone());

  registry.dispose_all().await;
  assert!(registry.is_empty());
  assert_eq!(a_stats.disposes(), 1);
  assert_eq!(b_stats.disposes(), 1);
  assert_eq!(b.state(), ModelState::Disposed);
}

#[test]
fn test_global_is_shared() {
  let first = ModelRegistry::global() as *const ModelRegistry;
  let second = ModelRegistry::global() as *const ModelRegistry;
  assert_eq!(first, second);
}
