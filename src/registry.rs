//! # Model Registry
//!
//! A catalog of [`Model`]s keyed by caller-chosen ids.
//!
//! Construct one with [`ModelRegistry::new`] and pass it to whatever owns the
//! inference lifecycle, or use the lazily created process-wide instance from
//! [`ModelRegistry::global`].
//!
//! ## Single-flight loading
//!
//! [`ModelRegistry::get_or_load`] keeps at most one load in flight per id.
//! Concurrent callers for the same id join the same shared future and all
//! observe its outcome.
//!
//! ## Eviction
//!
//! [`ModelRegistry::cleanup_unused`] evicts `ready` models that have been idle
//! longer than the given age and have not been fetched with
//! [`ModelRegistry::get`] since the previous sweep. Each sweep clears the
//! "recently used" mark of the entries it keeps, so a model survives exactly
//! one sweep per use.

use crate::config::ModelConfig;
use crate::error::{MlError, Result};
use crate::metrics;
use crate::model::{Model, ModelState};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Idle age used by [`ModelRegistry::cleanup_unused_default`].
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

type SharedLoad = Shared<BoxFuture<'static, Result<()>>>;

static GLOBAL: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::new);

struct RegisteredModel {
  model: Arc<Model>,
  config: ModelConfig,
  registered_at: DateTime<Utc>,
  last_used: Instant,
  use_count: u64,
  referenced: bool,
}

/// Public view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntryInfo {
  /// Registry id.
  pub id: String,
  /// Model name.
  pub name: String,
  /// Lifecycle state at the time of the call.
  pub state: ModelState,
  /// Configuration snapshot taken at registration.
  pub config: ModelConfig,
  /// When the entry was registered.
  pub registered_at: DateTime<Utc>,
  /// Time since the last `get`, or since registration.
  pub idle_for: Duration,
  /// Number of `get` calls.
  pub use_count: u64,
  /// Backend memory at the last sample.
  pub memory_usage_mb: f64,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
  /// Registered models.
  pub total_models: usize,
  /// Models in `ready`.
  pub ready_models: usize,
  /// Models in `loading`.
  pub loading_models: usize,
  /// Models in `error`.
  pub failed_models: usize,
  /// Sum of `get` calls over all entries.
  pub total_uses: u64,
  /// Sum of sampled backend memory.
  pub total_memory_mb: f64,
}

/// Catalog of models keyed by id.
#[derive(Default)]
pub struct ModelRegistry {
  entries: Mutex<HashMap<String, RegisteredModel>>,
  loading: Mutex<HashMap<String, SharedLoad>>,
}

impl std::fmt::Debug for ModelRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelRegistry")
      .field("ids", &self.ids())
      .finish()
  }
}

impl ModelRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// The process-wide registry, created on first use.
  pub fn global() -> &'static ModelRegistry {
    &GLOBAL
  }

  fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, RegisteredModel>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn loading(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedLoad>> {
    self.loading.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Registers `model` under `id`.
  ///
  /// An existing id is never overwritten: the call logs a warning and
  /// returns false. Unregister first to replace a model.
  pub fn register(&self, id: impl Into<String>, model: Arc<Model>) -> bool {
    let id = id.into();
    let count = {
      let mut entries = self.entries();
      if entries.contains_key(&id) {
        warn!(%id, "model id already registered, ignoring");
        return false;
      }
      entries.insert(
        id.clone(),
        RegisteredModel {
          config: model.config().clone(),
          model,
          registered_at: Utc::now(),
          last_used: Instant::now(),
          use_count: 0,
          referenced: false,
        },
      );
      entries.len()
    };
    info!(%id, "model registered");
    metrics::record_registry_size(count);
    true
  }

  /// Returns the model under `id` and marks it used. Never loads.
  pub fn get(&self, id: &str) -> Option<Arc<Model>> {
    let mut entries = self.entries();
    let entry = entries.get_mut(id)?;
    entry.last_used = Instant::now();
    entry.use_count += 1;
    entry.referenced = true;
    Some(entry.model.clone())
  }

  /// Returns the model under `id`, loading it first if needed.
  ///
  /// Concurrent calls for one id share a single load.
  pub async fn get_or_load(&self, id: &str) -> Result<Arc<Model>> {
    let model = self
      .get(id)
      .ok_or_else(|| MlError::NotRegistered(id.to_string()))?;
    if model.is_ready() {
      return Ok(model);
    }

    let load = {
      let mut loading = self.loading();
      loading
        .entry(id.to_string())
        .or_insert_with(|| {
          debug!(%id, "starting registry load");
          let model = model.clone();
          async move { model.load().await }.boxed().shared()
        })
        .clone()
    };

    let outcome = load.clone().await;
    {
      let mut loading = self.loading();
      if loading.get(id).is_some_and(|current| current.ptr_eq(&load)) {
        loading.remove(id);
      }
    }
    outcome.map(|()| model)
  }

  /// Disposes and removes the model under `id`. Returns false if unknown.
  pub async fn unregister(&self, id: &str) -> bool {
    let (removed, count) = {
      let mut entries = self.entries();
      let removed = entries.remove(id);
      (removed, entries.len())
    };
    let Some(entry) = removed else {
      return false;
    };
    entry.model.dispose().await;
    info!(%id, "model unregistered");
    metrics::record_registry_size(count);
    true
  }

  /// Loads every id in parallel. One failure does not abort the others.
  pub async fn preload_models(&self, ids: &[&str]) -> HashMap<String, bool> {
    let results = join_all(ids.iter().map(|id| async move {
      let outcome = self.get_or_load(id).await;
      if let Err(err) = &outcome {
        warn!(%id, error = %err, "preload failed");
      }
      (id.to_string(), outcome.is_ok())
    }))
    .await;
    results.into_iter().collect()
  }

  /// Evicts idle, `ready` models not used since the previous sweep.
  ///
  /// Idle time alone is not enough: an entry fetched since the last sweep
  /// survives this one even if its last use is older than `max_age`, and only
  /// has its `referenced` flag cleared. It is evicted on the next sweep unless
  /// used again. Models in any state other than `ready` are never evicted.
  ///
  /// Returns the number of models disposed and removed.
  pub async fn cleanup_unused(&self, max_age: Duration) -> usize {
    let (victims, count) = {
      let mut entries = self.entries();
      let mut victim_ids = Vec::new();
      for (id, entry) in entries.iter_mut() {
        let idle = entry.last_used.elapsed() > max_age;
        if entry.model.state() == ModelState::Ready && idle && !entry.referenced {
          victim_ids.push(id.clone());
        } else {
          entry.referenced = false;
        }
      }
      let victims: Vec<(String, Arc<Model>)> = victim_ids
        .into_iter()
        .filter_map(|id| entries.remove(&id).map(|e| (id, e.model)))
        .collect();
      (victims, entries.len())
    };

    for (id, model) in &victims {
      model.dispose().await;
      debug!(%id, "evicted idle model");
    }
    if !victims.is_empty() {
      info!(evicted = victims.len(), "registry cleanup");
      metrics::record_registry_size(count);
    }
    victims.len()
  }

  /// [`ModelRegistry::cleanup_unused`] with [`DEFAULT_MAX_IDLE`].
  pub async fn cleanup_unused_default(&self) -> usize {
    self.cleanup_unused(DEFAULT_MAX_IDLE).await
  }

  /// Disposes every model and empties the registry.
  pub async fn dispose_all(&self) {
    let models: Vec<Arc<Model>> = {
      let mut entries = self.entries();
      entries.drain().map(|(_, e)| e.model).collect()
    };
    self.loading().clear();
    join_all(models.iter().map(|m| m.dispose())).await;
    info!(disposed = models.len(), "registry cleared");
    metrics::record_registry_size(0);
  }

  /// Returns true if `id` is registered.
  pub fn contains(&self, id: &str) -> bool {
    self.entries().contains_key(id)
  }

  /// Registered ids, sorted.
  pub fn ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.entries().keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Number of registered models.
  pub fn len(&self) -> usize {
    self.entries().len()
  }

  /// Returns true if nothing is registered.
  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  /// Details of one entry, without marking it used.
  pub fn entry_info(&self, id: &str) -> Option<RegistryEntryInfo> {
    let entries = self.entries();
    entries.get(id).map(|e| RegistryEntryInfo {
      id: id.to_string(),
      name: e.model.name().to_string(),
      state: e.model.state(),
      config: e.config.clone(),
      registered_at: e.registered_at,
      idle_for: e.last_used.elapsed(),
      use_count: e.use_count,
      memory_usage_mb: e.model.metrics().memory_usage_mb,
    })
  }

  /// Aggregate statistics over all entries.
  pub fn stats(&self) -> RegistryStats {
    let entries = self.entries();
    let mut stats = RegistryStats {
      total_models: entries.len(),
      ..RegistryStats::default()
    };
    for entry in entries.values() {
      match entry.model.state() {
        ModelState::Ready => stats.ready_models += 1,
        ModelState::Loading => stats.loading_models += 1,
        ModelState::Error => stats.failed_models += 1,
        _ => {}
      }
      stats.total_uses += entry.use_count;
      stats.total_memory_mb += entry.model.metrics().memory_usage_mb;
    }
    stats
  }

  /// Sum of sampled backend memory over all entries, in megabytes.
  pub fn total_memory_usage_mb(&self) -> f64 {
    self.stats().total_memory_mb
  }
}
