//! Typed lifecycle events.
//!
//! Every [`crate::model::Model`] owns an [`EventEmitter`]. Listeners subscribe
//! per [`ModelEventKind`]; any number of independent listeners may watch the
//! same kind. Registering the same `Arc` twice for one kind is a no-op, so a
//! listener is never called twice for one event.
//!
//! Events are emitted after the state they describe has been committed, and
//! listeners are invoked outside the emitter's lock so they may subscribe or
//! unsubscribe from inside a callback.

use crate::error::MlError;
use crate::metrics::PerformanceMetrics;
use crate::model::{InferenceTiming, ModelState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Discriminant of [`ModelEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEventKind {
  /// Lifecycle state changed.
  StateChange,
  /// A backend forward pass is about to start.
  InferenceStart,
  /// A prediction finished, including postprocessing.
  InferenceEnd,
  /// A lifecycle operation failed.
  Error,
  /// Rolling performance metrics were updated.
  MetricsUpdate,
}

/// Lifecycle, inference and metrics notifications from a model.
#[derive(Debug, Clone)]
pub enum ModelEvent {
  /// The model moved from one state to another.
  StateChange {
    /// Model name.
    model: String,
    /// Previous state.
    from: ModelState,
    /// New state.
    to: ModelState,
  },
  /// Backend execution is starting.
  InferenceStart {
    /// Model name.
    model: String,
  },
  /// Prediction finished.
  InferenceEnd {
    /// Model name.
    model: String,
    /// Phase timings of the call.
    timing: InferenceTiming,
  },
  /// An operation failed.
  Error {
    /// Model name.
    model: String,
    /// Operation that failed, e.g. `"load"`.
    context: String,
    /// The causal error.
    error: MlError,
    /// When the failure was observed.
    timestamp: DateTime<Utc>,
  },
  /// Metrics window updated.
  MetricsUpdate {
    /// Model name.
    model: String,
    /// Snapshot after the update.
    metrics: PerformanceMetrics,
  },
}

impl ModelEvent {
  /// The subscription key of this event.
  pub fn kind(&self) -> ModelEventKind {
    match self {
      ModelEvent::StateChange { .. } => ModelEventKind::StateChange,
      ModelEvent::InferenceStart { .. } => ModelEventKind::InferenceStart,
      ModelEvent::InferenceEnd { .. } => ModelEventKind::InferenceEnd,
      ModelEvent::Error { .. } => ModelEventKind::Error,
      ModelEvent::MetricsUpdate { .. } => ModelEventKind::MetricsUpdate,
    }
  }
}

/// Event callback.
pub type Listener = Arc<dyn Fn(&ModelEvent) + Send + Sync>;

/// Per-kind listener sets.
#[derive(Default)]
pub struct EventEmitter {
  listeners: Mutex<HashMap<ModelEventKind, Vec<Listener>>>,
}

impl std::fmt::Debug for EventEmitter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
    f.debug_struct("EventEmitter").field("listeners", &counts).finish()
  }
}

impl EventEmitter {
  /// Creates an emitter with no listeners.
  pub fn new() -> Self {
    Self::default()
  }

  /// Subscribes `listener` to `kind`. Returns false if it was already subscribed.
  pub fn on(&self, kind: ModelEventKind, listener: Listener) -> bool {
    let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    let set = listeners.entry(kind).or_default();
    if set.iter().any(|l| Arc::ptr_eq(l, &listener)) {
      return false;
    }
    set.push(listener);
    true
  }

  /// Unsubscribes `listener` from `kind`. Returns false if it was not subscribed.
  pub fn off(&self, kind: ModelEventKind, listener: &Listener) -> bool {
    let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    match listeners.get_mut(&kind) {
      Some(set) => {
        let before = set.len();
        set.retain(|l| !Arc::ptr_eq(l, listener));
        set.len() != before
      }
      None => false,
    }
  }

  /// Delivers `event` to every listener of its kind.
  pub fn emit(&self, event: &ModelEvent) {
    let targets: Vec<Listener> = {
      let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
      listeners.get(&event.kind()).cloned().unwrap_or_default()
    };
    for listener in targets {
      listener(event);
    }
  }

  /// Number of listeners subscribed to `kind`.
  pub fn listener_count(&self, kind: ModelEventKind) -> usize {
    let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    listeners.get(&kind).map_or(0, Vec::len)
  }

  /// Removes every listener.
  pub fn clear(&self) {
    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn start_event() -> ModelEvent {
    ModelEvent::InferenceStart {
      model: "m".to_string(),
    }
  }

  #[test]
  fn test_duplicate_listener_delivered_once() {
    let emitter = EventEmitter::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let listener: Listener = Arc::new(move |_: &ModelEvent| {
      h.fetch_add(1, Ordering::SeqCst);
    });
    assert!(emitter.on(ModelEventKind::InferenceStart, listener.clone()));
    assert!(!emitter.on(ModelEventKind::InferenceStart, listener.clone()));
    emitter.emit(&start_event());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_independent_listeners_and_kinds() {
    let emitter = EventEmitter::new();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
      let h = hits.clone();
      emitter.on(
        ModelEventKind::InferenceStart,
        Arc::new(move |_: &ModelEvent| {
          h.fetch_add(1, Ordering::SeqCst);
        }),
      );
    }
    let h = hits.clone();
    emitter.on(
      ModelEventKind::Error,
      Arc::new(move |_: &ModelEvent| {
        h.fetch_add(100, Ordering::SeqCst);
      }),
    );
    emitter.emit(&start_event());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_off_and_clear() {
    let emitter = EventEmitter::new();
    let listener: Listener = Arc::new(|_: &ModelEvent| {});
    emitter.on(ModelEventKind::MetricsUpdate, listener.clone());
    assert!(emitter.off(ModelEventKind::MetricsUpdate, &listener));
    assert!(!emitter.off(ModelEventKind::MetricsUpdate, &listener));
    emitter.on(ModelEventKind::Error, listener);
    emitter.clear();
    assert_eq!(emitter.listener_count(ModelEventKind::Error), 0);
  }
}
