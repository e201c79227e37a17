// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

// Allow clippy warnings for callback manager
// - clone_on_ref_ptr: CallbackManager clones Arc<dyn CallbackHandler> when fanning out
#![allow(clippy::clone_on_ref_ptr)]

//! Invocation callbacks for observability
//!
//! The optimizer emits structured start/end events around two kinds of units
//! of work: a *module* invocation (one program executed against one example)
//! and a *model* invocation (a single generation call made by the executor).
//! Every event carries an explicit correlation id and, for nested
//! invocations, the parent's id; there is no ambient call context. Handlers
//! are a pure side-channel: registering none, or handlers that fail, never
//! changes optimization results.
//!
//! # Overview
//!
//! - [`CallbackHandler`] - Trait for implementing custom handlers
//! - [`CallbackManager`] - Fans events out to registered handlers
//! - [`InvocationContext`] - Carries the manager plus the parent id across
//!   the executor boundary
//! - [`ConsoleCallbackHandler`] - Logs events to stdout
//! - [`RecordingCallbackHandler`] - Buffers events for test assertions

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// The kind of unit of work an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// A program (or sub-step) executed against one example.
    Module,
    /// A single generation call to the model backend.
    Model,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Module => write!(f, "module"),
            InvocationKind::Model => write!(f, "model"),
        }
    }
}

/// Callback handler trait.
///
/// Implement this to observe optimizer invocations. All methods default to
/// no-ops, so handlers only override the events they care about.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Called when a unit of work starts.
    async fn on_start(
        &self,
        kind: InvocationKind,
        name: &str,
        inputs: &HashMap<String, serde_json::Value>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        let _ = (kind, name, inputs, run_id, parent_run_id);
        Ok(())
    }

    /// Called when a unit of work finishes, successfully or not. `error`
    /// carries the failure message when the unit failed.
    async fn on_end(
        &self,
        kind: InvocationKind,
        outputs: &HashMap<String, serde_json::Value>,
        error: Option<&str>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        let _ = (kind, outputs, error, run_id, parent_run_id);
        Ok(())
    }

    /// Whether errors from this handler should abort the surrounding
    /// operation. Defaults to false: errors are logged and ignored.
    fn raise_error(&self) -> bool {
        false
    }
}

/// A callback handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallbackHandler;

#[async_trait]
impl CallbackHandler for NullCallbackHandler {
    // All methods use default implementations (no-ops)
}

/// Console callback handler that prints events to stdout. Useful when
/// debugging an optimization run interactively.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleCallbackHandler;

impl ConsoleCallbackHandler {
    /// Create a new console callback handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CallbackHandler for ConsoleCallbackHandler {
    async fn on_start(
        &self,
        kind: InvocationKind,
        name: &str,
        _inputs: &HashMap<String, serde_json::Value>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        match parent_run_id {
            Some(parent) => println!("> {kind} '{name}' started ({run_id}, parent {parent})"),
            None => println!("> {kind} '{name}' started ({run_id})"),
        }
        Ok(())
    }

    async fn on_end(
        &self,
        kind: InvocationKind,
        _outputs: &HashMap<String, serde_json::Value>,
        error: Option<&str>,
        run_id: Uuid,
        _parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        match error {
            Some(message) => println!("> {kind} failed ({run_id}): {message}"),
            None => println!("> {kind} finished ({run_id})"),
        }
        Ok(())
    }
}

/// One recorded callback event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Unit kind.
    pub kind: InvocationKind,
    /// Unit name (empty for end events).
    pub name: String,
    /// Correlation id of the unit.
    pub run_id: Uuid,
    /// Parent correlation id, if the unit was nested.
    pub parent_run_id: Option<Uuid>,
    /// True for start events, false for end events.
    pub is_start: bool,
    /// Failure message on failed end events.
    pub error: Option<String>,
}

/// Callback handler that buffers every event in memory. Intended for tests
/// asserting on event ordering and correlation-id plumbing.
#[derive(Debug, Default)]
pub struct RecordingCallbackHandler {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingCallbackHandler {
    /// Create an empty recording handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if no events were recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl CallbackHandler for RecordingCallbackHandler {
    async fn on_start(
        &self,
        kind: InvocationKind,
        name: &str,
        _inputs: &HashMap<String, serde_json::Value>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        self.events.lock().push(RecordedEvent {
            kind,
            name: name.to_string(),
            run_id,
            parent_run_id,
            is_start: true,
            error: None,
        });
        Ok(())
    }

    async fn on_end(
        &self,
        kind: InvocationKind,
        _outputs: &HashMap<String, serde_json::Value>,
        error: Option<&str>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        self.events.lock().push(RecordedEvent {
            kind,
            name: String::new(),
            run_id,
            parent_run_id,
            is_start: false,
            error: error.map(ToString::to_string),
        });
        Ok(())
    }
}

/// Callback manager that coordinates multiple callback handlers.
///
/// The manager executes handlers in registration order. Handler errors are
/// logged and swallowed unless the handler opts into `raise_error()`.
#[derive(Clone, Default)]
pub struct CallbackManager {
    handlers: Vec<Arc<dyn CallbackHandler>>,
}

impl CallbackManager {
    /// Create a new callback manager with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Create a callback manager with the given handlers.
    #[must_use]
    pub fn with_handlers(handlers: Vec<Arc<dyn CallbackHandler>>) -> Self {
        Self { handlers }
    }

    /// Add a callback handler to the manager.
    pub fn add_handler(&mut self, handler: Arc<dyn CallbackHandler>) {
        self.handlers.push(handler);
    }

    /// Get the number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if there are no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Fire a start event on all handlers.
    pub async fn on_start(
        &self,
        kind: InvocationKind,
        name: &str,
        inputs: &HashMap<String, serde_json::Value>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        for handler in &self.handlers {
            let result = handler
                .on_start(kind, name, inputs, run_id, parent_run_id)
                .await;
            if let Err(e) = result {
                if handler.raise_error() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Callback error (ignored)");
            }
        }
        Ok(())
    }

    /// Fire an end event on all handlers.
    pub async fn on_end(
        &self,
        kind: InvocationKind,
        outputs: &HashMap<String, serde_json::Value>,
        error: Option<&str>,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) -> Result<()> {
        for handler in &self.handlers {
            let result = handler
                .on_end(kind, outputs, error, run_id, parent_run_id)
                .await;
            if let Err(e) = result {
                if handler.raise_error() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Callback error (ignored)");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackManager")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Carries the callback manager and the current parent correlation id across
/// the executor boundary, so nested model invocations can report an explicit
/// parent instead of reading ambient state.
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    /// The manager events are fired on.
    pub callbacks: CallbackManager,
    /// Correlation id of the enclosing unit, if any.
    pub parent_run_id: Option<Uuid>,
}

impl InvocationContext {
    /// Root context: no enclosing unit.
    #[must_use]
    pub fn root(callbacks: CallbackManager) -> Self {
        Self {
            callbacks,
            parent_run_id: None,
        }
    }

    /// Context for units nested under `run_id`.
    #[must_use]
    pub fn child(&self, run_id: Uuid) -> Self {
        Self {
            callbacks: self.callbacks.clone(),
            parent_run_id: Some(run_id),
        }
    }
}
