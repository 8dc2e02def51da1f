// Copyright 2026 Proscenium Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine event bus — typed events from negotiation and replacement.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying [`EngineEvent`]
//! values. Hosts, dashboards, and tests can subscribe independently. When no
//! subscribers exist, events are silently dropped (zero overhead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the engine emits. Serialized to JSON for host consumption.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// This context wrote its claim to the shared attributes.
    ClaimWritten { version: String, source: String },
    /// This context lost negotiation and will take no further action.
    ClaimDeferred { version: String, source: String },
    /// This context's claim was overwritten between its write and its
    /// deferred recheck; it aborted silently.
    ClaimSuperseded { version: String, source: String },
    /// This context won negotiation and set the initialized flag.
    EngineInitialized { version: String, source: String },
    /// A legacy element was swapped for a mount and handed to the renderer.
    MountCreated {
        src: String,
        width: String,
        height: String,
    },
    /// The renderer rejected a handoff; sibling candidates were unaffected.
    MountFailed { src: String, error: String },
    /// The initial full-document sweep finished.
    SweepComplete { mounts: usize },
}

/// Cloneable handle to the engine's broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with a bounded replay buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe; receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
