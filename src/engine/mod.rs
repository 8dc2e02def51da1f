// Copyright 2026 Proscenium Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine entrypoint — negotiation, initial sweep, and continuous watching.
//!
//! [`Engine::init`] is the single call an embedding host makes. It runs the
//! negotiation arbiter; on a successful claim it schedules the deferred
//! confirmation, and the context that survives the recheck performs the
//! one-time initialization: set the shared initialized flag, sweep the
//! document for legacy embeds, and start the mutation watcher.

pub mod arbiter;
pub mod classify;
pub mod pipeline;
pub mod watcher;

use crate::dom::Document;
use crate::events::{EngineEvent, EventBus};
use arbiter::{Claim, NegotiationArbiter, RegisterOutcome, SourceKind};
use pipeline::{Renderer, ReplacementPipeline};
use std::rc::Rc;
use watcher::MutationWatcher;

/// One context's engine instance for one document.
pub struct Engine {
    doc: Document,
    arbiter: NegotiationArbiter,
    pipeline: ReplacementPipeline,
    events: EventBus,
}

impl Engine {
    pub fn new(doc: Document, renderer: Rc<dyn Renderer>) -> Self {
        let events = EventBus::new();
        Self {
            arbiter: NegotiationArbiter::new(doc.clone()),
            pipeline: ReplacementPipeline::new(doc.clone(), renderer, events.clone()),
            doc,
            events,
        }
    }

    /// Subscribe to this engine's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Register this context as an initialization candidate. Idempotent:
    /// calling again, or calling after any context initialized, is a no-op
    /// returning [`RegisterOutcome::Deferred`].
    ///
    /// On [`RegisterOutcome::Claimed`] the deferred confirmation is scheduled
    /// on the current `LocalSet` (panics outside one, like any
    /// `tokio::task::spawn_local`); the claim may still be superseded by a
    /// concurrent context before the recheck fires.
    pub fn init(&self, version: &str, source: SourceKind) -> RegisterOutcome {
        match self.arbiter.register(version, source) {
            RegisterOutcome::Deferred => {
                self.events.emit(EngineEvent::ClaimDeferred {
                    version: version.to_string(),
                    source: source.to_string(),
                });
                RegisterOutcome::Deferred
            }
            RegisterOutcome::Claimed(claim) => {
                self.events.emit(EngineEvent::ClaimWritten {
                    version: claim.version_string().to_string(),
                    source: claim.source.to_string(),
                });
                tokio::task::spawn_local(confirm_and_run(
                    self.doc.clone(),
                    self.arbiter.clone(),
                    self.pipeline.clone(),
                    self.events.clone(),
                    claim.clone(),
                ));
                RegisterOutcome::Claimed(claim)
            }
        }
    }
}

/// The deferred confirmation. Waits for document ready, yields one macrotask
/// so concurrently registering contexts get to write their claims, then
/// rechecks the shared attributes. Only the surviving claimant initializes.
async fn confirm_and_run(
    doc: Document,
    arbiter: NegotiationArbiter,
    pipeline: ReplacementPipeline,
    events: EventBus,
    claim: Claim,
) {
    doc.ready().await;
    tokio::task::yield_now().await;

    if !arbiter.confirm(&claim) {
        tracing::debug!(
            version = claim.version_string(),
            source = %claim.source,
            "claim superseded before confirmation; aborting"
        );
        events.emit(EngineEvent::ClaimSuperseded {
            version: claim.version_string().to_string(),
            source: claim.source.to_string(),
        });
        return;
    }

    tracing::info!(
        version = claim.version_string(),
        source = %claim.source,
        "negotiation won; initializing"
    );
    events.emit(EngineEvent::EngineInitialized {
        version: claim.version_string().to_string(),
        source: claim.source.to_string(),
    });

    let mounts = pipeline.process(doc.document_elements());
    events.emit(EngineEvent::SweepComplete { mounts });

    MutationWatcher::new(doc, pipeline).spawn();
}
