// Copyright 2026 Proscenium Contributors
// SPDX-License-Identifier: Apache-2.0

//! Proscenium — retrofit legacy Director movie embeds with a modern
//! rendering surface.
//!
//! The crate is the negotiation-and-replacement core: it classifies legacy
//! `<embed>`/`<object>` markup, elects exactly one initializer among
//! concurrent isolated contexts using the document's own attributes as the
//! only shared medium, swaps matched elements for mount points, and keeps
//! watching for late-inserted ones. The movie VM and the renderer behind the
//! [`engine::pipeline::Renderer`] trait are external collaborators.

#![allow(clippy::new_without_default)]

pub mod dom;
pub mod engine;
pub mod events;

pub use dom::Document;
pub use engine::arbiter::{RegisterOutcome, SourceKind};
pub use engine::pipeline::{MountRequest, Renderer};
pub use engine::Engine;
pub use events::EngineEvent;
