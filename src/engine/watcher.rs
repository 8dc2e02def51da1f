//! Live-mutation watcher — replay the pipeline over late-inserted nodes.
//!
//! Legacy pages routinely write embed markup from script after load. The
//! watcher consumes the document's insertion stream and applies the same
//! classify-then-replace pipeline to each inserted subtree. It is started
//! only by the context that won negotiation; a losing context never observes
//! mutations.

use crate::dom::Document;
use crate::engine::pipeline::ReplacementPipeline;

/// Watches one document for inserted legacy embeds.
pub struct MutationWatcher {
    doc: Document,
    pipeline: ReplacementPipeline,
}

impl MutationWatcher {
    pub fn new(doc: Document, pipeline: ReplacementPipeline) -> Self {
        Self { doc, pipeline }
    }

    /// Start watching on the current `LocalSet`. Runs for the remaining
    /// lifetime of the document; the task ends when the document (and with
    /// it the insertion stream) is torn down.
    pub fn spawn(self) {
        tokio::task::spawn_local(self.run());
    }

    async fn run(self) {
        let mut insertions = self.doc.observe_insertions();
        while let Some(record) = insertions.recv().await {
            // One record is fully processed before the next is taken, so a
            // node referenced again by a later record is already detached.
            let mut elements = Vec::new();
            for root in record.inserted {
                elements.extend(self.doc.descendant_elements(root));
            }
            let mounts = self.pipeline.process(elements);
            if mounts > 0 {
                tracing::debug!(mounts, "mounted late-inserted legacy embeds");
            }
        }
    }
}
