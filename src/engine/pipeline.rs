//! Replacement pipeline — swap a classified element for a renderer mount.
//!
//! The pipeline owns the only DOM mutations the engine performs: insert an
//! empty mount element before the matched node, detach the node (the ancestor
//! `<object>` in the nested dual-markup case), and hand the mount to the
//! external renderer. It makes no assumption about what the renderer does
//! with the mount; the handoff is fire-and-forget.

use crate::dom::{Document, NodeId};
use crate::engine::classify::{self, CandidateElement};
use crate::events::{EngineEvent, EventBus};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

/// Tag of the mount element the renderer is handed.
pub const MOUNT_TAG: &str = "div";

/// Everything the external renderer needs to take over one mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// The freshly inserted, empty mount element.
    pub mount: NodeId,
    /// Declared width, as written in the legacy markup; may be empty.
    pub width: String,
    /// Declared height; may be empty.
    pub height: String,
    /// Declared movie source.
    pub src: String,
    /// External parameters; later duplicate keys overwrote earlier ones and
    /// blank keys were dropped.
    pub params: HashMap<String, String>,
}

/// External renderer entry point. The engine creates exactly one mount per
/// replaced node and never calls back into a mount afterwards.
pub trait Renderer {
    fn mount(&self, request: MountRequest) -> anyhow::Result<()>;
}

/// Why a single replacement did not produce a mount.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The target is no longer connected — it was already replaced, or some
    /// other script removed it. Replacement is idempotent per node.
    #[error("target node is no longer attached to the document")]
    AlreadyDetached,
    /// The renderer rejected the handoff. The DOM swap already happened.
    #[error("renderer mount failed: {0}")]
    Renderer(anyhow::Error),
}

/// The per-document replacement pipeline.
#[derive(Clone)]
pub struct ReplacementPipeline {
    doc: Document,
    renderer: Rc<dyn Renderer>,
    events: EventBus,
}

impl ReplacementPipeline {
    pub fn new(doc: Document, renderer: Rc<dyn Renderer>, events: EventBus) -> Self {
        Self {
            doc,
            renderer,
            events,
        }
    }

    /// Replace one classified element with a mount and hand it off.
    pub fn replace(&self, candidate: CandidateElement) -> Result<NodeId, ReplaceError> {
        if !self.doc.is_connected(candidate.target) {
            return Err(ReplaceError::AlreadyDetached);
        }

        let mount = self.doc.create_element(MOUNT_TAG);
        if !self.doc.insert_before(mount, candidate.target) {
            return Err(ReplaceError::AlreadyDetached);
        }
        self.doc.detach(candidate.target);

        let request = MountRequest {
            mount,
            width: candidate.width.clone(),
            height: candidate.height.clone(),
            src: candidate.src.clone(),
            params: collapse_params(candidate.external_params),
        };
        self.renderer
            .mount(request)
            .map_err(ReplaceError::Renderer)?;

        self.events.emit(EngineEvent::MountCreated {
            src: candidate.src,
            width: candidate.width,
            height: candidate.height,
        });
        Ok(mount)
    }

    /// Classify and replace a batch of elements in the given order.
    ///
    /// Targets are de-duplicated within the batch (the nested dual markup
    /// classifies to the same `<object>` from both tags), and one failing
    /// handoff is logged without stopping sibling candidates. Returns the
    /// number of mounts created.
    pub fn process<I>(&self, elements: I) -> usize
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut mounts = 0;
        for element in elements {
            let Some(candidate) = classify::classify(&self.doc, element) else {
                continue;
            };
            if !seen.insert(candidate.target) {
                continue;
            }
            let src = candidate.src.clone();
            match self.replace(candidate) {
                Ok(_) => mounts += 1,
                Err(ReplaceError::AlreadyDetached) => {}
                Err(err) => {
                    tracing::warn!(src = %src, error = %err, "replacement failed; continuing");
                    self.events.emit(EngineEvent::MountFailed {
                        src,
                        error: err.to_string(),
                    });
                }
            }
        }
        mounts
    }
}

/// Ordered params to the renderer's key→value mapping: later duplicates
/// overwrite, empty or whitespace-only keys are dropped.
fn collapse_params(ordered: Vec<(String, String)>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (key, value) in ordered {
        if key.trim().is_empty() {
            continue;
        }
        map.insert(key, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRenderer {
        calls: RefCell<Vec<MountRequest>>,
    }

    impl Renderer for RecordingRenderer {
        fn mount(&self, request: MountRequest) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(request);
            Ok(())
        }
    }

    fn find(doc: &Document, tag: &str) -> NodeId {
        doc.document_elements()
            .into_iter()
            .find(|id| doc.tag_name(*id).as_deref() == Some(tag))
            .unwrap()
    }

    fn pipeline(doc: &Document) -> (ReplacementPipeline, Rc<RecordingRenderer>) {
        let renderer = Rc::new(RecordingRenderer::default());
        (
            ReplacementPipeline::new(doc.clone(), renderer.clone(), EventBus::new()),
            renderer,
        )
    }

    #[test]
    fn test_replace_swaps_node_for_mount() {
        let doc = Document::from_html(
            r#"<html><body><embed src="a.dcr" width="10" height="20"></body></html>"#,
        );
        let embed = find(&doc, "embed");
        let (pipeline, renderer) = pipeline(&doc);

        let candidate = classify::classify(&doc, embed).unwrap();
        let mount = pipeline.replace(candidate).unwrap();

        assert!(doc.is_connected(mount));
        assert!(!doc.is_connected(embed));
        assert_eq!(doc.tag_name(mount).as_deref(), Some(MOUNT_TAG));

        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].src, "a.dcr");
        assert_eq!(calls[0].width, "10");
        assert_eq!(calls[0].height, "20");
    }

    #[test]
    fn test_replace_is_idempotent_per_node() {
        let doc = Document::from_html(r#"<html><body><embed src="a.dcr"></body></html>"#);
        let embed = find(&doc, "embed");
        let (pipeline, renderer) = pipeline(&doc);

        let candidate = classify::classify(&doc, embed).unwrap();
        pipeline.replace(candidate.clone()).unwrap();
        assert!(matches!(
            pipeline.replace(candidate),
            Err(ReplaceError::AlreadyDetached)
        ));
        assert_eq!(renderer.calls.borrow().len(), 1);
    }

    #[test]
    fn test_process_dedupes_nested_markup_to_one_mount() {
        let doc = Document::from_html(
            r#"<html><body>
            <object classid="clsid:166B1BCA-3F9C-11CF-8075-444553540000" width="640" height="480">
              <param name="src" value="game.dcr">
              <embed src="game.dcr" width="320" height="240">
            </object>
            </body></html>"#,
        );
        let (pipeline, renderer) = pipeline(&doc);
        let mounts = pipeline.process(doc.document_elements());

        assert_eq!(mounts, 1);
        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].width, "640");
        assert_eq!(calls[0].height, "480");
        // The whole <object> left the document, not just the inner <embed>.
        assert!(doc
            .document_elements()
            .into_iter()
            .all(|id| doc.tag_name(id).as_deref() != Some("object")));
    }

    #[test]
    fn test_process_renderer_failure_does_not_stop_siblings() {
        struct Flaky {
            calls: RefCell<Vec<MountRequest>>,
        }
        impl Renderer for Flaky {
            fn mount(&self, request: MountRequest) -> anyhow::Result<()> {
                let bad = request.src == "bad.dcr";
                self.calls.borrow_mut().push(request);
                if bad {
                    anyhow::bail!("out of memory");
                }
                Ok(())
            }
        }

        let doc = Document::from_html(
            r#"<html><body><embed src="bad.dcr"><embed src="good.dcr"></body></html>"#,
        );
        let renderer = Rc::new(Flaky {
            calls: RefCell::new(Vec::new()),
        });
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let pipeline = ReplacementPipeline::new(doc.clone(), renderer.clone(), bus);

        let mounts = pipeline.process(doc.document_elements());
        assert_eq!(mounts, 1);
        assert_eq!(renderer.calls.borrow().len(), 2);
        assert_eq!(renderer.calls.borrow()[1].src, "good.dcr");

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EngineEvent::MountFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[test]
    fn test_collapse_params_rules() {
        let map = collapse_params(vec![
            ("sw1".into(), "first".into()),
            ("  ".into(), "dropped".into()),
            ("sw2".into(), "two".into()),
            ("sw1".into(), "second".into()),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["sw1"], "second");
        assert_eq!(map["sw2"], "two");
    }

    #[test]
    fn test_process_ignores_ineligible_elements() {
        let doc = Document::from_html(
            r#"<html><body><embed src="clip.mp4"><object></object></body></html>"#,
        );
        let (pipeline, renderer) = pipeline(&doc);
        assert_eq!(pipeline.process(doc.document_elements()), 0);
        assert!(renderer.calls.borrow().is_empty());
    }
}
