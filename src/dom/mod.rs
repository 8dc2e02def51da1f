//! In-memory DOM substrate — the shared medium between isolated contexts.
//!
//! `DomTree` is an index-based node arena; [`Document`] is the cheaply
//! cloneable handle each execution context holds. Contexts share nothing but
//! the tree itself: every handle method is a single DOM access, which is the
//! granularity at which concurrent contexts interleave. Insertions into the
//! connected tree are published as ordered [`MutationRecord`]s; attribute
//! writes are not observed (only the negotiation code reads them back).

mod parse;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Index of a node in the arena. Stable for the life of the document;
/// detached nodes keep their id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

/// One batch of inserted subtree roots, in document order.
///
/// A record is emitted when a subtree becomes connected to the document; it
/// names only the subtree root. Insertions into detached subtrees emit
/// nothing until the subtree itself is connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Roots of the subtrees that were inserted.
    pub inserted: Vec<NodeId>,
}

enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(#[allow(dead_code)] String),
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// The node arena plus the document-level signals hosts provide: the ready
/// flag (DOMContentLoaded) and the insertion observers.
struct DomTree {
    nodes: Vec<Node>,
    root: NodeId,
    base: Option<Url>,
    observers: Vec<mpsc::UnboundedSender<MutationRecord>>,
    ready: watch::Sender<bool>,
}

impl DomTree {
    fn with_root(tag: &str, attrs: Vec<(String, String)>, base: Option<Url>) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element {
                    tag: tag.to_ascii_lowercase(),
                    attrs,
                },
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            base,
            observers: Vec::new(),
            ready,
        }
    }

    fn new_element(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
                attrs,
            },
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn new_text(&mut self, text: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind: NodeKind::Text(text.to_string()),
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            match attrs.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((name, value.to_string())),
            }
        }
    }

    fn remove_attr(&mut self, id: NodeId, name: &str) {
        let name = name.to_ascii_lowercase();
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            attrs.retain(|(n, _)| *n != name);
        }
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root {
                return true;
            }
            match self.nodes[cur.0].parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    fn is_in_subtree(&self, id: NodeId, root: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == root {
                return true;
            }
            match self.nodes[cur.0].parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.nodes[child.0].parent.is_some() || self.is_in_subtree(parent, child) {
            return false;
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.notify_inserted(child);
        true
    }

    fn insert_before(&mut self, node: NodeId, reference: NodeId) -> bool {
        if self.nodes[node.0].parent.is_some() {
            return false;
        }
        let Some(parent) = self.nodes[reference.0].parent else {
            return false;
        };
        if self.is_in_subtree(parent, node) {
            return false;
        }
        let Some(idx) = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == reference)
        else {
            return false;
        };
        self.nodes[node.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(idx, node);
        self.notify_inserted(node);
        true
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    fn notify_inserted(&mut self, root: NodeId) {
        if self.observers.is_empty() || !self.is_connected(root) {
            return;
        }
        let record = MutationRecord {
            inserted: vec![root],
        };
        self.observers
            .retain(|tx| tx.send(record.clone()).is_ok());
    }

    fn descendant_elements(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if matches!(self.nodes[id.0].kind, NodeKind::Element { .. }) {
                out.push(id);
            }
            for child in self.nodes[id.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

/// Shared handle to one document. Clone one per execution context.
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<DomTree>>,
}

impl Document {
    /// Parse a fully loaded HTML document.
    pub fn from_html(html: &str) -> Self {
        Self {
            tree: Rc::new(RefCell::new(parse::parse_document(html, None))),
        }
    }

    /// Parse an HTML document with a base URL for resolving relative sources.
    pub fn from_html_with_base(html: &str, base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid base url: {base}"))?;
        Ok(Self {
            tree: Rc::new(RefCell::new(parse::parse_document(html, Some(base)))),
        })
    }

    /// The root element (`<html>`).
    pub fn root(&self) -> NodeId {
        self.tree.borrow().root
    }

    /// Base URL the document was parsed with, if any.
    pub fn base_url(&self) -> Option<Url> {
        self.tree.borrow().base.clone()
    }

    /// Lowercased tag name; `None` for text nodes.
    pub fn tag_name(&self, id: NodeId) -> Option<String> {
        self.tree.borrow().tag_name(id).map(str::to_string)
    }

    /// Attribute lookup; names are case-insensitive.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.tree.borrow().attr(id, name).map(str::to_string)
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.tree.borrow().attr(id, name).is_some()
    }

    pub fn set_attr(&self, id: NodeId, name: &str, value: &str) {
        self.tree.borrow_mut().set_attr(id, name, value);
    }

    pub fn remove_attr(&self, id: NodeId, name: &str) {
        self.tree.borrow_mut().remove_attr(id, name);
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.tree.borrow().nodes[id.0].parent
    }

    /// Element children only, in order.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        tree.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|c| tree.tag_name(*c).is_some())
            .collect()
    }

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().new_element(tag, Vec::new())
    }

    /// Append a detached node; returns false if the node is already attached
    /// or the append would create a cycle.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> bool {
        self.tree.borrow_mut().append_child(parent, child)
    }

    /// Insert a detached node immediately before `reference`; returns false
    /// if `reference` has no parent.
    pub fn insert_before(&self, node: NodeId, reference: NodeId) -> bool {
        self.tree.borrow_mut().insert_before(node, reference)
    }

    /// Remove a node (and its subtree) from its parent. The id stays valid
    /// but the node is no longer connected.
    pub fn detach(&self, id: NodeId) {
        self.tree.borrow_mut().detach(id);
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.tree.borrow().is_connected(id)
    }

    /// All connected elements in document order.
    pub fn document_elements(&self) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        tree.descendant_elements(tree.root)
    }

    /// `root` and its descendant elements in document order.
    pub fn descendant_elements(&self, root: NodeId) -> Vec<NodeId> {
        self.tree.borrow().descendant_elements(root)
    }

    /// Subscribe to subtree insertions. Records arrive in insertion order;
    /// each subscriber gets every record from the point of subscription.
    pub fn observe_insertions(&self) -> mpsc::UnboundedReceiver<MutationRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tree.borrow_mut().observers.push(tx);
        rx
    }

    /// Whether the host has signalled the document is fully loaded.
    pub fn is_ready(&self) -> bool {
        *self.tree.borrow().ready.borrow()
    }

    /// Host hook: the document is still streaming in.
    pub fn set_loading(&self) {
        // send_replace, not send: the flag must be stored even while nobody
        // is awaiting `ready()` yet.
        self.tree.borrow().ready.send_replace(false);
    }

    /// Host hook: fires the one-time document-ready event.
    pub fn set_ready(&self) {
        self.tree.borrow().ready.send_replace(true);
    }

    /// Resolve once the document is ready; immediate if it already is.
    pub async fn ready(&self) {
        let mut rx = self.tree.borrow().ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
