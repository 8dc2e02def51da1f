//! HTML ingestion — raw markup to the node arena, no rendering.

use super::DomTree;
use crate::dom::NodeId;
use scraper::{ElementRef, Html};
use url::Url;

/// Parse raw HTML into a [`DomTree`]. Tag and attribute names are lowercased
/// on the way in so all later lookups are case-insensitive.
pub(super) fn parse_document(html: &str, base: Option<Url>) -> DomTree {
    let parsed = Html::parse_document(html);
    let root = parsed.root_element();
    let mut tree = DomTree::with_root(root.value().name(), collect_attrs(root), base);
    let root_id = tree.root;
    for child in root.children() {
        if let Some(el) = ElementRef::wrap(child) {
            append_element(&mut tree, root_id, el);
        } else if let Some(text) = child.value().as_text() {
            append_text(&mut tree, root_id, text);
        }
    }
    tree
}

fn append_element(tree: &mut DomTree, parent: NodeId, el: ElementRef) {
    let id = tree.new_element(el.value().name(), collect_attrs(el));
    tree.append_child(parent, id);
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            append_element(tree, id, child_el);
        } else if let Some(text) = child.value().as_text() {
            append_text(tree, id, text);
        }
    }
}

fn append_text(tree: &mut DomTree, parent: NodeId, text: &scraper::node::Text) {
    let text: &str = text;
    if !text.trim().is_empty() {
        let id = tree.new_text(text);
        tree.append_child(parent, id);
    }
}

fn collect_attrs(el: ElementRef) -> Vec<(String, String)> {
    el.value()
        .attrs()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
        .collect()
}
