//! Element classification — which DOM elements are legacy movie embeds.
//!
//! Recognizes the two markup shapes legacy pages use for Director movies:
//! `<embed src="movie.dcr" ...>` and
//! `<object classid="clsid:..."><param name="src" value="movie.dcr">...</object>`,
//! including the dual form that nests an `<embed>` inside an `<object>` for
//! old cross-browser support. Classification never fails; anything that is
//! not a resolvable legacy embed is simply not a candidate.

use crate::dom::{Document, NodeId};
use std::collections::HashMap;
use url::Url;

/// File extension of the legacy movie format.
pub const MOVIE_EXTENSION: &str = ".dcr";

/// ActiveX class id of the legacy Director plugin, lowercased.
pub const LEGACY_CLASSID: &str = "clsid:166b1bca-3f9c-11cf-8075-444553540000";

/// Prefix of the 1-based indexed external parameters (`sw1`, `sw2`, ...).
pub const EXTERNAL_PARAM_PREFIX: &str = "sw";

/// Upper bound on the indexed scan. Extraction stops at the first missing
/// index; this cap only prevents unbounded scans.
pub const MAX_EXTERNAL_PARAMS: usize = 30;

/// A classified legacy element, ready for replacement.
///
/// Borrows the DOM node by id; once the pipeline detaches `target` the
/// candidate is spent and a second replacement attempt reports it as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateElement {
    /// Node the pipeline will detach — the `<embed>` itself, or its ancestor
    /// `<object>` in the nested dual-markup case.
    pub target: NodeId,
    /// Declared movie source, as written in the markup.
    pub src: String,
    /// Declared width; empty if absent.
    pub width: String,
    /// Declared height; empty if absent.
    pub height: String,
    /// Indexed external parameters in ascending index order.
    pub external_params: Vec<(String, String)>,
}

/// Classify one element. Returns `None` for anything that is not an eligible
/// legacy embed; never fails.
pub fn classify(doc: &Document, node: NodeId) -> Option<CandidateElement> {
    match doc.tag_name(node)?.as_str() {
        "embed" => classify_embed(doc, node),
        "object" => classify_object(doc, node),
        _ => None,
    }
}

fn classify_embed(doc: &Document, node: NodeId) -> Option<CandidateElement> {
    let src = doc.attr(node, "src")?;
    let base = doc.base_url();
    if !has_movie_extension(&src, base.as_ref()) {
        return None;
    }

    let mut target = node;
    let mut width = doc.attr(node, "width");
    let mut height = doc.attr(node, "height");

    // Dual markup: an <embed> that is the sole child of an eligible <object>
    // (ignoring the object's own <param> tags). Legacy pages often declare
    // conflicting sizes on the two tags; the outer container wins, and the
    // whole <object> is what gets replaced.
    if let Some(parent) = doc.parent(node) {
        if doc.tag_name(parent).as_deref() == Some("object")
            && is_eligible_object(doc, parent)
            && sole_embedded_child(doc, parent) == Some(node)
        {
            target = parent;
            width = doc.attr(parent, "width").or(width);
            height = doc.attr(parent, "height").or(height);
        }
    }

    Some(CandidateElement {
        target,
        src,
        width: width.unwrap_or_default(),
        height: height.unwrap_or_default(),
        external_params: extract_external_params(|name| doc.attr(node, name)),
    })
}

fn classify_object(doc: &Document, node: NodeId) -> Option<CandidateElement> {
    let params = object_param_map(doc, node);
    let base = doc.base_url();
    let by_classid = doc
        .attr(node, "classid")
        .is_some_and(|c| c.eq_ignore_ascii_case(LEGACY_CLASSID));
    let by_src = params
        .get("src")
        .is_some_and(|s| has_movie_extension(s, base.as_ref()));
    if !by_classid && !by_src {
        return None;
    }

    let Some(src) = params.get("src").cloned() else {
        // Recoverable: the nested <embed> path may still match this construct.
        tracing::warn!(
            "object matches legacy classid but has no src param; skipping"
        );
        return None;
    };

    Some(CandidateElement {
        target: node,
        src,
        width: doc.attr(node, "width").unwrap_or_default(),
        height: doc.attr(node, "height").unwrap_or_default(),
        external_params: extract_external_params(|name| params.get(name).cloned()),
    })
}

/// Whether an `<object>` is an eligible legacy container: reserved classid,
/// or a `src` param carrying the movie extension.
fn is_eligible_object(doc: &Document, node: NodeId) -> bool {
    if doc
        .attr(node, "classid")
        .is_some_and(|c| c.eq_ignore_ascii_case(LEGACY_CLASSID))
    {
        return true;
    }
    object_param_map(doc, node)
        .get("src")
        .is_some_and(|s| has_movie_extension(s, doc.base_url().as_ref()))
}

/// Child `<param name=.. value=..>` tags as a case-insensitive lookup map.
/// A repeated name keeps the last value.
fn object_param_map(doc: &Document, node: NodeId) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for child in doc.element_children(node) {
        if doc.tag_name(child).as_deref() != Some("param") {
            continue;
        }
        if let Some(name) = doc.attr(child, "name") {
            let value = doc.attr(child, "value").unwrap_or_default();
            map.insert(name.to_ascii_lowercase(), value);
        }
    }
    map
}

/// The object's sole non-`<param>` element child, if there is exactly one.
fn sole_embedded_child(doc: &Document, object: NodeId) -> Option<NodeId> {
    let mut found = None;
    for child in doc.element_children(object) {
        if doc.tag_name(child).as_deref() == Some("param") {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(child);
    }
    found
}

/// Read `sw1`, `sw2`, ... in ascending order. Stops at the first missing
/// index; `MAX_EXTERNAL_PARAMS` only bounds the scan.
fn extract_external_params<F>(lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = Vec::new();
    for index in 1..=MAX_EXTERNAL_PARAMS {
        let name = format!("{EXTERNAL_PARAM_PREFIX}{index}");
        match lookup(&name) {
            Some(value) => out.push((name, value)),
            None => break,
        }
    }
    out
}

/// Whether a raw source, resolved against the document base when present,
/// points at a legacy movie. Query strings and fragments are ignored.
fn has_movie_extension(raw: &str, base: Option<&Url>) -> bool {
    let path = match base {
        Some(base) => match base.join(raw) {
            Ok(resolved) => resolved.path().to_string(),
            Err(_) => strip_query(raw),
        },
        None => strip_query(raw),
    };
    path.to_ascii_lowercase().ends_with(MOVIE_EXTENSION)
}

fn strip_query(raw: &str) -> String {
    raw.split(['?', '#']).next().unwrap_or(raw).to_string()
}
