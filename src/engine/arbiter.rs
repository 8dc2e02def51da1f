//! Cross-context leader election over shared DOM attributes.
//!
//! Several isolated script contexts (an injected extension agent, an in-page
//! bootstrap) may each try to initialize the engine for the same document.
//! They share no memory — only the document root's attributes. The medium has
//! no compare-and-swap, so a candidate writes its claim, defers one macrotask
//! (or waits for document ready), and rechecks that its claim survived before
//! initializing. The deferred recheck is the correctness mechanism, not an
//! optimization: a read in `register` can be staled by a concurrent writer
//! before this context runs again.

use crate::dom::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared attribute carrying the claiming agent's version.
pub const ATTR_VERSION: &str = "data-proscenium-version";
/// Shared attribute carrying the claiming agent's source kind.
pub const ATTR_SOURCE: &str = "data-proscenium-source";
/// Presence-only shared attribute; set exactly once, never removed.
pub const ATTR_INITIALIZED: &str = "data-proscenium-initialized";

/// Which kind of agent a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Externally injected agent (e.g. a browser extension's content script).
    Primary,
    /// Self-bootstrapping in-page agent shipped with the document.
    Fallback,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::Fallback => "fallback",
        }
    }

    /// Parse the wire token. Unknown tokens read as `Primary`, the weaker
    /// kind, so a well-formed fallback can still take over from a malformed
    /// writer.
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("fallback") {
            SourceKind::Fallback
        } else {
            SourceKind::Primary
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dotted-integer version tuple, compared lexicographically with missing
/// trailing components as 0. Parsing never fails: malformed components read
/// as 0.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SemVer(Vec<u64>);

impl SemVer {
    /// Components are normalized by dropping trailing zeros, so `1.0.0` and
    /// `1` are the same version and plain `Vec` ordering is the zero-extended
    /// lexicographic order.
    pub fn parse(s: &str) -> Self {
        let mut components: Vec<u64> = s
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect();
        while components.last() == Some(&0) {
            components.pop();
        }
        SemVer(components)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let joined: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&joined.join("."))
    }
}

/// One candidate's written claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub version: SemVer,
    pub source: SourceKind,
    /// The version string exactly as the candidate supplied it; this is what
    /// goes on the wire so other contexts see the original spelling.
    wire_version: String,
}

impl Claim {
    pub fn version_string(&self) -> &str {
        &self.wire_version
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The claim was written; the caller must schedule the deferred
    /// confirmation and may still be superseded before it fires.
    Claimed(Claim),
    /// Another candidate holds priority, or the document is already
    /// initialized. No side effect was performed.
    Deferred,
}

/// Arbiter over one document's shared negotiation attributes.
#[derive(Clone)]
pub struct NegotiationArbiter {
    doc: Document,
}

impl NegotiationArbiter {
    pub fn new(doc: Document) -> Self {
        Self { doc }
    }

    /// Whether some context has completed initialization. Terminal.
    pub fn is_initialized(&self) -> bool {
        self.doc.has_attr(self.doc.root(), ATTR_INITIALIZED)
    }

    /// Read the current claim from the shared attributes, if any.
    pub fn read_claim(&self) -> Option<Claim> {
        let root = self.doc.root();
        let wire_version = self.doc.attr(root, ATTR_VERSION)?;
        let source = self
            .doc
            .attr(root, ATTR_SOURCE)
            .map(|s| SourceKind::parse(&s))
            .unwrap_or(SourceKind::Primary);
        Some(Claim {
            version: SemVer::parse(&wire_version),
            source,
            wire_version,
        })
    }

    /// Attempt to claim the right to initialize this document.
    ///
    /// A candidate beats an existing claim iff its version is strictly
    /// higher, or the versions are equal and the candidate is a fallback
    /// agent while the incumbent is primary. The tie-break is fixed protocol,
    /// not configurable.
    pub fn register(&self, version: &str, source: SourceKind) -> RegisterOutcome {
        if self.is_initialized() {
            return RegisterOutcome::Deferred;
        }

        let candidate = Claim {
            version: SemVer::parse(version),
            source,
            wire_version: version.to_string(),
        };

        if let Some(existing) = self.read_claim() {
            let wins = candidate.version > existing.version
                || (candidate.version == existing.version
                    && candidate.source == SourceKind::Fallback
                    && existing.source == SourceKind::Primary);
            if !wins {
                tracing::debug!(
                    candidate = %candidate.version,
                    incumbent = %existing.version,
                    "negotiation deferred to incumbent claim"
                );
                return RegisterOutcome::Deferred;
            }
        }

        self.write_claim(&candidate);
        RegisterOutcome::Claimed(candidate)
    }

    /// Deferred confirmation: if the shared attributes still carry `claim`
    /// and nobody initialized meanwhile, set the initialized flag and return
    /// true. Otherwise another context took over; return false.
    ///
    /// Claims are compared on parsed version and source, so a cosmetically
    /// different spelling of the same claim cannot cause a spurious abort.
    pub fn confirm(&self, claim: &Claim) -> bool {
        if self.is_initialized() {
            return false;
        }
        match self.read_claim() {
            Some(current)
                if current.version == claim.version && current.source == claim.source =>
            {
                self.doc.set_attr(self.doc.root(), ATTR_INITIALIZED, "");
                true
            }
            _ => false,
        }
    }

    fn write_claim(&self, claim: &Claim) {
        let root = self.doc.root();
        self.doc.set_attr(root, ATTR_VERSION, &claim.wire_version);
        self.doc.set_attr(root, ATTR_SOURCE, claim.source.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::from_html("<html><body></body></html>")
    }

    #[test]
    fn test_semver_ordering() {
        assert!(SemVer::parse("2.0.0") > SemVer::parse("1.9.9"));
        assert!(SemVer::parse("1.10") > SemVer::parse("1.9"));
        assert!(SemVer::parse("1.0.1") > SemVer::parse("1"));
        assert_eq!(SemVer::parse("1.0.0"), SemVer::parse("1"));
        assert_eq!(SemVer::parse(""), SemVer::parse("0.0"));
    }

    #[test]
    fn test_semver_malformed_components_read_as_zero() {
        assert_eq!(SemVer::parse("1.x.3"), SemVer::parse("1.0.3"));
        assert_eq!(SemVer::parse("garbage"), SemVer::parse("0"));
        assert!(SemVer::parse("1.2") > SemVer::parse("1.bogus"));
    }

    #[test]
    fn test_semver_display() {
        assert_eq!(SemVer::parse("1.2.3").to_string(), "1.2.3");
        assert_eq!(SemVer::parse("0.0.0").to_string(), "0");
    }

    #[test]
    fn test_first_register_claims() {
        let arbiter = NegotiationArbiter::new(doc());
        let outcome = arbiter.register("1.0.0", SourceKind::Primary);
        assert!(matches!(outcome, RegisterOutcome::Claimed(_)));
        let claim = arbiter.read_claim().unwrap();
        assert_eq!(claim.version_string(), "1.0.0");
        assert_eq!(claim.source, SourceKind::Primary);
    }

    #[test]
    fn test_higher_version_overwrites() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("1.0.0", SourceKind::Primary);
        let outcome = arbiter.register("1.1.0", SourceKind::Primary);
        assert!(matches!(outcome, RegisterOutcome::Claimed(_)));
        assert_eq!(arbiter.read_claim().unwrap().version_string(), "1.1.0");
    }

    #[test]
    fn test_lower_version_defers() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("2.0.0", SourceKind::Fallback);
        let outcome = arbiter.register("1.5.0", SourceKind::Primary);
        assert_eq!(outcome, RegisterOutcome::Deferred);
        assert_eq!(arbiter.read_claim().unwrap().version_string(), "2.0.0");
    }

    #[test]
    fn test_same_version_fallback_beats_primary() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("1.0.0", SourceKind::Primary);
        let outcome = arbiter.register("1.0.0", SourceKind::Fallback);
        assert!(matches!(outcome, RegisterOutcome::Claimed(_)));
        assert_eq!(arbiter.read_claim().unwrap().source, SourceKind::Fallback);
    }

    #[test]
    fn test_same_version_primary_does_not_beat_fallback() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("1.0.0", SourceKind::Fallback);
        let outcome = arbiter.register("1.0.0", SourceKind::Primary);
        assert_eq!(outcome, RegisterOutcome::Deferred);
    }

    #[test]
    fn test_same_version_same_source_defers() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("1.0.0", SourceKind::Fallback);
        assert_eq!(
            arbiter.register("1.0.0", SourceKind::Fallback),
            RegisterOutcome::Deferred
        );
    }

    #[test]
    fn test_equivalent_spelling_counts_as_same_version() {
        let arbiter = NegotiationArbiter::new(doc());
        arbiter.register("1.0.0", SourceKind::Fallback);
        // "1.0" parses equal to "1.0.0": same version, same source — defer.
        assert_eq!(
            arbiter.register("1.0", SourceKind::Fallback),
            RegisterOutcome::Deferred
        );
    }

    #[test]
    fn test_confirm_succeeds_when_claim_survives() {
        let arbiter = NegotiationArbiter::new(doc());
        let RegisterOutcome::Claimed(claim) = arbiter.register("1.0.0", SourceKind::Primary)
        else {
            panic!("expected claim");
        };
        assert!(arbiter.confirm(&claim));
        assert!(arbiter.is_initialized());
        // Initialization is terminal: the same claim cannot confirm twice.
        assert!(!arbiter.confirm(&claim));
    }

    #[test]
    fn test_confirm_fails_after_overwrite() {
        let arbiter = NegotiationArbiter::new(doc());
        let RegisterOutcome::Claimed(first) = arbiter.register("1.0.0", SourceKind::Primary)
        else {
            panic!("expected claim");
        };
        let RegisterOutcome::Claimed(second) = arbiter.register("1.0.0", SourceKind::Fallback)
        else {
            panic!("expected claim");
        };
        assert!(!arbiter.confirm(&first));
        assert!(arbiter.confirm(&second));
    }

    #[test]
    fn test_register_after_initialized_is_noop() {
        let arbiter = NegotiationArbiter::new(doc());
        let RegisterOutcome::Claimed(claim) = arbiter.register("1.0.0", SourceKind::Primary)
        else {
            panic!("expected claim");
        };
        arbiter.confirm(&claim);
        assert_eq!(
            arbiter.register("9.9.9", SourceKind::Fallback),
            RegisterOutcome::Deferred
        );
        // The winning claim is untouched.
        assert_eq!(arbiter.read_claim().unwrap().version_string(), "1.0.0");
    }
}
