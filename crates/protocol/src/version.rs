//! Protocol version negotiation.
//!
//! A caller may declare the protocol version it speaks through a header
//! (`X-Protocol-Version`) and/or a query parameter (`protocol_version`).
//! Negotiation runs before any other Hub logic for the request, and callers
//! that declare nothing pass through unconstrained so browsers and health
//! probes keep working.

/// Versions the Hub accepts. Extend by appending entries.
pub const SUPPORTED_VERSIONS: &[&str] = &["v1"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Header and query parameter disagree. Raised regardless of whether
    /// either value is itself supported.
    #[error("Conflicting protocol versions: header {header:?}, query {query:?}")]
    Conflicting { header: String, query: String },

    /// The declared version is not in [`SUPPORTED_VERSIONS`].
    #[error("unsupported protocol version {requested:?}; supported: {supported}")]
    Unsupported { requested: String, supported: String },
}

/// Resolve the effective protocol version from the two declaration sources.
///
/// Returns `Ok(None)` when neither source declares a version.
pub fn negotiate(
    header: Option<&str>,
    query: Option<&str>,
) -> Result<Option<&'static str>, VersionError> {
    let effective = match (header, query) {
        (None, None) => return Ok(None),
        (Some(h), Some(q)) if h != q => {
            return Err(VersionError::Conflicting {
                header: h.to_string(),
                query: q.to_string(),
            })
        }
        (Some(v), _) | (None, Some(v)) => v,
    };

    match SUPPORTED_VERSIONS.iter().find(|s| **s == effective) {
        Some(supported) => Ok(Some(supported)),
        None => Err(VersionError::Unsupported {
            requested: effective.to_string(),
            supported: supported_set_sorted(),
        }),
    }
}

/// The supported set, sorted, for actionable rejection messages.
fn supported_set_sorted() -> String {
    let mut set: Vec<&str> = SUPPORTED_VERSIONS.to_vec();
    set.sort_unstable();
    set.join(", ")
}
