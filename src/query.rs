//! Shareable deep-link state.
//!
//! A link carries `target`, `service` and `method` as plain query
//! parameters so that another operator can open the same console state.
//! Values are written verbatim, matching what the web console emits.

/// Snapshot of the current selections, built on demand for sharing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareLinkState {
    pub target: String,
    pub service: String,
    pub method: String,
}

/// The keys a link may carry. Missing keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareLinkQuery {
    pub target: Option<String>,
    pub service: Option<String>,
    pub method: Option<String>,
}

impl ShareLinkQuery {
    /// True when the link carries nothing worth replaying.
    pub fn is_empty(&self) -> bool {
        self.target.is_none()
    }
}

/// Encode a state as `target=<t>&service=<s>&method=<m>`. All three keys
/// are always present.
pub fn encode(state: &ShareLinkState) -> String {
    format!(
        "target={}&service={}&method={}",
        state.target, state.service, state.method
    )
}

/// Parse the query of `url` (the part after the first `?`).
///
/// A fragment, if any, is ignored. When a key repeats the last value wins.
/// Unknown keys are skipped.
pub fn decode(url: &str) -> ShareLinkQuery {
    let mut out = ShareLinkQuery::default();
    let Some((_, query)) = url.split_once('?') else {
        return out;
    };
    let query = query.split('#').next().unwrap_or_default();

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let slot = match key {
            "target" => &mut out.target,
            "service" => &mut out.service,
            "method" => &mut out.method,
            _ => continue,
        };
        *slot = Some(value.to_string());
    }
    out
}

/// Replace any query on `current_url` with the encoded `state`, or append
/// one when there is none.
pub fn build_share_link(current_url: &str, state: &ShareLinkState) -> String {
    let without_fragment = current_url.split('#').next().unwrap_or_default();
    let base = match without_fragment.split_once('?') {
        Some((base, _)) => base,
        None => without_fragment,
    };
    format!("{}?{}", base, encode(state))
}
