//! Replaying a shared link through the discovery cascade.
//!
//! A link is consumed one key at a time: the target when the console starts,
//! the service once services are listed, the method once methods are listed.
//! Each key is used at most once, so later manual reconnects are not
//! hijacked by the link.

use crate::backend::Backend;
use crate::discovery::{Applied, Pipeline};
use crate::query::{self, ShareLinkQuery, ShareLinkState};
use crate::session::Session;
use crate::view::{Selector, View};

/// Namespace assumed for a bare service name in a link.
pub const DEFAULT_NAMESPACE: &str = "proto";

/// Pending keys of a shared link.
#[derive(Debug, Clone, Default)]
pub struct DeepLink {
    pending: ShareLinkQuery,
}

impl DeepLink {
    pub fn from_url(url: &str) -> Self {
        Self {
            pending: query::decode(url),
        }
    }

    /// Whether any key is still waiting to be replayed.
    pub fn is_pending(&self) -> bool {
        self.pending.target.is_some() || self.pending.service.is_some() || self.pending.method.is_some()
    }

    /// Drop every pending key. Called when a stage the link drove failed, so
    /// a later manual connect is not steered by the leftovers.
    pub fn abandon(&mut self) {
        if self.is_pending() {
            tracing::debug!("abandoning shared link");
        }
        self.pending = ShareLinkQuery::default();
    }

    /// Fill the target field from the link. Returns whether a connect should
    /// follow.
    pub fn apply_target(&mut self, session: &mut Session) -> bool {
        match self.pending.target.take().filter(|t| !t.trim().is_empty()) {
            Some(target) => {
                tracing::info!(rpc_target = %target, "replaying shared link");
                session.target_field = target;
                true
            }
            None => {
                // Nothing to connect to, so nothing downstream can apply.
                self.pending = ShareLinkQuery::default();
                false
            }
        }
    }

    /// Service to select now that services are listed.
    ///
    /// A bare name without a `.` is looked up in the `proto` namespace.
    pub fn take_service(&mut self, view: &View) -> Option<String> {
        let wanted = self.pending.service.take().filter(|s| !s.is_empty())?;
        let wanted = if wanted.contains('.') {
            wanted
        } else {
            format!("{DEFAULT_NAMESPACE}.{wanted}")
        };
        let found = view
            .services
            .choices()
            .find(|o| o.label == wanted)
            .map(|o| o.value.clone());
        if found.is_none() {
            tracing::warn!(service = %wanted, "shared service not offered by target");
            self.pending.method = None;
        }
        found
    }

    /// Method to select now that methods are listed. Matches the full
    /// identifier, the display label, or the label with a leading `.` as the
    /// web console writes it (`.SayHello`).
    pub fn take_method(&mut self, view: &View) -> Option<String> {
        let wanted = self.pending.method.take().filter(|m| !m.is_empty())?;
        let short = wanted.strip_prefix('.').unwrap_or(&wanted);
        let found = view
            .methods
            .choices()
            .find(|o| o.value == wanted || o.label == wanted || o.label == short)
            .map(|o| o.value.clone());
        if found.is_none() {
            tracing::warn!(method = %wanted, "shared method not offered by service");
        }
        found
    }
}

/// How far a replay got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// The link carried no target.
    Nothing,
    /// The cascade stopped after the named number of applied stages.
    Stopped { stages: usize, last: Option<Applied> },
    /// Services, methods and schema were all loaded.
    Complete,
}

/// Replay `link` sequentially: connect, then select service, then method,
/// each only after the previous stage succeeded.
pub async fn replay(
    link: &mut DeepLink,
    pipeline: &mut Pipeline,
    backend: &Backend,
    session: &mut Session,
    view: &mut View,
) -> Replay {
    if !link.apply_target(session) {
        return Replay::Nothing;
    }

    let applied = pipeline.connect(backend, session, view, false).await;
    if applied != Some(Applied::Ready) {
        link.abandon();
        return Replay::Stopped { stages: 0, last: applied };
    }

    let Some(service) = link.take_service(view) else {
        return Replay::Stopped { stages: 1, last: applied };
    };
    let applied = pipeline.select_service(backend, session, view, &service).await;
    if applied != Some(Applied::Ready) {
        link.abandon();
        return Replay::Stopped { stages: 1, last: applied };
    }

    let Some(method) = link.take_method(view) else {
        return Replay::Stopped { stages: 2, last: applied };
    };
    match pipeline.select_method(backend, session, view, &method).await {
        Some(Applied::Ready) => Replay::Complete,
        last => Replay::Stopped { stages: 2, last },
    }
}

/// Snapshot of the current selections for a share link.
pub fn share_state(session: &Session, view: &View) -> ShareLinkState {
    ShareLinkState {
        target: session.target_field.trim().to_string(),
        service: view
            .services
            .selected_option()
            .map(|o| o.label.clone())
            .unwrap_or_default(),
        method: view
            .methods
            .selected_option()
            .map(|o| link_method(&view.services, &o.value))
            .unwrap_or_default(),
    }
}

/// Method key for a link: the identifier minus the selected service, keeping
/// the joining dot (`.SayHello`), so the web console can replay it too.
/// Identifiers outside the service are written whole.
fn link_method(services: &Selector, method: &str) -> String {
    services
        .selected_option()
        .and_then(|s| method.strip_prefix(s.value.as_str()))
        .filter(|rest| rest.len() > 1 && rest.starts_with('.'))
        .unwrap_or(method)
        .to_string()
}
