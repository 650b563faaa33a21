//! Single invokes and load tests against the selected method.
//!
//! Both share one lifecycle: the response panel is hidden when the request
//! starts and shown only after a successful reply. The gateway owns all
//! load-generation semantics; the console sends the same body either way.

use crate::backend::{Backend, BackendError, InvokeKind, InvokeReply, InvokeRequest};
use crate::discovery::Applied;
use crate::session::Session;
use crate::view::{Busy, ResponseView, View};

/// An invoke or load test in flight.
#[must_use = "an invocation must be passed back to finish"]
pub struct Invocation {
    pub request: InvokeRequest,
    generation: u64,
    _busy: Busy,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("request", &self.request)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Issues invocations and applies their replies to the view.
#[derive(Debug, Default)]
pub struct InvocationClient {
    generation: u64,
}

impl InvocationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an invocation of the selected method with the editor's text.
    ///
    /// Without a selected method (or a connected target) nothing is sent
    /// and the view is left as it is.
    pub fn begin(
        &mut self,
        kind: InvokeKind,
        session: &mut Session,
        view: &mut View,
    ) -> Option<Invocation> {
        let method = view.methods.selected_option()?.value.clone();
        let target = session.target()?.to_string();

        self.generation += 1;
        view.panels.response = false;
        let control = match kind {
            InvokeKind::Invoke => &view.invoke,
            InvokeKind::LoadTest => &view.load_test,
        };
        let busy = Busy::start(&view.spinner, Some(control));
        tracing::debug!(%kind, rpc_target = %target, %method, "sending request");

        Some(Invocation {
            request: InvokeRequest {
                kind,
                target,
                method,
                body: session.editor().value(),
                ctx: session.request_context(),
            },
            generation: self.generation,
            _busy: busy,
        })
    }

    /// Apply a reply. Replies from superseded invocations, or for a method
    /// that is no longer selected, are dropped.
    pub fn finish(
        &mut self,
        view: &mut View,
        invocation: Invocation,
        result: Result<InvokeReply, BackendError>,
    ) -> Applied {
        let still_selected = view
            .methods
            .selected_option()
            .is_some_and(|o| o.value == invocation.request.method);
        if invocation.generation != self.generation || !still_selected {
            tracing::debug!(generation = invocation.generation, "dropping stale reply");
            return Applied::Stale;
        }

        match result {
            Ok(reply) => {
                tracing::info!(
                    kind = %invocation.request.kind,
                    method = %invocation.request.method,
                    timer = %reply.timer,
                    "reply received"
                );
                view.response = Some(ResponseView {
                    result: pretty_result(&reply.result),
                    timer: reply.timer,
                });
                view.panels.response = true;
                Applied::Ready
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(kind = %invocation.request.kind, error = %message, "request failed");
                view.alert(message.clone());
                Applied::Failed(message)
            }
        }
    }

    /// Invoke the selected method once. `None` means nothing was sent.
    pub async fn invoke(
        &mut self,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
    ) -> Option<Applied> {
        self.run(InvokeKind::Invoke, backend, session, view).await
    }

    /// Load test the selected method. `None` means nothing was sent.
    pub async fn load_test(
        &mut self,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
    ) -> Option<Applied> {
        self.run(InvokeKind::LoadTest, backend, session, view).await
    }

    async fn run(
        &mut self,
        kind: InvokeKind,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
    ) -> Option<Applied> {
        let invocation = self.begin(kind, session, view)?;
        let result = backend.invoke(&invocation.request).await;
        Some(self.finish(view, invocation, result))
    }
}

/// Re-indent a JSON result; anything else is shown as received.
pub fn pretty_result(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| raw.to_string())
}
