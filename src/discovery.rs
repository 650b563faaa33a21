//! The service -> method -> schema discovery cascade.
//!
//! Each stage is split in two halves. `begin_*` decides whether a request is
//! needed at all, invalidates everything downstream, and hands back a
//! [`Ticket`] holding the request plus a generation token. `finish_*` takes
//! the ticket and the backend result and applies it, unless a newer request
//! for the same (or an upstream) stage has been issued since, in which case
//! the result is discarded as stale.
//!
//! The split lets the console run backend calls off the event loop while
//! every state mutation stays on it. The async helpers at the bottom run
//! both halves back to back for callers that don't need that.

use crate::backend::{
    Backend, BackendError, DescribeRequest, MethodDescriptor, MethodsRequest, ServicesRequest,
};
use crate::session::Session;
use crate::view::{Busy, SelectOption, View, CHOOSE_METHOD, CHOOSE_SERVICE};

/// Which step of the cascade a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    Services = 0,
    Methods = 1,
    Schema = 2,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Services => write!(f, "services"),
            StageKind::Methods => write!(f, "methods"),
            StageKind::Schema => write!(f, "schema"),
        }
    }
}

/// Where the cascade currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    ServicesLoading,
    ServicesReady,
    MethodsLoading,
    MethodsReady,
    SchemaLoading,
    SchemaReady,
    Failed {
        stage: StageKind,
        message: String,
    },
}

/// An issued request waiting for its backend result.
///
/// Holds the loading feedback for the request; dropping the ticket (after
/// `finish_*`, or because the task carrying it died) ends it.
#[must_use = "a ticket must be passed back to finish_*"]
pub struct Ticket<R> {
    pub request: R,
    generation: u64,
    _busy: Busy,
}

impl<R> Ticket<R> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for Ticket<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("request", &self.request)
            .field("generation", &self.generation)
            .finish()
    }
}

/// What `finish_*` did with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The stage completed and its view state is populated.
    Ready,
    /// A newer request superseded this one; nothing changed.
    Stale,
    /// The backend reported an error; it was raised as an alert.
    Failed(String),
}

impl Applied {
    pub fn is_ready(&self) -> bool {
        matches!(self, Applied::Ready)
    }
}

/// State machine driving the discovery cascade.
#[derive(Debug, Default)]
pub struct Pipeline {
    stage: Stage,
    last_generation: u64,
    /// Generation each stage's result must carry to be applied.
    current: [u64; 3],
    /// Service the method list was fetched under.
    methods_for: Option<String>,
    /// Method the descriptor was fetched under.
    described: Option<String>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Method whose template and schema are currently loaded.
    pub fn described_method(&self) -> Option<&str> {
        self.described.as_deref()
    }

    /// Issue a generation for `kind`, superseding in-flight requests of that
    /// stage and every stage below it.
    fn issue(&mut self, kind: StageKind) -> u64 {
        self.last_generation += 1;
        for slot in &mut self.current[kind as usize..] {
            *slot = self.last_generation;
        }
        self.last_generation
    }

    fn is_current(&self, kind: StageKind, generation: u64) -> bool {
        self.current[kind as usize] == generation
    }

    fn fail(&mut self, view: &mut View, stage: StageKind, err: BackendError) -> Applied {
        let message = err.to_string();
        tracing::warn!(%stage, error = %message, "discovery stage failed");
        view.alert(message.clone());
        self.stage = Stage::Failed {
            stage,
            message: message.clone(),
        };
        Applied::Failed(message)
    }

    // ── Stage 1: services ──────────────────────────────────────────

    /// Start a services fetch for the session's target field.
    ///
    /// Returns `None` without touching anything when there is no target, or
    /// when the target is the one already fetched and neither `restart` nor
    /// local-proto mode asks for a refetch.
    pub fn begin_services(
        &mut self,
        session: &mut Session,
        view: &mut View,
        restart: bool,
    ) -> Option<Ticket<ServicesRequest>> {
        let target = session.resolve_target()?;
        let local_proto = session.use_local_proto();
        if session.target() == Some(target.as_str()) && !restart && !local_proto {
            tracing::debug!(rpc_target = %target, "target unchanged, skipping services fetch");
            return None;
        }

        session.set_target(target.clone());
        let generation = self.issue(StageKind::Services);

        view.panels.service_selector = false;
        view.panels.hide_downstream_of_services();
        view.services.clear();
        view.methods.clear();
        view.response = None;
        self.methods_for = None;
        self.described = None;
        self.stage = Stage::ServicesLoading;

        let protos = local_proto.then(|| session.local_protos.clone());
        tracing::debug!(rpc_target = %target, restart, local_proto, generation, "fetching services");

        Some(Ticket {
            request: ServicesRequest {
                target,
                restart,
                protos,
                ctx: session.request_context(),
            },
            generation,
            _busy: Busy::start(&view.spinner, Some(&view.connect)),
        })
    }

    pub fn finish_services(
        &mut self,
        session: &mut Session,
        view: &mut View,
        ticket: Ticket<ServicesRequest>,
        result: Result<Vec<String>, BackendError>,
    ) -> Applied {
        if !self.is_current(StageKind::Services, ticket.generation) {
            tracing::debug!(generation = ticket.generation, "dropping stale services reply");
            return Applied::Stale;
        }

        match result {
            Ok(services) => {
                tracing::info!(rpc_target = %ticket.request.target, count = services.len(), "services loaded");
                view.services.replace(
                    CHOOSE_SERVICE,
                    services.into_iter().map(|s| SelectOption {
                        label: s.clone(),
                        value: s,
                    }),
                );
                view.panels.service_selector = true;
                self.stage = Stage::ServicesReady;
                Applied::Ready
            }
            Err(err) => {
                session.clear_connection();
                self.fail(view, StageKind::Services, err)
            }
        }
    }

    // ── Stage 2: methods ───────────────────────────────────────────

    /// Start a methods fetch for `service`.
    ///
    /// The placeholder (empty value), an unknown service, or a session with
    /// no connected target is a no-op.
    pub fn begin_methods(
        &mut self,
        session: &mut Session,
        view: &mut View,
        service: &str,
    ) -> Option<Ticket<MethodsRequest>> {
        if service.is_empty() {
            return None;
        }
        let target = session.target()?.to_string();
        if !view.services.choices().any(|o| o.value == service) {
            tracing::debug!(%service, "not a listed service");
            return None;
        }

        let generation = self.issue(StageKind::Methods);
        view.services.selected = Some(service.to_string());
        view.methods.selected = None;
        view.panels.hide_downstream_of_services();
        self.described = None;
        self.stage = Stage::MethodsLoading;
        tracing::debug!(rpc_target = %target, %service, generation, "fetching methods");

        Some(Ticket {
            request: MethodsRequest {
                target,
                service: service.to_string(),
                ctx: session.request_context(),
            },
            generation,
            _busy: Busy::start(&view.spinner, None),
        })
    }

    pub fn finish_methods(
        &mut self,
        view: &mut View,
        ticket: Ticket<MethodsRequest>,
        result: Result<Vec<String>, BackendError>,
    ) -> Applied {
        if !self.is_current(StageKind::Methods, ticket.generation) {
            tracing::debug!(generation = ticket.generation, "dropping stale methods reply");
            return Applied::Stale;
        }

        match result {
            Ok(methods) => {
                let service = ticket.request.service;
                tracing::info!(%service, count = methods.len(), "methods loaded");
                view.methods.replace(
                    CHOOSE_METHOD,
                    methods.into_iter().map(|m| SelectOption {
                        label: method_label(&service, &m).to_string(),
                        value: m,
                    }),
                );
                view.panels.method_selector = true;
                self.methods_for = Some(service);
                self.stage = Stage::MethodsReady;
                Applied::Ready
            }
            Err(err) => self.fail(view, StageKind::Methods, err),
        }
    }

    // ── Stage 3: schema ────────────────────────────────────────────

    /// Start a describe for `method` (full identifier).
    ///
    /// The placeholder, a method outside the current service's list, or a
    /// list fetched under another service is a no-op.
    pub fn begin_schema(
        &mut self,
        session: &mut Session,
        view: &mut View,
        method: &str,
    ) -> Option<Ticket<DescribeRequest>> {
        if method.is_empty() {
            return None;
        }
        let target = session.target()?.to_string();
        if self.methods_for.is_none() || self.methods_for != view.services.selected {
            tracing::debug!(%method, "method list does not belong to the selected service");
            return None;
        }
        if !view.methods.choices().any(|o| o.value == method) {
            tracing::debug!(%method, "not a listed method");
            return None;
        }

        let generation = self.issue(StageKind::Schema);
        view.methods.selected = Some(method.to_string());
        view.panels.request_body = false;
        view.panels.response = false;
        self.described = None;
        self.stage = Stage::SchemaLoading;
        tracing::debug!(rpc_target = %target, %method, generation, "describing method");

        Some(Ticket {
            request: DescribeRequest {
                target,
                method: method.to_string(),
                ctx: session.request_context(),
            },
            generation,
            _busy: Busy::start(&view.spinner, None),
        })
    }

    pub fn finish_schema(
        &mut self,
        session: &Session,
        view: &mut View,
        ticket: Ticket<DescribeRequest>,
        result: Result<MethodDescriptor, BackendError>,
    ) -> Applied {
        if !self.is_current(StageKind::Schema, ticket.generation) {
            tracing::debug!(generation = ticket.generation, "dropping stale describe reply");
            return Applied::Stale;
        }

        match result {
            Ok(descriptor) => {
                session.editor().set_value(descriptor.template);
                view.schema = Some(descriptor.schema);
                view.panels.request_body = true;
                self.described = Some(ticket.request.method);
                self.stage = Stage::SchemaReady;
                Applied::Ready
            }
            Err(err) => self.fail(view, StageKind::Schema, err),
        }
    }

    // ── Sequential drivers ─────────────────────────────────────────

    /// Fetch services and apply the result. `None` means nothing was sent.
    pub async fn connect(
        &mut self,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
        restart: bool,
    ) -> Option<Applied> {
        let ticket = self.begin_services(session, view, restart)?;
        let result = backend.list_services(&ticket.request).await;
        Some(self.finish_services(session, view, ticket, result))
    }

    /// Select a service, fetch its methods and apply the result.
    pub async fn select_service(
        &mut self,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
        service: &str,
    ) -> Option<Applied> {
        let ticket = self.begin_methods(session, view, service)?;
        let result = backend.list_methods(&ticket.request).await;
        Some(self.finish_methods(view, ticket, result))
    }

    /// Select a method, describe it and apply the result.
    pub async fn select_method(
        &mut self,
        backend: &Backend,
        session: &mut Session,
        view: &mut View,
        method: &str,
    ) -> Option<Applied> {
        let ticket = self.begin_schema(session, view, method)?;
        let result = backend.describe(&ticket.request).await;
        Some(self.finish_schema(session, view, ticket, result))
    }
}

/// Display label of a method: the full identifier minus the service prefix
/// and its joining dot. Identifiers outside the service are shown whole.
pub fn method_label<'a>(service: &str, full: &'a str) -> &'a str {
    if service.is_empty() {
        return full;
    }
    match full.strip_prefix(service) {
        Some(rest) => {
            let rest = rest.strip_prefix('.').unwrap_or(rest);
            if rest.is_empty() {
                full
            } else {
                rest
            }
        }
        None => full,
    }
}
