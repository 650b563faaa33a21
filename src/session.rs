//! Per-console session state.
//!
//! Everything the discovery and invocation stages need to know about "where
//! are we connected and how" lives here and is passed to them explicitly.

use std::path::PathBuf;

use crate::backend::RequestContext;
use crate::editor::EditorBuffer;
use crate::target;

/// Mutable session state owned by the console.
#[derive(Debug, Default)]
pub struct Session {
    /// Raw target field, as typed (rewritten when a scheme is stripped).
    pub target_field: String,
    /// Target of the last services fetch. Cleared when that fetch fails.
    target: Option<String>,
    /// Whether the backend should dial the target over TLS.
    pub use_tls: bool,
    /// Raw metadata field.
    pub metadata_field: String,
    /// Local proto files. Non-empty means local-proto mode.
    pub local_protos: Vec<PathBuf>,
    editor: EditorBuffer,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the target field, rewriting it to the stripped form.
    pub fn resolve_target(&mut self) -> Option<String> {
        let resolved = target::resolve_target(&self.target_field, self.target.as_deref());
        let trimmed = self.target_field.trim();
        if !trimmed.is_empty() && target::strip_scheme(trimmed) != trimmed {
            if let Some(ref t) = resolved {
                self.target_field = t.clone();
            }
        }
        resolved
    }

    /// Resolve the metadata field, rewriting it to the stripped form.
    pub fn resolve_metadata(&mut self) -> String {
        let resolved = target::resolve_metadata(&self.metadata_field);
        let trimmed = self.metadata_field.trim();
        if target::strip_scheme(trimmed) != trimmed {
            self.metadata_field = resolved.clone();
        }
        resolved
    }

    /// Target the discovered state belongs to, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub(crate) fn set_target(&mut self, target: String) {
        self.target = Some(target);
    }

    /// Forget the connected target and TLS flag after a failed connect.
    pub(crate) fn clear_connection(&mut self) {
        self.target = None;
        self.use_tls = false;
    }

    pub fn use_local_proto(&self) -> bool {
        !self.local_protos.is_empty()
    }

    /// Request-scoped transport settings: TLS header and metadata.
    pub fn request_context(&mut self) -> RequestContext {
        RequestContext {
            use_tls: self.use_tls,
            metadata: self.resolve_metadata(),
        }
    }

    /// Handle to the session's request-body buffer.
    pub fn editor(&self) -> &EditorBuffer {
        &self.editor
    }
}
