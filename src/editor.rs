use std::sync::Arc;

use parking_lot::RwLock;

/// The single request-body buffer of a console session.
///
/// Created once together with the session and handed to every stage that
/// reads or writes it. Content is only ever replaced wholesale; each
/// replacement bumps a revision counter so callers can tell a fresh
/// template from an operator edit.
#[derive(Clone, Default)]
pub struct EditorBuffer {
    inner: Arc<RwLock<EditorState>>,
}

#[derive(Default)]
struct EditorState {
    text: String,
    revision: u64,
    populated: bool,
}

impl EditorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole buffer with `content`.
    pub fn set_value(&self, content: impl Into<String>) {
        let mut state = self.inner.write();
        state.text = content.into();
        state.revision += 1;
        state.populated = true;
    }

    /// Current buffer text, exactly as it will be sent.
    pub fn value(&self) -> String {
        self.inner.read().text.clone()
    }

    /// Number of replacements so far.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Whether anything has ever been written into the buffer.
    pub fn is_populated(&self) -> bool {
        self.inner.read().populated
    }

    /// True when both handles point at the same buffer.
    pub fn same_buffer(&self, other: &EditorBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for EditorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("EditorBuffer")
            .field("len", &state.text.len())
            .field("revision", &state.revision)
            .finish()
    }
}
