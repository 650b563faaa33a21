//! Presentation state shared by the discovery and invocation stages.
//!
//! The console renders from this model; the stages only flip panels, fill
//! option lists and queue alerts. Loading feedback is handled with guards so
//! a control can never be left stuck on its loading label.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Label shown on a control while its request is in flight.
pub const LOADING_LABEL: &str = "Loading...";

/// Text of the "no selection" option at the top of every selector.
pub const CHOOSE_SERVICE: &str = "Choose Service";
pub const CHOOSE_METHOD: &str = "Choose Method";

/// Visibility of the console's panels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Panels {
    pub service_selector: bool,
    pub method_selector: bool,
    pub request_body: bool,
    pub response: bool,
}

impl Panels {
    /// Hide every panel below the service selector.
    pub fn hide_downstream_of_services(&mut self) {
        self.method_selector = false;
        self.request_body = false;
        self.response = false;
    }
}

/// One entry of a selector. The placeholder has an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn placeholder(label: &str) -> Self {
        Self {
            label: label.to_string(),
            value: String::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.value.is_empty()
    }
}

/// A selector: options (placeholder first) plus the selected value.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub options: Vec<SelectOption>,
    pub selected: Option<String>,
}

impl Selector {
    pub fn replace(&mut self, placeholder: &str, options: impl IntoIterator<Item = SelectOption>) {
        self.options = std::iter::once(SelectOption::placeholder(placeholder))
            .chain(options)
            .collect();
        self.selected = None;
    }

    pub fn clear(&mut self) {
        self.options.clear();
        self.selected = None;
    }

    /// The selected option, if it is a real one.
    pub fn selected_option(&self) -> Option<&SelectOption> {
        let value = self.selected.as_deref()?;
        self.options
            .iter()
            .find(|o| !o.is_placeholder() && o.value == value)
    }

    /// Options without the placeholder.
    pub fn choices(&self) -> impl Iterator<Item = &SelectOption> {
        self.options.iter().filter(|o| !o.is_placeholder())
    }
}

/// A labelled control (button) whose label flips while busy.
#[derive(Clone)]
pub struct Control {
    idle: &'static str,
    busy: Arc<AtomicUsize>,
}

impl Control {
    pub fn new(idle: &'static str) -> Self {
        Self {
            idle,
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn label(&self) -> &'static str {
        if self.is_busy() {
            LOADING_LABEL
        } else {
            self.idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) > 0
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Control").field(&self.label()).finish()
    }
}

/// Counts in-flight requests; visible while the count is non-zero.
#[derive(Clone, Default, Debug)]
pub struct Spinner {
    active: Arc<AtomicUsize>,
}

impl Spinner {
    pub fn is_visible(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }
}

/// Loading feedback for one request. Shows the spinner (and the control's
/// loading label) on creation and restores both on drop, including when
/// the completion handler unwinds.
#[must_use = "dropping the guard immediately ends the loading state"]
pub struct Busy {
    spinner: Spinner,
    control: Option<Control>,
}

impl Busy {
    pub fn start(spinner: &Spinner, control: Option<&Control>) -> Self {
        spinner.active.fetch_add(1, Ordering::AcqRel);
        if let Some(c) = control {
            c.busy.fetch_add(1, Ordering::AcqRel);
        }
        Self {
            spinner: spinner.clone(),
            control: control.cloned(),
        }
    }
}

impl Drop for Busy {
    fn drop(&mut self) {
        if let Some(ref c) = self.control {
            c.busy.fetch_sub(1, Ordering::AcqRel);
        }
        self.spinner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The rendered response of an invoke or load test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseView {
    pub result: String,
    pub timer: String,
}

/// Everything the console draws.
#[derive(Debug)]
pub struct View {
    pub panels: Panels,
    pub services: Selector,
    pub methods: Selector,
    /// Read-only schema text of the described method.
    pub schema: Option<String>,
    pub response: Option<ResponseView>,
    pub spinner: Spinner,
    pub connect: Control,
    pub invoke: Control,
    pub load_test: Control,
    alerts: VecDeque<String>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            panels: Panels::default(),
            services: Selector::default(),
            methods: Selector::default(),
            schema: None,
            response: None,
            spinner: Spinner::default(),
            connect: Control::new("Get Services"),
            invoke: Control::new("Invoke"),
            load_test: Control::new("Load Test"),
            alerts: VecDeque::new(),
        }
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a blocking notification for the operator.
    pub fn alert(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "alert raised");
        self.alerts.push_back(message);
    }

    /// Take all pending alerts, oldest first.
    pub fn drain_alerts(&mut self) -> Vec<String> {
        self.alerts.drain(..).collect()
    }

    pub fn pending_alerts(&self) -> usize {
        self.alerts.len()
    }
}
