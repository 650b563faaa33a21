//! The interactive console.
//!
//! One event loop owns the session, the view and every state machine. It
//! reads operator commands from stdin and completions from spawned backend
//! calls, so handlers never interleave: a spawned task only performs I/O and
//! sends its result back to the loop, which applies it.
//!
//! When stdin is not a terminal (a piped script), the loop waits for all
//! in-flight requests before reading the next line, so scripts can chain
//! `connect`, `service` and `method` without racing the cascade.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use crossterm::style::Stylize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::backend::{
    Backend, BackendError, DescribeRequest, InvokeKind, InvokeReply, MethodDescriptor,
    MethodsRequest, ServicesRequest,
};
use crate::bootstrap::{share_state, DeepLink};
use crate::discovery::{Applied, Pipeline, Ticket};
use crate::invoke::{Invocation, InvocationClient};
use crate::monitor::{ConnectionMonitor, RefreshTask};
use crate::query;
use crate::session::Session;
use crate::view::View;

const PROMPT: &str = "rpcdeck> ";

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { target: Option<String>, restart: bool },
    Tls(Option<bool>),
    Metadata(String),
    Protos(Vec<PathBuf>),
    Services,
    SelectService(String),
    Methods,
    SelectMethod(String),
    Schema,
    ShowBody,
    SetBody(String),
    LoadBody(PathBuf),
    Invoke,
    LoadTest,
    Connections,
    Refresh,
    Close(String),
    Link,
    Status,
    Help,
    Quit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };

        let cmd = match word {
            "" => Command::Empty,
            "connect" | "c" => {
                let mut target = None;
                let mut restart = false;
                for arg in rest.split_whitespace() {
                    match arg {
                        "-r" | "--restart" => restart = true,
                        t if target.is_none() => target = Some(t.to_string()),
                        extra => return Err(format!("unexpected argument '{extra}'")),
                    }
                }
                Command::Connect { target, restart }
            }
            "tls" => match rest {
                "" => Command::Tls(None),
                "on" | "true" => Command::Tls(Some(true)),
                "off" | "false" => Command::Tls(Some(false)),
                other => return Err(format!("expected 'on' or 'off', got '{other}'")),
            },
            "md" | "metadata" => Command::Metadata(rest.to_string()),
            "proto" | "protos" => match rest {
                "off" | "" => Command::Protos(Vec::new()),
                paths => Command::Protos(paths.split_whitespace().map(PathBuf::from).collect()),
            },
            "services" | "ls" => Command::Services,
            "service" | "s" => Command::SelectService(required(rest, "service name or number")?),
            "methods" => Command::Methods,
            "method" | "m" => Command::SelectMethod(required(rest, "method name or number")?),
            "schema" => Command::Schema,
            "body" => match rest {
                "" => Command::ShowBody,
                r if r.starts_with('@') => Command::LoadBody(PathBuf::from(&r[1..])),
                r => Command::SetBody(r.to_string()),
            },
            "invoke" | "i" => Command::Invoke,
            "loadtest" | "lt" => Command::LoadTest,
            "conns" | "connections" => Command::Connections,
            "refresh" => Command::Refresh,
            "close" => Command::Close(required(rest, "connection address")?),
            "link" => Command::Link,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(cmd)
    }
}

fn required(rest: &str, what: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(rest.to_string())
    }
}

/// Results delivered back to the event loop.
enum Completion {
    Services(Ticket<ServicesRequest>, Result<Vec<String>, BackendError>),
    Methods(Ticket<MethodsRequest>, Result<Vec<String>, BackendError>),
    Schema(Ticket<DescribeRequest>, Result<MethodDescriptor, BackendError>),
    Invoked(Invocation, Result<InvokeReply, BackendError>),
    Closed(String, Result<bool, BackendError>),
    Refreshed(Result<usize, BackendError>),
}

/// Console construction options.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub target: Option<String>,
    pub metadata: Option<String>,
    pub use_tls: bool,
    pub protos: Vec<PathBuf>,
    pub refresh_period: Duration,
    /// Shared link to replay on start.
    pub link: Option<String>,
}

pub struct Console {
    backend: Backend,
    session: Session,
    view: View,
    pipeline: Pipeline,
    invoker: InvocationClient,
    monitor: ConnectionMonitor,
    link: DeepLink,
    refresh_period: Duration,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
    /// TLS was switched off by a failed connect and not set since.
    tls_reset: bool,
    out: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(backend: Backend, options: ConsoleOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        session.target_field = options.target.unwrap_or_default();
        session.metadata_field = options.metadata.unwrap_or_default();
        session.use_tls = options.use_tls;
        session.local_protos = options.protos;

        Self {
            monitor: ConnectionMonitor::new(backend.clone()),
            backend,
            session,
            view: View::new(),
            pipeline: Pipeline::new(),
            invoker: InvocationClient::new(),
            link: options.link.as_deref().map(DeepLink::from_url).unwrap_or_default(),
            refresh_period: options.refresh_period,
            tx,
            rx,
            in_flight: 0,
            tls_reset: false,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Write console output to `out` instead of stdout.
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    /// Run on stdin until `quit` or end of input.
    pub async fn run(self) -> Result<(), ConsoleError> {
        let interactive = std::io::stdin().is_terminal();
        self.run_with(tokio::io::BufReader::new(tokio::io::stdin()), interactive)
            .await
    }

    /// Run on `input` until `quit` or end of input. A non-interactive run
    /// reads each line only after the previous line's requests completed.
    pub async fn run_with<R>(mut self, input: R, interactive: bool) -> Result<(), ConsoleError>
    where
        R: AsyncBufRead + Unpin,
    {
        let refresh: RefreshTask = self.monitor.spawn_refresh(self.refresh_period);

        if interactive {
            writeln!(
                self.out,
                "{} connected to gateway {}. Type {} for commands.",
                "rpcdeck".bold(),
                self.backend.base_url(),
                "help".cyan()
            )?;
        }
        self.start();
        self.flush_alerts()?;

        let mut lines = input.lines();
        if interactive {
            self.prompt()?;
        }

        loop {
            tokio::select! {
                Some(completion) = self.rx.recv() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.complete(completion)?;
                    self.flush_alerts()?;
                    if interactive {
                        self.prompt()?;
                    }
                }
                line = lines.next_line(), if interactive || self.in_flight == 0 => {
                    let Some(line) = line? else {
                        break;
                    };
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(cmd) => self.execute(cmd).await?,
                        Err(msg) => writeln!(self.out, "{} {}", "error:".red().bold(), msg)?,
                    }
                    self.flush_alerts()?;
                    if interactive {
                        self.prompt()?;
                    }
                }
            }
        }

        // Let scripted runs see the replies to their last commands.
        while self.in_flight > 0 {
            let Some(completion) = self.rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            self.complete(completion)?;
            self.flush_alerts()?;
        }

        refresh.shutdown().await;
        Ok(())
    }

    /// Load the connection board, then replay the shared link or connect
    /// to the configured target.
    fn start(&mut self) {
        self.refresh_connections();
        if self.link.is_pending() {
            if self.link.apply_target(&mut self.session) {
                self.connect(false);
            }
        } else if !self.session.target_field.trim().is_empty() {
            self.connect(false);
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────

    fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    fn connect(&mut self, restart: bool) {
        let Some(ticket) = self.pipeline.begin_services(&mut self.session, &mut self.view, restart) else {
            return;
        };
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.list_services(&ticket.request).await;
            Completion::Services(ticket, result)
        });
    }

    fn select_service(&mut self, service: &str) {
        let Some(ticket) = self.pipeline.begin_methods(&mut self.session, &mut self.view, service) else {
            return;
        };
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.list_methods(&ticket.request).await;
            Completion::Methods(ticket, result)
        });
    }

    fn select_method(&mut self, method: &str) {
        let Some(ticket) = self.pipeline.begin_schema(&mut self.session, &mut self.view, method) else {
            return;
        };
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.describe(&ticket.request).await;
            Completion::Schema(ticket, result)
        });
    }

    fn invoke(&mut self, kind: InvokeKind) {
        let Some(invocation) = self.invoker.begin(kind, &mut self.session, &mut self.view) else {
            return;
        };
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.invoke(&invocation.request).await;
            Completion::Invoked(invocation, result)
        });
    }

    fn refresh_connections(&mut self) {
        let monitor = self.monitor.clone();
        self.spawn(async move { Completion::Refreshed(monitor.refresh().await) });
    }

    fn close_connection(&mut self, address: String) {
        let monitor = self.monitor.clone();
        self.spawn(async move {
            let result = monitor.close(&address).await;
            Completion::Closed(address, result)
        });
    }

    // ── Completions ────────────────────────────────────────────────

    fn complete(&mut self, completion: Completion) -> std::io::Result<()> {
        match completion {
            Completion::Services(ticket, result) => {
                let tls_before = self.session.use_tls;
                let applied = self
                    .pipeline
                    .finish_services(&mut self.session, &mut self.view, ticket, result);
                if applied != Applied::Stale {
                    self.refresh_connections();
                }
                if let Applied::Failed(_) = applied {
                    self.link.abandon();
                    if tls_before && !self.session.use_tls {
                        self.tls_reset = true;
                        self.view
                            .alert("tls turned off by the failed connect; run 'tls on' to retry over TLS");
                    }
                }
                if applied.is_ready() {
                    self.render_services()?;
                    if let Some(service) = self.link.take_service(&self.view) {
                        self.select_service(&service);
                    }
                }
            }
            Completion::Methods(ticket, result) => match self
                .pipeline
                .finish_methods(&mut self.view, ticket, result)
            {
                Applied::Ready => {
                    self.render_methods()?;
                    if let Some(method) = self.link.take_method(&self.view) {
                        self.select_method(&method);
                    }
                }
                Applied::Failed(_) => self.link.abandon(),
                Applied::Stale => {}
            },
            Completion::Schema(ticket, result) => {
                if self
                    .pipeline
                    .finish_schema(&self.session, &mut self.view, ticket, result)
                    .is_ready()
                {
                    self.render_schema()?;
                    self.render_body()?;
                }
            }
            Completion::Invoked(invocation, result) => {
                if self.invoker.finish(&mut self.view, invocation, result).is_ready() {
                    self.render_response()?;
                }
            }
            Completion::Closed(address, result) => match result {
                Ok(true) => writeln!(self.out, "closed {}", address)?,
                Ok(false) => writeln!(self.out, "gateway did not close {}", address)?,
                Err(e) => self.view.alert(e.to_string()),
            },
            Completion::Refreshed(result) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to update active connections");
                }
            }
        }
        Ok(())
    }

    // ── Commands ───────────────────────────────────────────────────

    async fn execute(&mut self, cmd: Command) -> Result<(), ConsoleError> {
        match cmd {
            Command::Connect { target, restart } => {
                if let Some(t) = target {
                    self.session.target_field = t;
                }
                self.connect(restart);
            }
            Command::Tls(Some(on)) => {
                self.session.use_tls = on;
                self.tls_reset = false;
            }
            Command::Tls(None) => {
                let state = self.tls_state();
                writeln!(self.out, "tls {}", state)?
            }
            Command::Metadata(md) => self.session.metadata_field = md,
            Command::Protos(paths) => {
                if paths.is_empty() {
                    writeln!(self.out, "local proto mode off")?;
                } else {
                    writeln!(self.out, "local proto mode: {} file(s)", paths.len())?;
                }
                self.session.local_protos = paths;
            }
            Command::Services => self.render_services()?,
            Command::SelectService(arg) => {
                let service = pick(&self.view.services, &arg);
                self.select_service(&service);
            }
            Command::Methods => self.render_methods()?,
            Command::SelectMethod(arg) => {
                let method = pick(&self.view.methods, &arg);
                self.select_method(&method);
            }
            Command::Schema => self.render_schema()?,
            Command::ShowBody => self.render_body()?,
            Command::SetBody(text) => self.session.editor().set_value(text),
            Command::LoadBody(path) => match tokio::fs::read_to_string(&path).await {
                Ok(text) => self.session.editor().set_value(text),
                Err(e) => self
                    .view
                    .alert(format!("failed to read {}: {}", path.display(), e)),
            },
            Command::Invoke => self.invoke(InvokeKind::Invoke),
            Command::LoadTest => self.invoke(InvokeKind::LoadTest),
            Command::Connections => self.render_connections()?,
            Command::Refresh => self.refresh_connections(),
            Command::Close(address) => self.close_connection(address),
            Command::Link => {
                let state = share_state(&self.session, &self.view);
                let link = query::build_share_link(self.backend.base_url(), &state);
                writeln!(self.out, "{}", link)?;
            }
            Command::Status => self.render_status()?,
            Command::Help => self.render_help()?,
            Command::Quit | Command::Empty => {}
        }
        Ok(())
    }

    // ── Rendering ──────────────────────────────────────────────────

    fn prompt(&mut self) -> std::io::Result<()> {
        write!(self.out, "{}", PROMPT.green().bold())?;
        self.out.flush()
    }

    fn flush_alerts(&mut self) -> std::io::Result<()> {
        for message in self.view.drain_alerts() {
            writeln!(self.out, "{} {}", "error:".red().bold(), message)?;
        }
        self.out.flush()
    }

    fn render_services(&mut self) -> std::io::Result<()> {
        if !self.view.panels.service_selector {
            return writeln!(self.out, "{}", "no services loaded".dim());
        }
        let selected = self.view.services.selected.clone();
        for (i, opt) in self.view.services.choices().enumerate() {
            let mark = if selected.as_deref() == Some(opt.value.as_str()) { "*" } else { " " };
            writeln!(self.out, "{} {:>3}  {}", mark, i + 1, opt.label)?;
        }
        Ok(())
    }

    fn render_methods(&mut self) -> std::io::Result<()> {
        if !self.view.panels.method_selector {
            return writeln!(self.out, "{}", "no methods loaded".dim());
        }
        let selected = self.view.methods.selected.clone();
        for (i, opt) in self.view.methods.choices().enumerate() {
            let mark = if selected.as_deref() == Some(opt.value.as_str()) { "*" } else { " " };
            writeln!(self.out, "{} {:>3}  {}", mark, i + 1, opt.label)?;
        }
        Ok(())
    }

    fn render_schema(&mut self) -> std::io::Result<()> {
        match (self.view.panels.request_body, self.view.schema.as_deref()) {
            (true, Some(schema)) => writeln!(self.out, "{}", schema.dim()),
            _ => writeln!(self.out, "{}", "no method described".dim()),
        }
    }

    fn render_body(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "{}", self.session.editor().value())
    }

    fn render_response(&mut self) -> std::io::Result<()> {
        if let (true, Some(resp)) = (self.view.panels.response, self.view.response.as_ref()) {
            writeln!(self.out, "{}", resp.result)?;
            writeln!(self.out, "{} {}", "time:".bold(), resp.timer)?;
        }
        Ok(())
    }

    fn render_connections(&mut self) -> std::io::Result<()> {
        let board = self.monitor.snapshot();
        writeln!(self.out, "{} {}", "active connections:".bold(), board.count())?;
        for entry in board.entries() {
            let state = if entry.closing { " (closing)" } else { "" };
            writeln!(self.out, "  {}{}", entry.address, state)?;
        }
        Ok(())
    }

    fn render_status(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "gateway:  {}", self.backend.base_url())?;
        writeln!(self.out, "target:   {}", self.session.target().unwrap_or("-"))?;
        let tls = self.tls_state();
        writeln!(self.out, "tls:      {}", tls)?;
        writeln!(self.out, "metadata: {}", self.session.metadata_field)?;
        writeln!(self.out, "protos:   {}", self.session.local_protos.len())?;
        writeln!(self.out, "stage:    {:?}", self.pipeline.stage())?;
        writeln!(self.out, "loading:  {}", self.view.spinner.is_visible())
    }

    fn tls_state(&self) -> &'static str {
        match (self.session.use_tls, self.tls_reset) {
            (true, _) => "on",
            (false, true) => "off (reset by failed connect)",
            (false, false) => "off",
        }
    }

    fn render_help(&mut self) -> std::io::Result<()> {
        const HELP: &[(&str, &str)] = &[
            ("connect [target] [-r]", "list services of a target (-r restarts the connection)"),
            ("tls [on|off]", "dial the target over TLS"),
            ("md <metadata>", "metadata sent with every request (empty clears)"),
            ("proto <files..>|off", "discover from local proto files"),
            ("services | service <n>", "list / select a service"),
            ("methods | method <n>", "list / select a method"),
            ("schema", "show the request schema"),
            ("body [text|@file]", "show or replace the request body"),
            ("invoke | loadtest", "call the selected method"),
            ("conns | refresh | close <addr>", "active gateway connections"),
            ("link", "print a shareable link"),
            ("status | quit", ""),
        ];
        for (cmd, desc) in HELP {
            writeln!(self.out, "  {} {}", format!("{:<32}", cmd).cyan(), desc)?;
        }
        Ok(())
    }
}

/// Resolve a selector argument: a 1-based number picks from the listed
/// choices, anything else is taken as the value itself.
fn pick(selector: &crate::view::Selector, arg: &str) -> String {
    if let Ok(n) = arg.parse::<usize>() {
        if let Some(opt) = n.checked_sub(1).and_then(|i| selector.choices().nth(i)) {
            return opt.value.clone();
        }
    }
    selector
        .choices()
        .find(|o| o.label == arg)
        .map(|o| o.value.clone())
        .unwrap_or_else(|| arg.to_string())
}
