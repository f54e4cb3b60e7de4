//! Modal dialogs as a FIFO queue.
//!
//! Requests from any task are queued and handed to a single presenter on a
//! dedicated thread, one at a time. Each caller gets its own answer; none is
//! dropped when dialogs overlap.

use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Info,
    Success,
    Error,
    Warning,
    Confirm,
}

impl DialogKind {
    pub fn icon(&self) -> &'static str {
        match self {
            DialogKind::Info => "ℹ️",
            DialogKind::Success => "✅",
            DialogKind::Error => "❌",
            DialogKind::Warning => "⚠️",
            DialogKind::Confirm => "❓",
        }
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            DialogKind::Info => "Notification",
            DialogKind::Success => "Success",
            DialogKind::Error => "Error",
            DialogKind::Warning => "Warning",
            DialogKind::Confirm => "Confirm",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogRequest {
    pub title: String,
    pub message: String,
    pub kind: DialogKind,
    pub show_cancel: bool,
}

impl DialogRequest {
    pub fn new(kind: DialogKind, message: impl Into<String>) -> Self {
        Self {
            title: kind.default_title().to_string(),
            message: message.into(),
            kind,
            show_cancel: kind == DialogKind::Confirm,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Renders one dialog and blocks until the user answers.
/// `true` is OK, `false` is Cancel or dismissal.
pub trait DialogPresenter: Send + 'static {
    fn present(&mut self, request: &DialogRequest) -> bool;
}

/// Non-interactive presenter: logs each dialog and answers with a fixed value.
pub struct AutoPresenter {
    pub answer: bool,
}

impl DialogPresenter for AutoPresenter {
    fn present(&mut self, request: &DialogRequest) -> bool {
        match request.kind {
            DialogKind::Error => tracing::error!(title = %request.title, "{}", request.message),
            DialogKind::Warning => tracing::warn!(title = %request.title, "{}", request.message),
            _ => tracing::info!(title = %request.title, "{}", request.message),
        }
        if request.show_cancel { self.answer } else { true }
    }
}

struct Pending {
    request: DialogRequest,
    reply: oneshot::Sender<bool>,
}

/// Clone-safe handle to the dialog queue.
#[derive(Clone)]
pub struct Dialogs {
    tx: mpsc::UnboundedSender<Pending>,
}

impl Dialogs {
    /// Start the presenter thread. The queue closes when every handle is dropped.
    pub fn spawn(mut presenter: impl DialogPresenter) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();

        std::thread::Builder::new()
            .name("rollcall-dialog".into())
            .spawn(move || {
                while let Some(Pending { request, reply }) = rx.blocking_recv() {
                    let answer = presenter.present(&request);
                    tracing::debug!(kind = ?request.kind, answer, "dialog answered");
                    let _ = reply.send(answer);
                }
                tracing::debug!("dialog presenter exiting");
            })?;

        Ok(Self { tx })
    }

    /// Queue a dialog and wait for its answer. Resolves `false` if the
    /// presenter has gone away.
    pub async fn show(&self, request: DialogRequest) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(Pending { request, reply }).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    pub async fn alert(&self, message: impl Into<String>) -> bool {
        self.show(DialogRequest::new(DialogKind::Info, message)).await
    }

    pub async fn info(&self, message: impl Into<String>) -> bool {
        self.alert(message).await
    }

    pub async fn success(&self, message: impl Into<String>) -> bool {
        self.show(DialogRequest::new(DialogKind::Success, message)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.show(DialogRequest::new(DialogKind::Error, message)).await
    }

    pub async fn warning(&self, message: impl Into<String>) -> bool {
        self.show(DialogRequest::new(DialogKind::Warning, message)).await
    }

    pub async fn confirm(&self, message: impl Into<String>) -> bool {
        self.show(DialogRequest::new(DialogKind::Confirm, message)).await
    }
}
