//! The session protocol: one persistent duplex channel streaming the
//! progress of one long-running operation.
//!
//! Every outbound write goes through the session's single lock, which also
//! guards the `finalized` flag. Once the terminal frame has been written no
//! further frame (data or keepalive) can reach the channel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::ws::Message;
use solvergate_core::error::CoreError;
use solvergate_core::layout::ProjectLayout;
use solvergate_core::protocol::{FrameStatus, TaggedId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use super::keepalive::start_keepalive;
use super::manager::WsSender;
use crate::auth::{AuthProvider, Operation};
use crate::middleware::auth::AuthUser;

/// Protocol state of a session.
///
/// `Finished` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Authenticating,
    Preprocessing,
    Streaming,
    Finished,
    Error,
}

/// What the client asked for when it connected.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Sent back in the `Started` frame.
    pub start_message: String,
    pub token: Option<String>,
    pub operation: Operation,
    pub project: Option<String>,
}

/// The caller's identity and working context once a session is open.
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub user: AuthUser,
    /// Working directory of the requested project, if one was requested.
    pub working_dir: Option<PathBuf>,
}

struct Inner {
    state: SessionState,
    started: Instant,
    user: Option<AuthUser>,
    handle: Option<TaggedId>,
    /// The attached job or query may still be running. Outlives a peer
    /// disconnect, which finalizes the session but not the operation.
    in_flight: bool,
    progress_text: Option<String>,
    sender: Option<WsSender>,
    finalized: bool,
}

impl Inner {
    /// Enrich `frame` and write it, unless the session is finalized.
    fn deliver(&mut self, mut frame: Frame) {
        if self.finalized {
            return;
        }
        frame.elapsedtime = Some(format!("{}s", self.started.elapsed().as_secs()));
        if frame.user.is_none() {
            frame.user = self.user.as_ref().map(|u| u.user.clone());
        }
        if frame.pid.is_none() {
            frame.pid = self.handle;
        }
        self.write(Message::Text(frame.to_json().into()));
    }

    /// Write to the channel. A closed channel is dropped, not reported.
    fn write(&mut self, message: Message) {
        if let Some(sender) = &self.sender {
            if sender.send(message).is_err() {
                self.sender = None;
            }
        }
    }
}

/// A live session.
pub struct Session {
    conn_id: String,
    keepalive_interval: Duration,
    keepalive: CancellationToken,
    inner: Mutex<Inner>,
}

impl Session {
    /// A session writing to `sender`, not yet opened.
    pub fn new(conn_id: impl Into<String>, sender: WsSender, keepalive_interval: Duration) -> Self {
        Self {
            conn_id: conn_id.into(),
            keepalive_interval,
            keepalive: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: SessionState::Opening,
                started: Instant::now(),
                user: None,
                handle: None,
                in_flight: false,
                progress_text: None,
                sender: Some(sender),
                finalized: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.lock().user.clone()
    }

    pub fn user_name(&self) -> Option<String> {
        self.lock().user.as_ref().map(|u| u.user.clone())
    }

    /// Tagged identifier of the attached job or query.
    pub fn handle(&self) -> Option<TaggedId> {
        self.lock().handle
    }

    /// Whether the attached job or query may still be running.
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Open the session.
    ///
    /// Sends `Started`, authenticates and authorizes the caller for
    /// `request.operation`, resolves the project's working directory, sends
    /// `Preprocessing`, and starts the keepalive timer. On failure the
    /// session is closed with an error frame and the error is returned.
    pub async fn open(
        self: &Arc<Self>,
        auth: &dyn AuthProvider,
        layout: &dyn ProjectLayout,
        request: OpenRequest,
    ) -> Result<OpenedSession, CoreError> {
        {
            let mut inner = self.lock();
            inner.started = Instant::now();
            inner.deliver(Frame::new(FrameStatus::Started).info(request.start_message.clone()));
        }

        let opened = match self.establish(auth, layout, &request).await {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.transition(SessionState::Preprocessing);
        self.send(Frame::new(FrameStatus::Preprocessing));
        start_keepalive(Arc::downgrade(self), self.keepalive_interval, self.keepalive.clone());

        tracing::info!(
            conn_id = %self.conn_id,
            user = %opened.user.user,
            project = ?request.project,
            "Session opened",
        );
        Ok(opened)
    }

    async fn establish(
        &self,
        auth: &dyn AuthProvider,
        layout: &dyn ProjectLayout,
        request: &OpenRequest,
    ) -> Result<OpenedSession, CoreError> {
        self.transition(SessionState::Authenticating);
        let user = auth.authenticate(request.token.as_deref()).await?;
        self.lock().user = Some(user.clone());
        auth.authorize(&user, request.operation).await?;

        let working_dir = match &request.project {
            Some(project) => Some(layout.resolve_working_directory(&user.user, project).await?),
            None => None,
        };
        Ok(OpenedSession { user, working_dir })
    }

    fn transition(&self, next: SessionState) {
        let mut inner = self.lock();
        if !inner.finalized {
            inner.state = next;
        }
    }

    /// Mark the attached operation as producing output.
    pub fn begin_streaming(&self) {
        self.transition(SessionState::Streaming);
    }

    /// Send a frame, enriched with the elapsed time, the user, and the
    /// attached handle. A no-op once the session is finalized or the channel
    /// is closed.
    pub fn send(&self, frame: Frame) {
        self.lock().deliver(frame);
    }

    /// Attach a job or query handle and publish its tagged identifier.
    pub fn attach(&self, handle: TaggedId) {
        let mut inner = self.lock();
        inner.handle = Some(handle);
        inner.in_flight = true;
        inner.deliver(Frame::new(FrameStatus::Pid));
    }

    /// Mark the attached operation as ended. The handle stays on later frames.
    pub fn detach(&self) {
        self.lock().in_flight = false;
    }

    /// Set or clear the text sent by keepalive ticks instead of a heartbeat.
    pub fn set_progress_text(&self, text: Option<String>) {
        self.lock().progress_text = text;
    }

    /// Close the session. Idempotent.
    ///
    /// A clean close sends `frame` with its status forced to `Finished`,
    /// followed by a Close message, and detaches the operation. An unclean
    /// close (the peer went away) only logs; the operation stays attached. Either way the session is finalized and later `send` and
    /// `close` calls do nothing.
    pub fn close(&self, frame: Option<Frame>, clean: bool) {
        self.keepalive.cancel();

        let mut inner = self.lock();
        if inner.finalized {
            return;
        }

        if clean {
            let mut frame = frame.unwrap_or_else(|| Frame::new(FrameStatus::Finished));
            frame.status = FrameStatus::Finished;
            inner.deliver(frame);
            inner.write(Message::Close(None));
            inner.in_flight = false;
            if inner.state != SessionState::Error {
                inner.state = SessionState::Finished;
            }
            tracing::info!(
                conn_id = %self.conn_id,
                state = ?inner.state,
                elapsed_secs = inner.started.elapsed().as_secs(),
                "Session finished",
            );
        } else {
            tracing::warn!(
                conn_id = %self.conn_id,
                state = ?inner.state,
                handle = ?inner.handle,
                "Session closed by peer before finishing",
            );
            inner.state = SessionState::Error;
        }

        inner.finalized = true;
        inner.sender = None;
    }

    /// Close the session with an error frame.
    pub fn fail(&self, err: &CoreError) {
        {
            let mut inner = self.lock();
            if inner.finalized {
                return;
            }
            inner.state = SessionState::Error;
        }
        tracing::warn!(conn_id = %self.conn_id, error = %err, "Session operation failed");
        self.close(
            Some(Frame::new(FrameStatus::Finished).error(err.message())),
            true,
        );
    }

    /// One keepalive tick. Returns `false` once the session is finalized.
    pub(crate) fn keepalive_tick(&self) -> bool {
        let mut inner = self.lock();
        if inner.finalized {
            return false;
        }
        match inner.progress_text.clone() {
            Some(text) => inner.deliver(Frame::new(FrameStatus::Preprocessing).info(text)),
            None => inner.write(Message::Text(Frame::heartbeat().to_json().into())),
        }
        true
    }
}
