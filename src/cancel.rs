//! Cancellation controller for relay sessions.
//!
//! A session has one [`CancelToken`]. Three things can fire it:
//!
//! - the deadline timer started by [`begin`] when the time budget runs out,
//! - an explicit [`CancelHandle::cancel`],
//! - a [`DownstreamGuard`] dropped while still armed, which is how a client
//!   disconnect becomes visible (hyper drops the response body).
//!
//! Firing is one-shot: the first cause is recorded and every later call is a no-op.
//! Consumers only ever ask "has it fired" and, at most, "why".

use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The session's time budget elapsed.
    Deadline,
    /// The owner aborted the session explicitly.
    Aborted,
    /// The downstream connection closed before the stream finished.
    DownstreamClosed,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    cause: OnceCell<CancelCause>,
    budget: Duration,
}

/// Shared, cloneable cancellation flag of one relay session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A token with no deadline timer attached. [`begin`] is the usual constructor.
    pub fn new(budget: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                cause: OnceCell::new(),
                budget,
            }),
        }
    }

    /// Fire the token. Returns `true` only for the call that actually fired it.
    pub fn fire(&self, cause: CancelCause) -> bool {
        let first = self.inner.cause.set(cause).is_ok();
        if first {
            tracing::debug!(?cause, "relay session cancelled");
        }
        self.inner.token.cancel();
        first
    }

    pub fn is_fired(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Cause of the first firing, if any.
    pub fn cause(&self) -> Option<CancelCause> {
        self.inner.cause.get().copied()
    }

    /// Time budget the session was started with.
    pub fn budget(&self) -> Duration {
        self.inner.budget
    }

    /// Resolves once the token has fired. Cancel-safe, usable in `select!`.
    pub fn fired(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }
}

/// Owner side of a session's token.
///
/// Dropping the handle stops the deadline timer without firing the token, so the
/// handle must live as long as the session it bounds.
#[derive(Debug)]
pub struct CancelHandle {
    token: CancelToken,
    timer: JoinHandle<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.fire(CancelCause::Aborted);
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Start a session: a fresh token plus a timer that fires it after `budget`.
///
/// Must be called inside a tokio runtime.
pub fn begin(budget: Duration) -> (CancelToken, CancelHandle) {
    let token = CancelToken::new(budget);
    let timer = tokio::spawn({
        let token = token.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => {
                    token.fire(CancelCause::Deadline);
                }
                _ = token.fired() => {}
            }
        }
    });
    (token.clone(), CancelHandle { token, timer })
}

/// Register the downstream connection's liveness against `token`.
///
/// The returned guard fires the token with [`CancelCause::DownstreamClosed`] when
/// dropped, unless [`DownstreamGuard::disarm`] was called first.
pub fn on_downstream_close(token: &CancelToken) -> DownstreamGuard {
    DownstreamGuard {
        token: token.clone(),
        armed: true,
    }
}

#[derive(Debug)]
pub struct DownstreamGuard {
    token: CancelToken,
    armed: bool,
}

impl DownstreamGuard {
    /// The connection finished normally; dropping the guard will not fire.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for DownstreamGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.fire(CancelCause::DownstreamClosed);
        }
    }
}
