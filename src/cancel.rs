//! Cancellation and deadlines for blocking waits.
//!
//! A [`Ctx`] pairs a shared [`CancelToken`] with an optional deadline. Child
//! contexts share the parent's token and take the earlier of the two
//! deadlines, so nested timeouts never outlive their parent. Every sleep in
//! the supervisor goes through [`Ctx::sleep`], which wakes as soon as the
//! token is cancelled.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CtxError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled and wake every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.state.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `until` or cancellation. Returns true if cancelled.
    fn wait_until(&self, until: Instant) -> bool {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= until {
                return false;
            }
            let (guard, _) = self
                .state
                .signal
                .wait_timeout(cancelled, until - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
    }
}

/// Cancellation context carried through every blocking call.
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl Ctx {
    /// A context with a fresh token and no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context driven by an existing token (e.g. the Ctrl-C handler's).
    pub const fn with_token(token: CancelToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context sharing this token, bounded by `timeout` from now and by
    /// the parent's own deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(candidate),
            None => candidate,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    /// Independent context with its own token. Used for cleanup that must run
    /// even after the caller's context was cancelled.
    pub fn detached(timeout: Duration) -> Self {
        Self {
            token: CancelToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub const fn token(&self) -> &CancelToken {
        &self.token
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn err(&self) -> Option<CtxError> {
        if self.token.is_cancelled() {
            return Some(CtxError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(CtxError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    pub fn check(&self) -> Result<(), CtxError> {
        self.err().map_or(Ok(()), Err)
    }

    /// Sleep for `duration`, returning early with an error on cancellation or
    /// when the deadline falls inside the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), CtxError> {
        self.check()?;
        let wake = Instant::now() + duration;
        let until = self.deadline.map_or(wake, |d| d.min(wake));
        if self.token.wait_until(until) {
            return Err(CtxError::Cancelled);
        }
        if Instant::now() >= wake {
            return Ok(());
        }
        Err(CtxError::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_completes_without_deadline() {
        let ctx = Ctx::background();
        let start = Instant::now();
        ctx.sleep(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_wakes_sleeper() {
        let token = CancelToken::new();
        let ctx = Ctx::with_token(token.clone());
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let start = Instant::now();
        let err = ctx.sleep(Duration::from_secs(10)).unwrap_err();
        handle.join().unwrap();
        assert_eq!(err, CtxError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn deadline_cuts_sleep_short() {
        let ctx = Ctx::background().with_timeout(Duration::from_millis(20));
        let err = ctx.sleep(Duration::from_secs(10)).unwrap_err();
        assert_eq!(err, CtxError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CtxError::DeadlineExceeded));
    }

    #[test]
    fn nested_deadline_takes_minimum() {
        let parent = Ctx::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[test]
    fn child_shares_parent_token() {
        let parent = Ctx::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.token().cancel();
        assert_eq!(child.err(), Some(CtxError::Cancelled));
    }

    #[test]
    fn detached_ignores_parent_cancellation() {
        let parent = Ctx::background();
        parent.token().cancel();
        let cleanup = Ctx::detached(Duration::from_secs(4));
        assert!(parent.is_done());
        assert!(!cleanup.is_done());
        assert!(cleanup.remaining().unwrap() <= Duration::from_secs(4));
    }

    #[test]
    fn error_messages() {
        assert_eq!(CtxError::Cancelled.to_string(), "context canceled");
        assert_eq!(
            CtxError::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
    }
}
