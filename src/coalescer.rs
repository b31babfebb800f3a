//! Latest-call-wins coalescing for overlapping async calls.
//!
//! Every call takes a ticket from a shared counter when it is issued. When the
//! call's operation completes, the ticket is compared with the newest ticket
//! handed out so far: only the newest call gets its real outcome, older calls
//! resolve as [`Coalesced::Cancelled`]. Stale operations are not aborted, they
//! run to completion and their outcome is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Ticket issued to a call at invocation time. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallToken(u64);

/// Outcome of a coalesced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coalesced<T> {
    /// A newer call was issued before this one completed.
    Cancelled,
    /// This call was the newest one when it completed.
    Fresh(T),
}

impl<T> Coalesced<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Coalesced::Cancelled)
    }

    pub fn into_fresh(self) -> Option<T> {
        match self {
            Coalesced::Cancelled => None,
            Coalesced::Fresh(data) => Some(data),
        }
    }
}

/// Shared ticket counter. Clones share the same counter, so a clone
/// supersedes calls made through any other clone.
#[derive(Debug, Clone, Default)]
pub struct LatestCallWins {
    latest: Arc<AtomicU64>,
}

impl LatestCallWins {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> CallToken {
        CallToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Start a call: take the next ticket now, before any work is launched.
    pub fn begin(&self) -> PendingCall {
        PendingCall {
            token: self.issue(),
            latest: Arc::clone(&self.latest),
        }
    }

    /// Take a ticket without starting a call. Every call still in flight
    /// resolves as `Cancelled`.
    pub fn supersede(&self) -> CallToken {
        self.issue()
    }

    /// Issue a ticket, then invoke `op`. The ticket is taken synchronously,
    /// so call order decides which call is newest even when the returned
    /// futures are polled (or complete) in a different order.
    pub fn run<Op, Fut, T, E>(&self, op: Op) -> impl Future<Output = Result<Coalesced<T>, E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let call = self.begin();
        call.settle(op())
    }
}

/// A call that holds a ticket and has not delivered its outcome yet.
#[derive(Debug)]
pub struct PendingCall {
    token: CallToken,
    latest: Arc<AtomicU64>,
}

impl PendingCall {
    pub fn token(&self) -> CallToken {
        self.token
    }

    /// Await the operation and deliver its outcome exactly once: the real
    /// outcome if no newer call was issued meanwhile, `Cancelled` otherwise.
    pub async fn settle<Fut, T, E>(self, pending: Fut) -> Result<Coalesced<T>, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = pending.await;
        let newest = self.latest.load(Ordering::SeqCst);
        if newest != self.token.0 {
            debug!(token = self.token.0, newest, failed = outcome.is_err(), "stale call discarded");
            return Ok(Coalesced::Cancelled);
        }
        outcome.map(Coalesced::Fresh)
    }
}

/// Reusable operation wrapped so that only its newest call resolves.
pub struct OnlyResolvesLast<Op> {
    op: Op,
    calls: LatestCallWins,
}

impl<Op> OnlyResolvesLast<Op> {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            calls: LatestCallWins::new(),
        }
    }

    pub fn call<A, Fut, T, E>(&self, args: A) -> impl Future<Output = Result<Coalesced<T>, E>>
    where
        Op: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let call = self.calls.begin();
        call.settle((self.op)(args))
    }
}
