//! First-matching-result racing.
//!
//! [`ResultRacer`] runs a fixed set of operations concurrently and yields the
//! first value, in completion order, that satisfies a predicate. It knows
//! nothing about what the values mean; callers do their own scoring or
//! caching once the race is decided.
//!
//! Losing operations are never aborted. When the race ends they are signalled
//! through the racer's [`CancellationToken`] and left to finish (or time out)
//! on their own, with their results discarded.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a race produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchReason {
    /// There were no operations to race.
    Empty,
    /// Every operation finished and none matched.
    Exhausted,
    /// The deadline elapsed first.
    DeadlineElapsed,
    /// The external cancellation signal fired.
    Cancelled,
}

/// Result of a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    /// First value satisfying the predicate.
    Matched(T),
    /// No value satisfied the predicate.
    NoMatch(NoMatchReason),
}

impl<T> RaceOutcome<T> {
    /// Convert into an `Option`, dropping the no-match reason.
    pub fn into_option(self) -> Option<T> {
        match self {
            RaceOutcome::Matched(value) => Some(value),
            RaceOutcome::NoMatch(_) => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, RaceOutcome::Matched(_))
    }
}

/// Races operations for the first result matching a predicate.
#[derive(Debug)]
pub struct ResultRacer {
    deadline: Duration,
    signal: CancellationToken,
}

impl ResultRacer {
    /// Create a racer with an overall deadline.
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            signal: CancellationToken::new(),
        }
    }

    /// Tie the race to an external cancellation signal.
    ///
    /// Cancelling `parent` ends the race with [`NoMatchReason::Cancelled`].
    /// Ending the race never cancels `parent` itself.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.signal = parent.child_token();
        self
    }

    /// Token that raced operations can watch for cooperative cancellation.
    ///
    /// It is cancelled as soon as the race is decided, however it ends.
    pub fn signal(&self) -> CancellationToken {
        self.signal.clone()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `operations` concurrently and return the first value accepted by
    /// `predicate`.
    ///
    /// Each operation runs on its own task. A task that panics counts as a
    /// non-matching result.
    pub async fn first_matching<T, F, P>(self, operations: Vec<F>, predicate: P) -> RaceOutcome<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        P: Fn(&T) -> bool,
    {
        if operations.is_empty() {
            self.signal.cancel();
            return RaceOutcome::NoMatch(NoMatchReason::Empty);
        }

        let total = operations.len();
        let mut pending: FuturesUnordered<_> = operations.into_iter().map(tokio::spawn).collect();
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let mut completed = 0usize;
        let mut faults = 0usize;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.signal.cancelled() => break RaceOutcome::NoMatch(NoMatchReason::Cancelled),
                _ = &mut deadline => break RaceOutcome::NoMatch(NoMatchReason::DeadlineElapsed),
                next = pending.next() => match next {
                    None => break RaceOutcome::NoMatch(NoMatchReason::Exhausted),
                    Some(Ok(value)) => {
                        completed += 1;
                        if predicate(&value) {
                            break RaceOutcome::Matched(value);
                        }
                    }
                    Some(Err(e)) => {
                        completed += 1;
                        faults += 1;
                        warn!(error = %e, "Raced operation faulted, treating as non-match");
                    }
                },
            }
        };

        // Signal the losers; dropping their join handles detaches them.
        self.signal.cancel();

        debug!(
            operations = total,
            completed,
            faults,
            matched = outcome.is_match(),
            "Race finished"
        );

        outcome
    }
}
