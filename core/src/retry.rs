//! Bounded re-invocation of card operations.
//!
//! The orchestrator performs no I/O and never sleeps: any delay belongs to the caller and
//! happens between orchestrator invocations. Retry eligibility comes solely from the
//! [`catalog`](crate::catalog); the orchestrator never guesses from the kind of operation.
//!
//! ```
//! use cardloop::{ResultCode, RetryOutcome, RetryPolicy};
//!
//! let mut calls = 0;
//! let outcome = cardloop::retry::execute(RetryPolicy::DEFAULT, || {
//!     calls += 1;
//!     match calls {
//!         1 => Err(ResultCode::NOT_READY),
//!         _ => Ok("ready"),
//!     }
//! });
//!
//! assert_eq!(RetryOutcome::Success { value: "ready", attempts: 2 }, outcome);
//! ```

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::card::OperationResult;
use crate::catalog::{self, Classification, ErrorRecord};

/// How many times an operation may be invoked in total.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Three invocations, used for every status query and read.
    pub const DEFAULT: Self = Self::new(3);

    /// Ten invocations, used by the write/verify sequence.
    pub const PROVISION: Self = Self::new(10);

    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    // At least one invocation happens whatever the configured budget is.
    fn budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Terminal result of one orchestrator run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetryOutcome<T> {
    /// The operation returned a payload.
    Success { value: T, attempts: u32 },

    /// The operation failed terminally, or stayed retryable until the budget ran out.
    /// `record.retryable` tells the two apart.
    Exhausted { record: ErrorRecord, attempts: u32 },

    /// A retryable failure was seen, but the checkpoint refused another attempt.
    Abandoned { record: ErrorRecord, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Abandoned { attempts, .. } => *attempts,
        }
    }

    /// The last observed failure, if the run did not succeed.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Success { .. } => None,
            Self::Exhausted { record, .. } | Self::Abandoned { record, .. } => Some(record),
        }
    }

    pub fn into_result(self) -> Result<T, ErrorRecord> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Exhausted { record, .. } | Self::Abandoned { record, .. } => Err(record),
        }
    }
}

/// What to do after an invocation has been accounted for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Next<T> {
    /// The failure is retryable and the budget allows another invocation.
    Retry(ErrorRecord),
    Done(RetryOutcome<T>),
}

/// Bookkeeping of one orchestrator run, for callers that perform the invocations themselves.
///
/// [`execute_with`] is a loop around it; asynchronous callers drive it between awaits.
#[derive(Clone, Debug)]
pub struct Attempts {
    budget: u32,
    attempts: u32,
}

impl Attempts {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            budget: policy.budget(),
            attempts: 0,
        }
    }

    /// Number of invocations accounted for so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Accounts for the result of one invocation.
    pub fn settle<T>(&mut self, result: OperationResult<T>) -> Next<T> {
        self.attempts += 1;
        let attempts = self.attempts;

        let code = match result {
            Ok(value) => return Next::Done(RetryOutcome::Success { value, attempts }),
            Err(code) => code,
        };

        let record = match catalog::classify(code) {
            Classification::Retryable(record) => record,
            Classification::Terminal(record) | Classification::Unknown(record) => {
                debug!("Terminal failure on attempt {}: {}", attempts, record);
                return Next::Done(RetryOutcome::Exhausted { record, attempts });
            }
            // A success code in the error position carries no payload to return.
            Classification::Success => {
                return Next::Done(RetryOutcome::Exhausted {
                    record: ErrorRecord::unknown(code),
                    attempts,
                });
            }
        };

        if attempts >= self.budget {
            warn!("Gave up after {}/{} attempts: {}", attempts, self.budget, record);
            return Next::Done(RetryOutcome::Exhausted { record, attempts });
        }

        debug!("Retrying ({}/{}): {}", attempts, self.budget, record);
        Next::Retry(record)
    }

    /// Ends the run on a pending retry that will not be attempted.
    pub fn abandon<T>(&self, record: ErrorRecord) -> RetryOutcome<T> {
        warn!("Abandoned after {} attempts: {}", self.attempts, record);
        RetryOutcome::Abandoned {
            record,
            attempts: self.attempts,
        }
    }
}

/// Runs the operation until it succeeds, fails terminally, or the policy is used up.
pub fn execute<T, F>(policy: RetryPolicy, operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> OperationResult<T>,
{
    execute_with(policy, operation, || true)
}

/// Same as [`execute`], but consults `proceed` before scheduling each further attempt.
/// An attempt already in flight is never interrupted.
pub fn execute_with<T, F, P>(policy: RetryPolicy, mut operation: F, mut proceed: P) -> RetryOutcome<T>
where
    F: FnMut() -> OperationResult<T>,
    P: FnMut() -> bool,
{
    let mut run = Attempts::new(policy);

    loop {
        match run.settle(operation()) {
            Next::Done(outcome) => return outcome,
            Next::Retry(record) if !proceed() => return run.abandon(record),
            Next::Retry(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::catalog::ResultCode;

    fn scripted(script: Vec<OperationResult<u8>>) -> impl FnMut() -> OperationResult<u8> {
        let mut script = script.into_iter();

        move || script.next().unwrap_or(Err(ResultCode::TIMEOUT))
    }

    #[test]
    fn test_success_first_attempt() {
        let calls = Cell::new(0);
        let outcome = execute(RetryPolicy::DEFAULT, || {
            calls.set(calls.get() + 1);
            Ok::<_, ResultCode>(42)
        });

        assert_eq!(RetryOutcome::Success { value: 42, attempts: 1 }, outcome);
        assert_eq!(1, calls.get());
    }

    #[test]
    fn test_always_retryable_uses_whole_budget() {
        let calls = Cell::new(0);
        let outcome = execute(RetryPolicy::DEFAULT, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ResultCode::TIMEOUT)
        });

        assert_eq!(3, calls.get());
        match outcome {
            RetryOutcome::Exhausted { record, attempts } => {
                assert_eq!(3, attempts);
                assert_eq!(ResultCode::TIMEOUT, record.code);
                assert!(record.retryable);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_stops_after_one_attempt() {
        let calls = Cell::new(0);
        let outcome = execute(RetryPolicy::DEFAULT, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ResultCode(0x8010_0009))
        });

        assert_eq!(1, calls.get());
        let record = outcome.record().copied().unwrap();
        assert_eq!("SCARD_E_UNKNOWN_READER", record.symbolic_name);
        assert!(!record.retryable);
    }

    #[test]
    fn test_retryable_then_success() {
        let op = scripted(vec![
            Err(ResultCode::SHARING_VIOLATION),
            Err(ResultCode::NOT_READY),
            Ok(7),
        ]);
        let outcome = execute(RetryPolicy::DEFAULT, op);

        assert_eq!(RetryOutcome::Success { value: 7, attempts: 3 }, outcome);
    }

    #[test]
    fn test_unknown_code_is_terminal() {
        let calls = Cell::new(0);
        let outcome = execute(RetryPolicy::PROVISION, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ResultCode(0x1234_5678))
        });

        assert_eq!(1, calls.get());
        assert_eq!(
            RetryOutcome::Exhausted {
                record: ErrorRecord::unknown(ResultCode(0x1234_5678)),
                attempts: 1,
            },
            outcome
        );
    }

    #[test]
    fn test_zero_budget_still_invokes_once() {
        let calls = Cell::new(0);
        let outcome = execute(RetryPolicy::new(0), || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ResultCode::TIMEOUT)
        });

        assert_eq!(1, calls.get());
        assert_eq!(1, outcome.attempts());
    }

    #[test]
    fn test_checkpoint_abandons_further_attempts() {
        let calls = Cell::new(0);
        let checks = Cell::new(0);
        let outcome = execute_with(
            RetryPolicy::PROVISION,
            || {
                calls.set(calls.get() + 1);
                Err::<(), _>(ResultCode::NOT_READY)
            },
            || {
                checks.set(checks.get() + 1);
                checks.get() < 2
            },
        );

        assert_eq!(2, calls.get());
        assert!(matches!(outcome, RetryOutcome::Abandoned { attempts: 2, .. }));
    }

    #[test]
    fn test_checkpoint_not_consulted_on_success_or_terminal() {
        let checks = Cell::new(0);
        let outcome = execute_with(
            RetryPolicy::DEFAULT,
            || Err::<(), _>(ResultCode::REMOVED_CARD),
            || {
                checks.set(checks.get() + 1);
                true
            },
        );

        assert_eq!(0, checks.get());
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_into_result() {
        let ok = execute(RetryPolicy::DEFAULT, || Ok::<_, ResultCode>("uid"));
        assert_eq!(Ok("uid"), ok.into_result());

        let err = execute(RetryPolicy::DEFAULT, || Err::<(), _>(ResultCode::REMOVED_CARD));
        assert_eq!(
            "SCARD_W_REMOVED_CARD",
            err.into_result().unwrap_err().symbolic_name
        );
    }

    #[test]
    fn test_attempts_driven_by_caller() {
        let mut run = Attempts::new(RetryPolicy::new(2));

        match run.settle::<()>(Err(ResultCode::TIMEOUT)) {
            Next::Retry(record) => assert_eq!(ResultCode::TIMEOUT, record.code),
            other => panic!("unexpected step: {:?}", other),
        }
        assert_eq!(1, run.attempts());
        assert!(matches!(
            run.settle::<()>(Err(ResultCode::TIMEOUT)),
            Next::Done(RetryOutcome::Exhausted { attempts: 2, .. })
        ));
    }

    #[test]
    fn test_abandon_keeps_attempt_count() {
        let mut run = Attempts::new(RetryPolicy::PROVISION);
        let record = match run.settle::<()>(Err(ResultCode::NOT_READY)) {
            Next::Retry(record) => record,
            other => panic!("unexpected step: {:?}", other),
        };

        let outcome: RetryOutcome<()> = run.abandon(record);

        assert_eq!(1, outcome.attempts());
        assert_eq!(Some(&record), outcome.record());
    }
}
