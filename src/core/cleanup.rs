/// Ordered Cleanup Module
///
/// Teardown after a failure runs as a sequence of independent steps.
/// Every step is attempted even when an earlier one failed, failures are
/// logged and swallowed, and the runner itself never returns an error.
use std::fmt::Display;
use tracing::{debug, warn};

/// Runs teardown steps in order, isolating each step's failure.
///
/// # Examples
///
/// ```
/// use dalite::core::Cleanup;
///
/// let mut cleanup = Cleanup::new("example");
/// cleanup
///     .attempt("first", || Err::<(), _>("first step failed"))
///     .attempt("second", || Ok::<(), &str>(()));
/// assert_eq!(cleanup.failures(), 1);
/// cleanup.finish();
/// ```
#[derive(Debug)]
pub struct Cleanup {
    context: &'static str,
    attempted: usize,
    failures: usize,
}

impl Cleanup {
    /// Starts a cleanup sequence; `context` names it in log output
    pub fn new(context: &'static str) -> Self {
        Cleanup {
            context,
            attempted: 0,
            failures: 0,
        }
    }

    /// Runs one step immediately and records its outcome
    pub fn attempt<E, F>(&mut self, step: &str, action: F) -> &mut Self
    where
        E: Display,
        F: FnOnce() -> std::result::Result<(), E>,
    {
        self.attempted += 1;
        if let Err(e) = action() {
            self.failures += 1;
            warn!(context = self.context, step, error = %e, "cleanup step failed");
        }
        self
    }

    /// Number of steps that failed so far
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Ends the sequence. Nothing is returned: the caller's original outcome stands.
    pub fn finish(self) {
        debug!(
            context = self.context,
            attempted = self.attempted,
            failures = self.failures,
            "cleanup finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_step_does_not_stop_later_steps() {
        let mut ran = Vec::new();
        let mut cleanup = Cleanup::new("test");
        cleanup
            .attempt("one", || {
                ran.push(1);
                Err("one failed")
            })
            .attempt("two", || {
                ran.push(2);
                Err("two failed")
            })
            .attempt("three", || {
                ran.push(3);
                Ok::<(), &str>(())
            });

        assert_eq!(cleanup.failures(), 2);
        cleanup.finish();
        assert_eq!(ran, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_cleanup() {
        let cleanup = Cleanup::new("empty");
        assert_eq!(cleanup.failures(), 0);
        cleanup.finish();
    }
}
