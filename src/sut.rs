// SPDX-License-Identifier: Apache-2.0

//! The seam between the search and the system under test.
//!
//! A `SutDriver` runs one action at a time and reports what coverage the
//! action produced. The driver lives on its own thread behind an
//! `ActionExecutor`, which bounds every action by a timeout: a late reply
//! is recognized by its sequence number and dropped. The next action is
//! only sent once the driver has finished the late one, or reported as
//! stalled if it does not finish within a grace period.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use covsearch_heuristics::{
    evaluate_comparison, evaluate_emptiness, evaluate_null_check, evaluate_string_equals, Operands,
    Operator, Truthness,
};

use crate::covsearch_error::SearchError;
use crate::individual::Action;
use crate::naming;

/// One heuristic value a driver observed while executing an action.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetObservation {
    pub descriptive: String,
    /// In `(0, 1]`.
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResult {
    /// False when the SUT could not run the action at all (e.g. connection
    /// refused). An action that ran and returned an error status is still a
    /// success here.
    pub success: bool,
    pub observations: Vec<TargetObservation>,
}

impl ActionResult {
    pub fn succeeded() -> Self {
        ActionResult {
            success: true,
            observations: Vec::new(),
        }
    }

    pub fn failed() -> Self {
        ActionResult::default()
    }

    pub fn observe(&mut self, descriptive: impl Into<String>, value: f64) -> &mut Self {
        self.observations.push(TargetObservation {
            descriptive: descriptive.into(),
            value,
        });
        self
    }

    /// Records both sides of `lhs <op> rhs` as `<id>-true` and `<id>-false`.
    pub fn observe_comparison(
        &mut self,
        id: &str,
        op: Operator,
        operands: impl Into<Operands>,
    ) -> Truthness {
        let t = evaluate_comparison(op, operands);
        self.observe(naming::comparison_side_name(id, true), t.of_true());
        self.observe(naming::comparison_side_name(id, false), t.of_false());
        t
    }

    pub fn observe_branch(
        &mut self,
        file: &str,
        line: u32,
        branch_id: u32,
        op: Operator,
        operands: impl Into<Operands>,
    ) -> Truthness {
        let t = evaluate_comparison(op, operands);
        self.observe(
            naming::branch_objective_name(file, line, branch_id, true),
            t.of_true(),
        );
        self.observe(
            naming::branch_objective_name(file, line, branch_id, false),
            t.of_false(),
        );
        t
    }

    pub fn observe_line(&mut self, file: &str, line: u32) -> &mut Self {
        self.observe(naming::line_objective_name(file, line), 1.0)
    }

    /// Records both sides of `left == right` for strings; `None` stands
    /// for an absent right-hand value.
    pub fn observe_string_equals(&mut self, id: &str, left: &str, right: Option<&str>) -> Truthness {
        self.observe_sides(id, evaluate_string_equals(left, right))
    }

    pub fn observe_null_check(&mut self, id: &str, is_null: bool) -> Truthness {
        self.observe_sides(id, evaluate_null_check(is_null))
    }

    pub fn observe_is_empty(&mut self, id: &str, len: usize) -> Truthness {
        self.observe_sides(id, evaluate_emptiness(len))
    }

    fn observe_sides(&mut self, id: &str, t: Truthness) -> Truthness {
        self.observe(naming::comparison_side_name(id, true), t.of_true());
        self.observe(naming::comparison_side_name(id, false), t.of_false());
        t
    }
}

/// Executes actions against a SUT.
pub trait SutDriver: Send {
    /// Called before the first action of every individual, so the SUT can
    /// drop state left behind by the previous test.
    fn reset(&mut self) {}

    fn execute(&mut self, action: &Action) -> ActionResult;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(ActionResult),
    TimedOut,
    /// An earlier timed-out action was still running after the stall
    /// grace; this action was not sent.
    Stalled,
    /// The executor thread is gone; nothing will ever answer again.
    Disconnected,
}

enum Request {
    Reset,
    Execute { seq: u64, action: Action },
}

struct Reply {
    seq: u64,
    result: ActionResult,
}

fn executor_loop(mut driver: Box<dyn SutDriver>, requests: Receiver<Request>, replies: Sender<Reply>) {
    while let Ok(request) = requests.recv() {
        match request {
            Request::Reset => {
                if panic::catch_unwind(AssertUnwindSafe(|| driver.reset())).is_err() {
                    log::warn!("[sut] driver panicked during reset");
                }
            }
            Request::Execute { seq, action } => {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| driver.execute(&action)))
                {
                    Ok(r) => r,
                    Err(_) => {
                        log::warn!("[sut] driver panicked executing {}", action.name);
                        ActionResult::failed()
                    }
                };
                // The engine may have given up on us; nothing to do then.
                if replies.send(Reply { seq, result }).is_err() {
                    break;
                }
            }
        }
    }
    log::debug!("[sut] executor thread exiting");
}

/// Owns the driver thread and enforces the per-action timeout.
pub struct ActionExecutor {
    requests: Option<Sender<Request>>,
    replies: Receiver<Reply>,
    handle: Option<JoinHandle<()>>,
    next_seq: u64,
    timeout: Duration,
    stall_grace: Duration,
    /// Sequence number of a timed-out action the driver is still busy with.
    in_flight: Option<u64>,
}

impl ActionExecutor {
    pub fn spawn(driver: Box<dyn SutDriver>, timeout: Duration) -> Result<Self, SearchError> {
        let (req_tx, req_rx) = channel::<Request>();
        let (rep_tx, rep_rx) = channel::<Reply>();
        let handle = std::thread::Builder::new()
            .name("covsearch-sut".to_string())
            .spawn(move || executor_loop(driver, req_rx, rep_tx))
            .map_err(|e| SearchError::Executor(format!("could not spawn driver thread: {}", e)))?;
        Ok(ActionExecutor {
            requests: Some(req_tx),
            replies: rep_rx,
            handle: Some(handle),
            next_seq: 0,
            timeout,
            stall_grace: timeout,
            in_flight: None,
        })
    }

    /// How long `execute` waits for a timed-out action to finish before
    /// giving up on sending the next one. Defaults to the action timeout.
    pub fn with_stall_grace(mut self, stall_grace: Duration) -> Self {
        self.stall_grace = stall_grace;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the reply to the timed-out action, if any. Returns false
    /// when it did not show up within the stall grace.
    fn settle_in_flight(&mut self) -> Result<bool, ExecutionOutcome> {
        let Some(pending) = self.in_flight else {
            return Ok(true);
        };
        let deadline = Instant::now() + self.stall_grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq >= pending => {
                    log::debug!("[sut] late action #{} finished", reply.seq);
                    self.in_flight = None;
                    return Ok(true);
                }
                Ok(stale) => {
                    log::debug!("[sut] dropping late reply for action #{}", stale.seq);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Err(ExecutionOutcome::Disconnected),
            }
        }
    }

    /// Queues a driver reset; it runs before any action sent afterwards.
    pub fn reset(&mut self) -> bool {
        match &self.requests {
            Some(tx) => tx.send(Request::Reset).is_ok(),
            None => false,
        }
    }

    pub fn execute(&mut self, action: &Action) -> ExecutionOutcome {
        match self.settle_in_flight() {
            Ok(true) => {}
            Ok(false) => {
                log::warn!(
                    "[sut] driver still busy with action #{} after {:?}; not sending {}",
                    self.in_flight.unwrap_or_default(),
                    self.stall_grace,
                    action.name
                );
                return ExecutionOutcome::Stalled;
            }
            Err(outcome) => return outcome,
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let sent = match &self.requests {
            Some(tx) => tx
                .send(Request::Execute {
                    seq,
                    action: action.clone(),
                })
                .is_ok(),
            None => false,
        };
        if !sent {
            return ExecutionOutcome::Disconnected;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => return ExecutionOutcome::Completed(reply.result),
                Ok(stale) => {
                    log::debug!("[sut] dropping late reply for action #{}", stale.seq);
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "[sut] action {} (#{}) timed out after {:?}",
                        action.name,
                        seq,
                        self.timeout
                    );
                    self.in_flight = Some(seq);
                    return ExecutionOutcome::TimedOut;
                }
                Err(RecvTimeoutError::Disconnected) => return ExecutionOutcome::Disconnected,
            }
        }
    }
}

impl Drop for ActionExecutor {
    fn drop(&mut self) {
        // Closing the request channel ends the loop once the driver returns.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
            // A driver stuck inside an action cannot be joined; leave the
            // thread detached.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::Gene;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Echo {
        resets: Arc<AtomicUsize>,
    }

    impl SutDriver for Echo {
        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn execute(&mut self, action: &Action) -> ActionResult {
            let x = action.gene("x").and_then(|g| g.as_int()).unwrap_or(0);
            let mut r = ActionResult::succeeded();
            r.observe_comparison("x_is_7", Operator::Eq, (x, 7));
            r
        }
    }

    /// Sleeps for `x` milliseconds.
    struct Sleepy;

    impl SutDriver for Sleepy {
        fn execute(&mut self, action: &Action) -> ActionResult {
            let ms = action.gene("x").and_then(|g| g.as_int()).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms as u64));
            let mut r = ActionResult::succeeded();
            r.observe("slept", 1.0);
            r.observe(format!("slept_{}", ms), 1.0);
            r
        }
    }

    struct Panicky;

    impl SutDriver for Panicky {
        fn execute(&mut self, _action: &Action) -> ActionResult {
            panic!("boom");
        }
    }

    fn action(x: i64) -> Action {
        let mut g = Gene::int("x", 0, 10_000);
        g.set_int(x);
        Action::new("call", vec![g])
    }

    #[test]
    fn completed_actions_carry_observations() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut exec = ActionExecutor::spawn(
            Box::new(Echo {
                resets: resets.clone(),
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(exec.reset());
        let outcome = exec.execute(&action(7));
        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert!(result.success);
        assert_eq!(result.observations.len(), 2);
        assert_eq!(result.observations[0].descriptive, "x_is_7-true");
        assert_eq!(result.observations[0].value, 1.0);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_actions_time_out_and_late_replies_are_dropped() {
        let _ = env_logger::try_init();
        let mut exec = ActionExecutor::spawn(Box::new(Sleepy), Duration::from_millis(50))
            .unwrap()
            .with_stall_grace(Duration::from_millis(10));
        assert_eq!(exec.execute(&action(400)), ExecutionOutcome::TimedOut);
        // The driver is still sleeping; nothing is queued behind it.
        assert_eq!(exec.execute(&action(1)), ExecutionOutcome::Stalled);
        assert_eq!(exec.next_seq, 1);
        // With enough patience the late reply is consumed and must not be
        // mistaken for the next action's.
        let ExecutionOutcome::Completed(result) = exec_with_patience(&mut exec, 1) else {
            panic!("expected completion");
        };
        assert_eq!(result.observations[1].descriptive, "slept_1");
        assert_eq!(exec.in_flight, None);
    }

    fn exec_with_patience(exec: &mut ActionExecutor, ms: i64) -> ExecutionOutcome {
        exec.timeout = Duration::from_secs(5);
        exec.stall_grace = Duration::from_secs(5);
        exec.execute(&action(ms))
    }

    #[test]
    fn a_single_slow_action_does_not_poison_the_next() {
        let _ = env_logger::try_init();
        let mut exec = ActionExecutor::spawn(Box::new(Sleepy), Duration::from_millis(50))
            .unwrap()
            .with_stall_grace(Duration::from_secs(5));
        assert_eq!(exec.execute(&action(150)), ExecutionOutcome::TimedOut);
        let ExecutionOutcome::Completed(result) = exec.execute(&action(0)) else {
            panic!("expected completion");
        };
        assert_eq!(result.observations[1].descriptive, "slept_0");
    }

    #[test]
    fn driver_panics_become_failed_actions() {
        let mut exec = ActionExecutor::spawn(Box::new(Panicky), Duration::from_secs(5)).unwrap();
        let outcome = exec.execute(&action(0));
        assert_eq!(outcome, ExecutionOutcome::Completed(ActionResult::failed()));
        // The thread survives the panic.
        assert!(matches!(
            exec.execute(&action(0)),
            ExecutionOutcome::Completed(r) if !r.success
        ));
    }

    #[test]
    fn branch_and_line_observations_use_objective_names() {
        let mut r = ActionResult::succeeded();
        r.observe_line("Foo.kt", 3);
        let t = r.observe_branch("Foo.kt", 4, 0, Operator::Lt, (1i64, 2i64));
        assert!(t.is_true());
        assert_eq!(r.observations[0].descriptive, "Line_at_Foo.kt_00003");
        assert_eq!(
            r.observations[1].descriptive,
            "Branch_at_Foo.kt_at_line_00004_position_0_trueBranch"
        );
        assert_eq!(r.observations[1].value, 1.0);
    }
}
