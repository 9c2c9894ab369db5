// SPDX-License-Identifier: Apache-2.0

//! Toy systems under test shared by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use covsearch::{Action, ActionCatalog, ActionResult, Gene, Operator, SutDriver};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One action with `bits` boolean genes `b0..`.
pub fn onemax_catalog(bits: usize) -> ActionCatalog {
    let genes = (0..bits).map(|i| Gene::boolean(&format!("b{}", i))).collect();
    ActionCatalog {
        actions: vec![Action::new("flip", genes)],
        init_actions: vec![],
    }
}

pub fn onemax_target(i: usize) -> String {
    format!("OneMax_{:03}", i)
}

/// Target `OneMax_<i>` is covered by any action whose gene `b<i>` is set;
/// a clear bit only reaches it.
pub struct OneMaxDriver {
    pub bits: usize,
}

impl SutDriver for OneMaxDriver {
    fn execute(&mut self, action: &Action) -> ActionResult {
        let mut r = ActionResult::succeeded();
        for i in 0..self.bits {
            let set = action
                .gene(&format!("b{}", i))
                .and_then(|g| g.as_bool())
                .unwrap_or(false);
            r.observe(onemax_target(i), if set { 1.0 } else { 0.5 });
        }
        r
    }
}

/// One action `check(x, y)` with integer genes.
pub fn numbers_catalog() -> ActionCatalog {
    ActionCatalog {
        actions: vec![Action::new(
            "check",
            vec![Gene::int("x", -1000, 1000), Gene::int("y", -1000, 1000)],
        )],
        init_actions: vec![],
    }
}

/// Branches on `x == 42` and, when that holds, on `y < x`.
pub struct NumberBranchesDriver;

impl SutDriver for NumberBranchesDriver {
    fn execute(&mut self, action: &Action) -> ActionResult {
        let x = action.gene("x").and_then(|g| g.as_int()).unwrap_or(0);
        let y = action.gene("y").and_then(|g| g.as_int()).unwrap_or(0);
        let mut r = ActionResult::succeeded();
        r.observe_line("Numbers.kt", 10);
        if r.observe_comparison("x_eq_42", Operator::Eq, (x, 42)).is_true() {
            r.observe_line("Numbers.kt", 11);
            r.observe_comparison("y_lt_x", Operator::Lt, (y, x));
        }
        r
    }
}

/// Reports every action as not executed, e.g. a SUT that refuses
/// connections.
#[derive(Default)]
pub struct FailingDriver {
    pub calls: Arc<AtomicUsize>,
}

impl SutDriver for FailingDriver {
    fn execute(&mut self, _action: &Action) -> ActionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ActionResult::failed()
    }
}

/// Blocks on the first action for `delay`, then behaves like `inner`.
pub struct SlowStartDriver<D: SutDriver> {
    pub inner: D,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl<D: SutDriver> SutDriver for SlowStartDriver<D> {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn execute(&mut self, action: &Action) -> ActionResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(self.delay);
        }
        self.inner.execute(action)
    }
}

/// Runs `inner`, then reports the action as failed while keeping the
/// observations it made, like a SUT that crashes after doing some work.
pub struct CrashAfterWorkDriver<D: SutDriver> {
    pub inner: D,
}

impl<D: SutDriver> SutDriver for CrashAfterWorkDriver<D> {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn execute(&mut self, action: &Action) -> ActionResult {
        let mut r = self.inner.execute(action);
        r.success = false;
        r
    }
}

/// Blocks on every action for `delay`.
pub struct HangingDriver {
    pub delay: Duration,
}

impl SutDriver for HangingDriver {
    fn execute(&mut self, _action: &Action) -> ActionResult {
        std::thread::sleep(self.delay);
        ActionResult::succeeded()
    }
}

/// Wraps another driver and fails every `fail_every`-th action.
pub struct FlakyDriver<D: SutDriver> {
    pub inner: D,
    pub fail_every: usize,
    calls: usize,
}

impl<D: SutDriver> FlakyDriver<D> {
    pub fn new(inner: D, fail_every: usize) -> Self {
        assert!(fail_every > 0);
        FlakyDriver {
            inner,
            fail_every,
            calls: 0,
        }
    }
}

impl<D: SutDriver> SutDriver for FlakyDriver<D> {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn execute(&mut self, action: &Action) -> ActionResult {
        self.calls += 1;
        if self.calls % self.fail_every == 0 {
            log::debug!("flaky driver failing call {}", self.calls);
            return ActionResult::failed();
        }
        self.inner.execute(action)
    }
}
