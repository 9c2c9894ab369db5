// SPDX-License-Identifier: Apache-2.0

//! Small in-process systems under test for trying the search out.

use covsearch::{Action, ActionCatalog, ActionResult, Gene, Operator, SutDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Demo {
    /// Classic triangle classification over three integer sides.
    Triangle,
    /// A bank account opened by an initialization action, then deposits
    /// and withdrawals.
    Bank,
}

pub fn build(demo: Demo) -> (ActionCatalog, Box<dyn SutDriver>) {
    match demo {
        Demo::Triangle => (triangle_catalog(), Box::new(TriangleDriver)),
        Demo::Bank => (bank_catalog(), Box::new(BankDriver::default())),
    }
}

const TRIANGLE: &str = "triangle.rs";

fn triangle_catalog() -> ActionCatalog {
    ActionCatalog {
        actions: vec![Action::new(
            "classify",
            vec![
                Gene::int("a", -10, 200),
                Gene::int("b", -10, 200),
                Gene::int("c", -10, 200),
            ],
        )],
        init_actions: vec![],
    }
}

struct TriangleDriver;

impl SutDriver for TriangleDriver {
    fn execute(&mut self, action: &Action) -> ActionResult {
        let side = |name: &str| action.gene(name).and_then(|g| g.as_int()).unwrap_or(0);
        let mut sides = [side("a"), side("b"), side("c")];
        let mut r = ActionResult::succeeded();
        r.observe_line(TRIANGLE, 1);

        if r.observe_branch(TRIANGLE, 3, 0, Operator::Le, (sides.iter().copied().min().unwrap_or(0), 0))
            .is_true()
        {
            r.observe_line(TRIANGLE, 4);
            return r;
        }
        sides.sort_unstable();
        let [x, y, z] = sides;
        if r.observe_branch(TRIANGLE, 6, 0, Operator::Le, (x + y, z)).is_true() {
            r.observe_line(TRIANGLE, 7);
            return r;
        }
        if r.observe_branch(TRIANGLE, 9, 0, Operator::Eq, (x, z)).is_true() {
            r.observe_line(TRIANGLE, 10);
            return r;
        }
        let low_pair = r.observe_branch(TRIANGLE, 12, 0, Operator::Eq, (x, y)).is_true();
        if low_pair || r.observe_branch(TRIANGLE, 12, 1, Operator::Eq, (y, z)).is_true() {
            r.observe_line(TRIANGLE, 13);
            return r;
        }
        r.observe_line(TRIANGLE, 15);
        r
    }
}

const BANK: &str = "bank.rs";

fn bank_catalog() -> ActionCatalog {
    ActionCatalog {
        actions: vec![
            Action::new("deposit", vec![Gene::int("amount", -100, 1000)]),
            Action::new("withdraw", vec![Gene::int("amount", -100, 1000)]),
        ],
        init_actions: vec![Action::new(
            "open",
            vec![Gene::int("balance", 0, 500), Gene::string("owner", 8)],
        )],
    }
}

#[derive(Default)]
struct BankDriver {
    balance: Option<i64>,
}

impl SutDriver for BankDriver {
    fn reset(&mut self) {
        self.balance = None;
    }

    fn execute(&mut self, action: &Action) -> ActionResult {
        let amount = |name: &str| action.gene(name).and_then(|g| g.as_int()).unwrap_or(0);
        let mut r = ActionResult::succeeded();
        if action.name == "open" {
            r.observe_line(BANK, 1);
            let owner = action.gene("owner").and_then(|g| g.as_str()).unwrap_or("");
            if r.observe_is_empty("bank.rs_owner_is_empty", owner.len()).is_true() {
                r.observe_line(BANK, 2);
            } else if r
                .observe_string_equals("bank.rs_owner_is_admin", owner, Some("admin"))
                .is_true()
            {
                r.observe_line(BANK, 3);
            }
            self.balance = Some(amount("balance"));
            return r;
        }
        let Some(balance) = self.balance else {
            // Main actions are only ever run after `open`.
            return ActionResult::failed();
        };
        let amount = amount("amount");
        if r.observe_branch(BANK, 5, 0, Operator::Le, (amount, 0)).is_true() {
            r.observe_line(BANK, 6);
            return r;
        }
        match action.name.as_str() {
            "deposit" => {
                r.observe_line(BANK, 9);
                self.balance = Some(balance + amount);
            }
            _ => {
                if r.observe_branch(BANK, 12, 0, Operator::Gt, (amount, balance)).is_true() {
                    r.observe_line(BANK, 13);
                    return r;
                }
                let left = balance - amount;
                if r.observe_branch(BANK, 15, 0, Operator::Eq, (left, 0)).is_true() {
                    r.observe_line(BANK, 16);
                }
                self.balance = Some(left);
            }
        }
        r
    }
}
