//! Per-underlying risk budget.
//!
//! Keeps the worst-case loss of open spreads on one underlying within limits.

use optflow_core::{OptionSpread, Order};
use rust_decimal::Decimal;

/// Budget left for new spreads on one underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskBudget {
    limit: Decimal,
    committed: Decimal,
}

/// Result of checking a spread against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCheck {
    Approved {
        max_loss: Decimal,
        remaining_after: Decimal,
    },
    Rejected {
        max_loss: Decimal,
        remaining: Decimal,
    },
}

impl RiskBudget {
    #[must_use]
    pub fn new(limit: Decimal) -> Self {
        Self {
            limit,
            committed: Decimal::ZERO,
        }
    }

    /// Budget after the risk already committed by `orders` that hold positions.
    #[must_use]
    pub fn from_orders(limit: Decimal, orders: &[Order]) -> Self {
        let committed = orders
            .iter()
            .filter(|o| o.status.holds_position())
            .map(Order::committed_risk)
            .sum();
        Self { limit, committed }
    }

    #[must_use]
    pub fn committed(&self) -> Decimal {
        self.committed
    }

    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.limit - self.committed).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn check(&self, spread: &OptionSpread, quantity: Decimal) -> RiskCheck {
        let max_loss = spread.max_loss() * quantity;
        let remaining = self.remaining();
        if max_loss > remaining {
            RiskCheck::Rejected {
                max_loss,
                remaining,
            }
        } else {
            RiskCheck::Approved {
                max_loss,
                remaining_after: remaining - max_loss,
            }
        }
    }

    /// Counts `amount` against the budget.
    pub fn reserve(&mut self, amount: Decimal) {
        self.committed += amount;
    }
}
