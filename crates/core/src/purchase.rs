//! Buying a quantity of a category's aggregate stock.
//!
//! There is no client-side reservation: the server alone decides
//! whether enough stock remains, and a rejection is surfaced verbatim
//! with no retry. After a successful purchase the caller reloads the
//! catalog in full rather than patching it locally.

use tracing::info;

use crate::{api::ApiClient, error::FlowError, models::Category, notify::BalanceNotifier};

/// Coerce a requested quantity into `[1, available_kg]`.
///
/// Out-of-range values are pulled back into range rather than
/// rejected, matching how the quantity input behaves on every change.
pub fn clamp_quantity(input: f64, available_kg: f64) -> f64 {
    if !input.is_finite() {
        return 1.0;
    }
    input.clamp(1.0, available_kg.max(1.0))
}

/// Lifecycle of a category purchase.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchasePhase {
    /// Nothing in progress.
    Idle,
    /// A purchase request is in flight.
    Submitting,
    /// The server confirmed the purchase.
    Settled(String),
    /// The purchase failed, with a user-facing message.
    Failed(String),
}

/// Outcome of a purchase trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// A request was already in flight; this trigger was dropped.
    Ignored,
    /// The server confirmed, with its message. The catalog and
    /// balance must now be re-fetched.
    Settled(String),
}

/// Category purchase flow with a single in-flight request guard.
pub struct CategoryPurchase {
    notifier: BalanceNotifier,
    phase: PurchasePhase,
}

impl CategoryPurchase {
    /// Create an idle flow.
    pub fn new(notifier: BalanceNotifier) -> Self {
        Self {
            notifier,
            phase: PurchasePhase::Idle,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &PurchasePhase {
        &self.phase
    }

    /// Whether a request is currently in flight.
    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, PurchasePhase::Submitting)
    }

    /// Buy `quantity_kg` of a category's stock. The quantity is
    /// clamped into range one final time before submission.
    pub async fn submit(
        &mut self,
        api: &ApiClient,
        buyer_id: i64,
        category: Category,
        quantity_kg: f64,
        available_kg: f64,
    ) -> Result<PurchaseOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(PurchaseOutcome::Ignored);
        }
        if available_kg <= 0.0 {
            return Err(FlowError::Invalid(format!(
                "No {category} stock is currently available."
            )));
        }

        let quantity = clamp_quantity(quantity_kg, available_kg);
        self.phase = PurchasePhase::Submitting;
        match api.buy_category(buyer_id, category, quantity).await {
            Ok(msg) => {
                info!(%category, quantity, "category purchase settled");
                self.phase = PurchasePhase::Settled(msg.clone());
                self.notifier.notify();
                Ok(PurchaseOutcome::Settled(msg))
            }
            Err(err) => {
                self.phase = PurchasePhase::Failed(err.to_string());
                Err(err.into())
            }
        }
    }

    #[cfg(test)]
    fn set_phase(&mut self, phase: PurchasePhase) {
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_is_clamped_into_range() {
        let available = 40.0;
        assert_eq!(clamp_quantity(0.0, available), 1.0);
        assert_eq!(clamp_quantity(-3.0, available), 1.0);
        assert_eq!(clamp_quantity(available + 50.0, available), available);
        assert_eq!(clamp_quantity(12.5, available), 12.5);
        assert_eq!(clamp_quantity(1.0, available), 1.0);
        assert_eq!(clamp_quantity(available, available), available);
        assert_eq!(clamp_quantity(f64::NAN, available), 1.0);
    }

    #[test]
    fn tiny_stock_still_yields_a_valid_quantity() {
        // With less than a kilogram available the lower bound wins.
        assert_eq!(clamp_quantity(5.0, 0.4), 1.0);
    }

    #[tokio::test]
    async fn reentrant_purchase_is_dropped_while_submitting() {
        let mut flow = CategoryPurchase::new(BalanceNotifier::new());
        flow.set_phase(PurchasePhase::Submitting);
        let outcome = flow
            .submit(
                &ApiClient::new("http://127.0.0.1:1"),
                1,
                Category::Plastic,
                5.0,
                40.0,
            )
            .await
            .expect("dropped, not errored");
        assert_eq!(outcome, PurchaseOutcome::Ignored);
    }

    #[tokio::test]
    async fn empty_stock_is_rejected_locally() {
        let mut flow = CategoryPurchase::new(BalanceNotifier::new());
        let err = flow
            .submit(
                &ApiClient::new("http://127.0.0.1:1"),
                1,
                Category::Glass,
                5.0,
                0.0,
            )
            .await
            .expect_err("no stock");
        assert!(matches!(err, FlowError::Invalid(_)));
        assert_eq!(*flow.phase(), PurchasePhase::Idle);
    }

    #[tokio::test]
    async fn transport_failure_lands_in_failed_state() {
        let mut flow = CategoryPurchase::new(BalanceNotifier::new());
        let err = flow
            .submit(
                &ApiClient::new("http://127.0.0.1:1"),
                1,
                Category::Plastic,
                5.0,
                40.0,
            )
            .await
            .expect_err("transport failure");
        assert!(matches!(err, FlowError::Api(_)));
        assert!(matches!(flow.phase(), PurchasePhase::Failed(_)));
    }
}
