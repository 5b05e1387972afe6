//! Token shop flows: buying and selling platform tokens.
//!
//! Both directions share the same shape: validate locally, submit at
//! most one request per user intent, and settle only on what the
//! server confirms. The displayed token count and cost always come
//! from the server's receipt, never from local arithmetic.

use tracing::info;

use crate::{
    api::{ApiClient, BuyReceipt, SellReceipt},
    config::{AppConfig, TokenPack},
    error::FlowError,
    notify::BalanceNotifier,
};

/// Client-computed projection of a pending sale. Exists only for the
/// duration of the confirmation step and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellQuote {
    /// Tokens offered for sale.
    pub tokens: u32,
    /// Gross value at the configured unit price.
    pub value: f64,
    /// Fee deducted from the gross value.
    pub fee: f64,
    /// Net payout after the fee.
    pub payout: f64,
    /// Fee rate used, kept for display alongside the amounts.
    pub fee_rate: f64,
}

impl SellQuote {
    /// Price a sale of `tokens` at the given unit price and fee rate.
    pub fn compute(tokens: u32, unit_price: f64, fee_rate: f64) -> Self {
        let value = f64::from(tokens) * unit_price;
        let fee = value * fee_rate;
        Self {
            tokens,
            value,
            fee,
            payout: value - fee,
            fee_rate,
        }
    }
}

/// Lifecycle of a buy or sell interaction.
///
/// Quote computation is synchronous, so a flow observed between calls
/// is never mid-quote; `Confirming` is the first externally visible
/// state after a quote.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangePhase {
    /// Nothing in progress.
    Idle,
    /// A sell quote awaits explicit confirmation of the terms.
    Confirming(SellQuote),
    /// A request is in flight; further triggers are dropped.
    Submitting,
    /// The last operation succeeded, with a server-confirmed summary.
    Settled(String),
    /// The last operation failed, with a user-facing message.
    Failed(String),
}

/// Outcome of a buy or sell trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A request was already in flight; this trigger was dropped.
    Ignored,
    /// The server confirmed the operation.
    Settled,
}

/// Buy/sell token flow with a single in-flight request guard.
pub struct TokenExchange {
    config: AppConfig,
    notifier: BalanceNotifier,
    phase: ExchangePhase,
}

impl TokenExchange {
    /// Create an idle flow.
    pub fn new(config: AppConfig, notifier: BalanceNotifier) -> Self {
        Self {
            config,
            notifier,
            phase: ExchangePhase::Idle,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &ExchangePhase {
        &self.phase
    }

    /// Whether a request is currently in flight.
    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, ExchangePhase::Submitting)
    }

    /// Return to idle, discarding any settled/failed summary.
    pub fn reset(&mut self) {
        if !self.is_submitting() {
            self.phase = ExchangePhase::Idle;
        }
    }

    /// Parse a raw currency amount, rejecting anything that is not a
    /// positive finite number before any network traffic.
    pub fn parse_buy_amount(input: &str) -> Result<f64, String> {
        match input.trim().parse::<f64>() {
            Ok(amount) if amount > 0.0 && amount.is_finite() => Ok(amount),
            _ => Err("Enter a valid amount.".to_string()),
        }
    }

    /// Buy tokens for a free-form currency amount.
    pub async fn buy(
        &mut self,
        api: &ApiClient,
        user_id: i64,
        input: &str,
    ) -> Result<ExchangeOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(ExchangeOutcome::Ignored);
        }
        let dollars = Self::parse_buy_amount(input).map_err(FlowError::Invalid)?;
        self.submit_buy(api, user_id, dollars).await
    }

    /// Buy one of the fixed token packs.
    pub async fn buy_pack(
        &mut self,
        api: &ApiClient,
        user_id: i64,
        pack: TokenPack,
    ) -> Result<ExchangeOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(ExchangeOutcome::Ignored);
        }
        self.submit_buy(api, user_id, pack.price).await
    }

    async fn submit_buy(
        &mut self,
        api: &ApiClient,
        user_id: i64,
        dollars: f64,
    ) -> Result<ExchangeOutcome, FlowError> {
        self.phase = ExchangePhase::Submitting;
        match api.buy_tokens(user_id, dollars).await {
            Ok(receipt) => {
                self.settle_buy(receipt);
                Ok(ExchangeOutcome::Settled)
            }
            Err(err) => {
                self.phase = ExchangePhase::Failed(err.to_string());
                Err(err.into())
            }
        }
    }

    fn settle_buy(&mut self, receipt: BuyReceipt) {
        info!(
            tokens = receipt.tokens_added,
            cost = receipt.cost,
            "token purchase settled"
        );
        self.phase = ExchangePhase::Settled(format!(
            "Bought {} tokens for ${:.2}.",
            receipt.tokens_added, receipt.cost
        ));
        self.notifier.notify();
    }

    /// Validate a sell amount against the last known balance and
    /// compute a quote for confirmation. Both checks are client-side
    /// conveniences; the server remains authoritative.
    ///
    /// Returns `Ok(None)` while a request is in flight; like every
    /// other trigger, it is dropped rather than queued.
    pub fn quote_sell(&mut self, input: &str, balance: i64) -> Result<Option<SellQuote>, FlowError> {
        if self.is_submitting() {
            return Ok(None);
        }
        let tokens = match input.trim().parse::<u32>() {
            Ok(tokens) if tokens > 0 => tokens,
            _ => return Err(FlowError::Invalid("Enter a valid token amount.".to_string())),
        };
        if i64::from(tokens) > balance {
            return Err(FlowError::Invalid("Not enough tokens to sell.".to_string()));
        }

        let quote = SellQuote::compute(tokens, self.config.token_price, self.config.sell_fee_rate);
        self.phase = ExchangePhase::Confirming(quote);
        Ok(Some(quote))
    }

    /// Abandon a quoted sale.
    pub fn cancel_sell(&mut self) {
        if matches!(self.phase, ExchangePhase::Confirming(_)) {
            self.phase = ExchangePhase::Idle;
        }
    }

    /// Submit the quoted sale. Requires the terms to have been
    /// explicitly acknowledged.
    pub async fn confirm_sell(
        &mut self,
        api: &ApiClient,
        user_id: i64,
        agreed_to_terms: bool,
    ) -> Result<ExchangeOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(ExchangeOutcome::Ignored);
        }
        let ExchangePhase::Confirming(quote) = &self.phase else {
            return Err(FlowError::Invalid(
                "No sale is awaiting confirmation.".to_string(),
            ));
        };
        if !agreed_to_terms {
            return Err(FlowError::Invalid(
                "Please agree to the terms and conditions.".to_string(),
            ));
        }

        let tokens = quote.tokens;
        self.phase = ExchangePhase::Submitting;
        match api.sell_tokens(user_id, tokens).await {
            Ok(receipt) => {
                self.settle_sell(receipt);
                Ok(ExchangeOutcome::Settled)
            }
            Err(err) => {
                self.phase = ExchangePhase::Failed(err.to_string());
                Err(err.into())
            }
        }
    }

    fn settle_sell(&mut self, receipt: SellReceipt) {
        info!(
            tokens = receipt.tokens_sold,
            payout = receipt.payout,
            "token sale settled"
        );
        self.phase = ExchangePhase::Settled(format!(
            "Sold {} tokens for ${:.2} (after fee).",
            receipt.tokens_sold, receipt.payout
        ));
        self.notifier.notify();
    }

    #[cfg(test)]
    fn set_phase(&mut self, phase: ExchangePhase) {
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> TokenExchange {
        TokenExchange::new(AppConfig::default(), BalanceNotifier::new())
    }

    // The client is never contacted in these tests; the port is closed.
    fn unreachable_api() -> ApiClient {
        ApiClient::new("http://127.0.0.1:1")
    }

    #[test]
    fn quote_arithmetic_matches_the_fee_schedule() {
        let price = 0.5;
        let fee_rate = 0.04;
        for tokens in [1u32, 2, 7, 10, 99, 250, 1000] {
            let quote = SellQuote::compute(tokens, price, fee_rate);
            let value = f64::from(tokens) * price;
            assert_eq!(quote.value, value);
            assert_eq!(quote.fee, value * fee_rate);
            assert_eq!(quote.payout, value - quote.fee);
            assert!((quote.payout - value * (1.0 - fee_rate)).abs() < 1e-9);
        }
    }

    #[test]
    fn selling_more_than_the_balance_is_rejected_locally() {
        let mut flow = flow();
        let balance = 50;
        for tokens in [51, 60, 100, 499, 500] {
            let err = flow
                .quote_sell(&tokens.to_string(), balance)
                .expect_err("over-balance must be rejected");
            assert!(matches!(err, FlowError::Invalid(_)));
            assert_eq!(*flow.phase(), ExchangePhase::Idle);
        }
        assert!(flow.quote_sell("50", balance).is_ok());
    }

    #[test]
    fn non_numeric_sell_input_is_rejected() {
        let mut flow = flow();
        for input in ["", "abc", "-5", "0", "1.5"] {
            let err = flow.quote_sell(input, 100).expect_err("invalid input");
            assert!(matches!(err, FlowError::Invalid(_)));
        }
    }

    #[test]
    fn buy_amount_validation_rejects_garbage() {
        assert!(TokenExchange::parse_buy_amount("5").is_ok());
        assert!(TokenExchange::parse_buy_amount(" 12.50 ").is_ok());
        for input in ["-5", "abc", "0", "", "NaN", "inf"] {
            assert!(
                TokenExchange::parse_buy_amount(input).is_err(),
                "{input:?} must be rejected"
            );
        }
    }

    #[tokio::test]
    async fn invalid_buy_input_never_reaches_the_network() {
        let mut flow = flow();
        let err = flow
            .buy(&unreachable_api(), 1, "abc")
            .await
            .expect_err("local rejection");
        // A transport error here would mean a request was attempted.
        assert!(matches!(err, FlowError::Invalid(_)));
        assert_eq!(*flow.phase(), ExchangePhase::Idle);
    }

    #[test]
    fn reentrant_quote_is_dropped_while_submitting() {
        let mut flow = flow();
        flow.set_phase(ExchangePhase::Submitting);
        let quote = flow.quote_sell("10", 100).expect("dropped, not errored");
        assert!(quote.is_none());
        assert!(flow.is_submitting());
    }

    #[tokio::test]
    async fn reentrant_buy_is_dropped_while_submitting() {
        let mut flow = flow();
        flow.set_phase(ExchangePhase::Submitting);
        let outcome = flow
            .buy(&unreachable_api(), 1, "5")
            .await
            .expect("dropped, not errored");
        assert_eq!(outcome, ExchangeOutcome::Ignored);
        assert!(flow.is_submitting());
    }

    #[tokio::test]
    async fn confirm_requires_terms_acknowledgment() {
        let mut flow = flow();
        flow.quote_sell("10", 100).expect("quote");
        let err = flow
            .confirm_sell(&unreachable_api(), 1, false)
            .await
            .expect_err("terms not acknowledged");
        assert!(matches!(err, FlowError::Invalid(_)));
        // The quote survives so the user can still confirm.
        assert!(matches!(flow.phase(), ExchangePhase::Confirming(_)));
    }

    #[tokio::test]
    async fn confirm_without_a_quote_is_invalid() {
        let mut flow = flow();
        let err = flow
            .confirm_sell(&unreachable_api(), 1, true)
            .await
            .expect_err("no quote");
        assert!(matches!(err, FlowError::Invalid(_)));
    }

    #[test]
    fn cancel_discards_the_quote() {
        let mut flow = flow();
        flow.quote_sell("10", 100).expect("quote");
        flow.cancel_sell();
        assert_eq!(*flow.phase(), ExchangePhase::Idle);
    }

    #[tokio::test]
    async fn transport_failure_rolls_into_failed_state() {
        let mut flow = flow();
        let err = flow
            .buy(&unreachable_api(), 1, "5")
            .await
            .expect_err("transport failure");
        assert!(matches!(err, FlowError::Api(_)));
        assert!(matches!(flow.phase(), ExchangePhase::Failed(_)));
        // The flow is reusable afterwards.
        flow.reset();
        assert_eq!(*flow.phase(), ExchangePhase::Idle);
    }
}
