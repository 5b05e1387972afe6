//! Item upload with AI-assisted category verification.
//!
//! A declared category is checked against the prediction service
//! before anything is persisted. The user may override a mismatch
//! only while the model itself is uncertain; a high-confidence
//! contradiction is treated as likely user error and blocks
//! submission until the input changes.

use tracing::info;

use crate::{
    api::{ApiClient, CategoryCheck, UploadRequest},
    config::AppConfig,
    error::FlowError,
    models::{Category, User},
};

/// What the verification verdict means for this submission.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    /// Declared category matches the prediction; proceed directly.
    Verified,
    /// Mismatch, but the model is uncertain: the user chooses to
    /// proceed anyway (recorded as unverified) or to cancel.
    OverrideAvailable(CategoryCheck),
    /// High-confidence mismatch: no override, the user must change
    /// their input.
    Blocked(CategoryCheck),
}

/// Sort a verification verdict into its tier.
pub fn classify_check(check: CategoryCheck, threshold: f64) -> VerificationOutcome {
    if check.verified {
        VerificationOutcome::Verified
    } else if check.confidence >= threshold {
        VerificationOutcome::Blocked(check)
    } else {
        VerificationOutcome::OverrideAvailable(check)
    }
}

/// User-entered item details awaiting submission.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    /// Free-form description.
    pub description: String,
    /// URL of the already-hosted item photo.
    pub image_url: String,
    /// Declared category.
    pub category: Category,
    /// Declared weight in kilograms.
    pub amount_kg: f64,
}

impl ItemDraft {
    /// Local validation, run before any network call.
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Description is required.".to_string());
        }
        if self.image_url.trim().is_empty() {
            return Err("Image is required.".to_string());
        }
        if self.amount_kg <= 0.0 || !self.amount_kg.is_finite() {
            return Err("Enter a valid weight in kilograms.".to_string());
        }
        Ok(())
    }
}

/// Lifecycle of an upload.
#[derive(Debug, Clone)]
pub enum UploadPhase {
    /// The draft is being edited.
    Editing,
    /// Verification or persistence is in flight.
    Submitting,
    /// A low-confidence mismatch awaits the user's override decision.
    NeedsOverride(CategoryCheck),
    /// The item was persisted.
    Done,
    /// The upload failed, with a user-facing message.
    Failed(String),
}

/// Outcome of an upload trigger.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// A request was already in flight; this trigger was dropped.
    Ignored,
    /// The item was persisted.
    Done,
    /// The user must choose: proceed unverified or cancel.
    NeedsOverride(CategoryCheck),
    /// High-confidence mismatch; submission stays blocked.
    Blocked(CategoryCheck),
}

/// Upload flow with verification tiers and a single in-flight guard.
pub struct UploadFlow {
    config: AppConfig,
    phase: UploadPhase,
}

impl UploadFlow {
    /// Create a flow in the editing state.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            phase: UploadPhase::Editing,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &UploadPhase {
        &self.phase
    }

    /// Whether verification or persistence is in flight.
    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, UploadPhase::Submitting)
    }

    /// Return to editing, e.g. after a completed or failed upload.
    pub fn reset(&mut self) {
        if !self.is_submitting() {
            self.phase = UploadPhase::Editing;
        }
    }

    /// Verify the draft's category and, when allowed, persist it.
    pub async fn submit(
        &mut self,
        api: &ApiClient,
        user: &User,
        draft: &ItemDraft,
    ) -> Result<UploadOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(UploadOutcome::Ignored);
        }
        draft.validate().map_err(FlowError::Invalid)?;

        self.phase = UploadPhase::Submitting;
        let check = match api.verify_category(draft.category, &draft.image_url).await {
            Ok(check) => check,
            Err(err) => {
                self.phase = UploadPhase::Failed(err.to_string());
                return Err(err.into());
            }
        };

        match classify_check(check, self.config.verify_confidence_threshold) {
            VerificationOutcome::Verified => self.persist(api, user, draft, false).await,
            VerificationOutcome::OverrideAvailable(check) => {
                self.phase = UploadPhase::NeedsOverride(check.clone());
                Ok(UploadOutcome::NeedsOverride(check))
            }
            VerificationOutcome::Blocked(check) => {
                let predicted = check
                    .predicted_category
                    .map_or_else(|| "another category".to_string(), |c| c.to_string());
                self.phase = UploadPhase::Failed(format!(
                    "This looks like {predicted} ({:.0}% confidence). Change the category to continue.",
                    check.confidence * 100.0
                ));
                Ok(UploadOutcome::Blocked(check))
            }
        }
    }

    /// Proceed past a low-confidence mismatch, recording the item as
    /// explicitly unverified.
    pub async fn confirm_override(
        &mut self,
        api: &ApiClient,
        user: &User,
        draft: &ItemDraft,
    ) -> Result<UploadOutcome, FlowError> {
        if self.is_submitting() {
            return Ok(UploadOutcome::Ignored);
        }
        if !matches!(self.phase, UploadPhase::NeedsOverride(_)) {
            return Err(FlowError::Invalid(
                "No upload is awaiting an override decision.".to_string(),
            ));
        }
        self.phase = UploadPhase::Submitting;
        self.persist(api, user, draft, true).await
    }

    /// Abandon the pending override and return to editing.
    pub fn cancel_override(&mut self) {
        if matches!(self.phase, UploadPhase::NeedsOverride(_)) {
            self.phase = UploadPhase::Editing;
        }
    }

    async fn persist(
        &mut self,
        api: &ApiClient,
        user: &User,
        draft: &ItemDraft,
        force_unverified: bool,
    ) -> Result<UploadOutcome, FlowError> {
        let request = UploadRequest {
            user_id: user.id,
            username: user.username.clone(),
            description: draft.description.clone(),
            image_url: draft.image_url.clone(),
            category: draft.category,
            amount_kg: draft.amount_kg,
            force_unverified,
        };
        match api.upload(&request).await {
            Ok(()) => {
                info!(category = %draft.category, force_unverified, "item uploaded");
                self.phase = UploadPhase::Done;
                Ok(UploadOutcome::Done)
            }
            Err(err) => {
                self.phase = UploadPhase::Failed(err.to_string());
                Err(err.into())
            }
        }
    }

    #[cfg(test)]
    fn set_phase(&mut self, phase: UploadPhase) {
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(verified: bool, confidence: f64) -> CategoryCheck {
        CategoryCheck {
            verified,
            confidence,
            predicted_category: Some(Category::Metal),
        }
    }

    fn draft() -> ItemDraft {
        ItemDraft {
            description: "rusty pipes".to_string(),
            image_url: "https://img.example/pipes.jpg".to_string(),
            category: Category::Plastic,
            amount_kg: 3.0,
        }
    }

    fn user() -> User {
        User {
            id: 1,
            username: "asha".to_string(),
            email: "asha@example.com".to_string(),
            level: "basic".to_string(),
            tokens: 0,
        }
    }

    #[test]
    fn uncertain_mismatch_offers_an_override() {
        // Declared Plastic, predicted Metal at 0.80 — below the bar.
        let outcome = classify_check(check(false, 0.80), 0.95);
        assert!(matches!(outcome, VerificationOutcome::OverrideAvailable(_)));
    }

    #[test]
    fn confident_mismatch_blocks_submission() {
        let outcome = classify_check(check(false, 0.97), 0.95);
        assert!(matches!(outcome, VerificationOutcome::Blocked(_)));
    }

    #[test]
    fn threshold_boundary_blocks() {
        // At exactly the threshold the model is treated as confident.
        let outcome = classify_check(check(false, 0.95), 0.95);
        assert!(matches!(outcome, VerificationOutcome::Blocked(_)));
    }

    #[test]
    fn verified_items_skip_both_tiers() {
        let outcome = classify_check(check(true, 0.99), 0.95);
        assert!(matches!(outcome, VerificationOutcome::Verified));
    }

    #[test]
    fn draft_validation_catches_empty_fields() {
        let mut bad = draft();
        bad.description = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = draft();
        bad.image_url = String::new();
        assert!(bad.validate().is_err());

        let mut bad = draft();
        bad.amount_kg = 0.0;
        assert!(bad.validate().is_err());

        assert!(draft().validate().is_ok());
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_the_network() {
        let mut flow = UploadFlow::new(AppConfig::default());
        let mut bad = draft();
        bad.amount_kg = -1.0;
        let err = flow
            .submit(&ApiClient::new("http://127.0.0.1:1"), &user(), &bad)
            .await
            .expect_err("local rejection");
        assert!(matches!(err, FlowError::Invalid(_)));
        assert!(matches!(flow.phase(), UploadPhase::Editing));
    }

    #[tokio::test]
    async fn reentrant_submit_is_dropped_while_in_flight() {
        let mut flow = UploadFlow::new(AppConfig::default());
        flow.set_phase(UploadPhase::Submitting);
        let outcome = flow
            .submit(&ApiClient::new("http://127.0.0.1:1"), &user(), &draft())
            .await
            .expect("dropped, not errored");
        assert!(matches!(outcome, UploadOutcome::Ignored));
    }

    #[tokio::test]
    async fn override_requires_a_pending_decision() {
        let mut flow = UploadFlow::new(AppConfig::default());
        let err = flow
            .confirm_override(&ApiClient::new("http://127.0.0.1:1"), &user(), &draft())
            .await
            .expect_err("nothing pending");
        assert!(matches!(err, FlowError::Invalid(_)));
    }

    #[test]
    fn cancel_returns_to_editing() {
        let mut flow = UploadFlow::new(AppConfig::default());
        flow.set_phase(UploadPhase::NeedsOverride(check(false, 0.8)));
        flow.cancel_override();
        assert!(matches!(flow.phase(), UploadPhase::Editing));
    }
}
