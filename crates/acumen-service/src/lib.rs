//! Acumen Service - the unified assessment progression service
//!
//! The single entry point surrounding layers talk to. Every caller-facing
//! operation runs the same pipeline: gate authorization, state machine
//! transition, scoring, progression update, certificate issuance. HTTP/RPC
//! binding, persistence engines, and notification delivery all live outside
//! this crate, behind the storage traits.

#![deny(unsafe_code)]

use acumen_certificates::{CertificateError, CertificateIssuer};
use acumen_engine::{
    AssessmentEngine, Clock, EngineError, GradedSubmission, ShuffleSource, SubmittedAnswer,
};
use acumen_gate::{GateError, ProgressionGate};
use acumen_scoring::is_hard_fail;
use acumen_storage::{EngineStorage, StorageError};
use acumen_types::{
    Assessment, AssessmentId, AssessmentOutcome, AssessmentStatus, Certificate, HistoryEntry,
    Step, UserId, UserProgression,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub struct AssessmentService<S> {
    storage: Arc<S>,
    gate: ProgressionGate<S>,
    engine: AssessmentEngine<S>,
    issuer: CertificateIssuer<S>,
}

impl<S: EngineStorage> AssessmentService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            gate: ProgressionGate::new(storage.clone()),
            engine: AssessmentEngine::new(storage.clone()),
            issuer: CertificateIssuer::new(storage.clone()),
            storage,
        }
    }

    /// Create with injected shuffle and clock, for deterministic tests.
    pub fn with_parts(
        storage: Arc<S>,
        shuffle: Arc<dyn ShuffleSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: ProgressionGate::new(storage.clone()),
            engine: AssessmentEngine::with_parts(storage.clone(), shuffle, clock),
            issuer: CertificateIssuer::new(storage.clone()),
            storage,
        }
    }

    /// Gate-checked assessment creation. At most one open (pending or
    /// in-progress) attempt per user and step at a time.
    pub async fn request_assessment(
        &self,
        user_id: &UserId,
        step_number: u8,
    ) -> Result<Assessment, ServiceError> {
        let step =
            Step::from_number(step_number).ok_or(ServiceError::InvalidStep(step_number))?;
        self.gate.authorize_step(user_id, step).await?;

        for status in [AssessmentStatus::Pending, AssessmentStatus::InProgress] {
            if let Some(open) = self
                .storage
                .find_latest_by_user_and_step(user_id, step, Some(status))
                .await?
            {
                return Err(ServiceError::AttemptAlreadyOpen(open.id));
            }
        }

        Ok(self.engine.create(user_id.clone(), step).await?)
    }

    /// The step this user would be granted right now.
    pub async fn next_eligible_step(&self, user_id: &UserId) -> Result<Step, ServiceError> {
        Ok(self.gate.next_eligible_step(user_id).await?)
    }

    pub async fn begin_assessment(&self, id: &AssessmentId) -> Result<Assessment, ServiceError> {
        Ok(self.engine.start(id).await?)
    }

    /// Grade a submission and run the full completion pipeline.
    pub async fn submit_assessment(
        &self,
        id: &AssessmentId,
        answers: &[SubmittedAnswer],
    ) -> Result<AssessmentOutcome, ServiceError> {
        let graded = self.engine.submit(id, answers).await?;
        self.apply_completion(graded).await
    }

    /// Force-score an out-of-time attempt. Identical pipeline to submission;
    /// the assessment lands in the `expired` terminal state.
    pub async fn expire_assessment(
        &self,
        id: &AssessmentId,
        answers: &[SubmittedAnswer],
    ) -> Result<AssessmentOutcome, ServiceError> {
        let graded = self.engine.expire(id, answers).await?;
        self.apply_completion(graded).await
    }

    pub async fn remaining_seconds(&self, id: &AssessmentId) -> Result<i64, ServiceError> {
        Ok(self.engine.remaining_seconds(id).await?)
    }

    // ============ Read paths for surrounding layers ============

    pub async fn assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>, ServiceError> {
        Ok(self.storage.get_assessment(id).await?)
    }

    pub async fn progression(&self, user_id: &UserId) -> Result<UserProgression, ServiceError> {
        Ok(self
            .storage
            .get_progression(user_id)
            .await?
            .unwrap_or_else(|| UserProgression::new(user_id.clone())))
    }

    pub async fn certificate_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Option<Certificate>, ServiceError> {
        Ok(self.storage.find_by_assessment(id).await?)
    }

    /// Post-grading side effects, applied exactly once per completion: the
    /// engine's optimistic write already guaranteed this caller is the only
    /// one holding a freshly graded result.
    async fn apply_completion(
        &self,
        graded: GradedSubmission,
    ) -> Result<AssessmentOutcome, ServiceError> {
        let assessment = graded.assessment;
        let outcome = graded.outcome;
        let percentage = assessment.percentage.unwrap_or_default();

        if is_hard_fail(assessment.step, percentage) {
            self.gate.apply_hard_fail_lockout(&assessment.user_id).await?;
        }

        let mut progression = self
            .storage
            .get_progression(&assessment.user_id)
            .await?
            .unwrap_or_else(|| UserProgression::new(assessment.user_id.clone()));

        if let Some(level) = outcome.achieved_level {
            progression.history.push(HistoryEntry {
                step: assessment.step,
                percentage,
                level,
                date: assessment.completed_at.unwrap_or_else(chrono::Utc::now),
            });
            // Certified level never regresses on a floor-fallback result.
            progression.current_level = Some(match progression.current_level {
                Some(current) => current.max(level),
                None => level,
            });
        }

        let unlocks = outcome.can_proceed
            || (assessment.step == Step::Three && outcome.certificate_level.is_some());
        if unlocks && !progression.has_completed(assessment.step) {
            progression.completed_steps.push(assessment.step);
        }

        self.storage.upsert_progression(progression).await?;

        let certificate = self.issuer.issue_if_earned(&assessment).await?;
        info!(
            assessment_id = %assessment.id,
            user_id = %assessment.user_id,
            step = %assessment.step,
            percentage,
            certified = certificate.is_some(),
            "assessment completion applied"
        );

        Ok(AssessmentOutcome {
            assessment_id: assessment.id,
            score: assessment.score.unwrap_or_default(),
            percentage,
            achieved_level: outcome.achieved_level,
            certificate_level: outcome.certificate_level,
            can_proceed: outcome.can_proceed,
            certificate,
        })
    }
}

/// Service-level errors: the union of everything the pipeline can reject.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("step {0} does not exist, expected 1, 2, or 3")]
    InvalidStep(u8),

    #[error("an open attempt {0} already exists for this user and step")]
    AttemptAlreadyOpen(AssessmentId),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
