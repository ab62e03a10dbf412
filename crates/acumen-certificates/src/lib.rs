//! Acumen Certificates - mints certificates for earned levels
//!
//! The issuer reacts to a terminal assessment: if its score band carries a
//! certificate level, exactly one certificate is created for it, no matter
//! how many times issuance is invoked or retried. Uniqueness is enforced by
//! the store (one certificate per assessment, globally unique numbers); the
//! issuer treats losing that race as success.

#![deny(unsafe_code)]

use acumen_scoring::determine_outcome;
use acumen_storage::{CertificateStore, StorageError};
use acumen_types::{Assessment, Certificate, CertificateId, CertificateStatus, Level};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// How many fresh certificate numbers to try before giving up. Collisions
/// need a same-millisecond, same-level, same-suffix draw, so one retry is
/// already overkill.
const NUMBER_ATTEMPTS: usize = 3;

pub struct CertificateIssuer<S> {
    storage: Arc<S>,
}

impl<S: CertificateStore> CertificateIssuer<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Mint a certificate for a terminal assessment if its band earned one.
    ///
    /// Returns `None` when the score band carries no certificate level.
    /// Safe to call repeatedly for the same assessment: the first issuance
    /// wins and later calls return that certificate.
    pub async fn issue_if_earned(
        &self,
        assessment: &Assessment,
    ) -> Result<Option<Certificate>, CertificateError> {
        if !assessment.status.is_terminal() {
            return Err(CertificateError::NotCompleted(assessment.id.clone()));
        }
        let percentage = assessment
            .percentage
            .ok_or_else(|| CertificateError::NotCompleted(assessment.id.clone()))?;

        // The band is a pure function of (step, percentage), so recomputing
        // here keeps issuance retry-safe with no extra persisted state.
        let outcome = determine_outcome(assessment.step, percentage);
        let Some(level) = outcome.certificate_level else {
            return Ok(None);
        };

        if let Some(existing) = self.storage.find_by_assessment(&assessment.id).await? {
            debug!(assessment_id = %assessment.id, "certificate already issued, skipping");
            return Ok(Some(existing));
        }

        let mut last_conflict = None;
        for _ in 0..NUMBER_ATTEMPTS {
            let certificate = Certificate {
                id: CertificateId::generate(),
                number: certificate_number(level),
                user_id: assessment.user_id.clone(),
                level,
                assessment_id: assessment.id.clone(),
                issued_at: chrono::Utc::now(),
                status: CertificateStatus::Active,
            };

            match self.storage.create_certificate(certificate).await {
                Ok(issued) => {
                    info!(
                        assessment_id = %assessment.id,
                        level = %issued.level,
                        number = %issued.number,
                        "certificate issued"
                    );
                    return Ok(Some(issued));
                }
                Err(StorageError::Conflict(reason)) => {
                    // Either a concurrent issuer won for this assessment, or
                    // the number collided. The former ends the loop below;
                    // the latter gets a fresh number next iteration.
                    if let Some(existing) =
                        self.storage.find_by_assessment(&assessment.id).await?
                    {
                        debug!(assessment_id = %assessment.id, "lost issuance race, reusing winner");
                        return Ok(Some(existing));
                    }
                    last_conflict = Some(reason);
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(CertificateError::NumberExhausted(
            last_conflict.unwrap_or_default(),
        ))
    }
}

/// Human-legible, collision-resistant certificate number:
/// level, millisecond timestamp, random hex suffix.
fn certificate_number(level: Level) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "{}-{}-{:06X}",
        level,
        chrono::Utc::now().timestamp_millis(),
        suffix
    )
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("assessment {0} is not in a terminal state, nothing to certify")]
    NotCompleted(acumen_types::AssessmentId),

    #[error("could not allocate a unique certificate number: {0}")]
    NumberExhausted(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use acumen_storage::InMemoryStorage;
    use acumen_types::{AssessmentStatus, QuestionId, Step, UserId};
    use chrono::Utc;

    fn completed_assessment(step: Step, percentage: f64) -> Assessment {
        let mut assessment = Assessment::new(
            UserId::new("u-1"),
            step,
            (0..20).map(|_| QuestionId::generate()).collect(),
            Utc::now(),
        );
        assessment.status = AssessmentStatus::Completed;
        assessment.percentage = Some(percentage);
        assessment.score = Some((percentage / 5.0) as u32);
        assessment
    }

    #[tokio::test]
    async fn issues_for_certificate_bearing_band() {
        let storage = Arc::new(InMemoryStorage::new());
        let issuer = CertificateIssuer::new(storage.clone());
        let assessment = completed_assessment(Step::Two, 60.0);

        let certificate = issuer.issue_if_earned(&assessment).await.unwrap().unwrap();
        assert_eq!(certificate.level, Level::B2);
        assert_eq!(certificate.assessment_id, assessment.id);
        assert!(certificate.number.starts_with("B2-"));

        let stored = storage.find_by_assessment(&assessment.id).await.unwrap();
        assert_eq!(stored.unwrap().id, certificate.id);
    }

    #[tokio::test]
    async fn no_certificate_for_floor_fallback() {
        let storage = Arc::new(InMemoryStorage::new());
        let issuer = CertificateIssuer::new(storage.clone());
        let assessment = completed_assessment(Step::Two, 10.0);

        assert!(issuer.issue_if_earned(&assessment).await.unwrap().is_none());
        assert!(storage
            .find_by_assessment(&assessment.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn repeated_issuance_returns_the_same_certificate() {
        let storage = Arc::new(InMemoryStorage::new());
        let issuer = CertificateIssuer::new(storage.clone());
        let assessment = completed_assessment(Step::One, 80.0);

        let first = issuer.issue_if_earned(&assessment).await.unwrap().unwrap();
        let second = issuer.issue_if_earned(&assessment).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.number, second.number);
    }

    #[tokio::test]
    async fn concurrent_issuance_mints_exactly_one() {
        let storage = Arc::new(InMemoryStorage::new());
        let assessment = completed_assessment(Step::One, 80.0);

        let a = {
            let issuer = CertificateIssuer::new(storage.clone());
            let assessment = assessment.clone();
            tokio::spawn(async move { issuer.issue_if_earned(&assessment).await })
        };
        let b = {
            let issuer = CertificateIssuer::new(storage.clone());
            let assessment = assessment.clone();
            tokio::spawn(async move { issuer.issue_if_earned(&assessment).await })
        };

        let first = a.await.unwrap().unwrap().unwrap();
        let second = b.await.unwrap().unwrap().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn rejects_non_terminal_assessment() {
        let storage = Arc::new(InMemoryStorage::new());
        let issuer = CertificateIssuer::new(storage);
        let mut assessment = completed_assessment(Step::One, 80.0);
        assessment.status = AssessmentStatus::InProgress;

        assert!(matches!(
            issuer.issue_if_earned(&assessment).await,
            Err(CertificateError::NotCompleted(_))
        ));
    }
}
