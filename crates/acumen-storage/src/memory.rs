//! In-memory reference implementation of the engine storage traits.

use crate::traits::{AssessmentStore, CertificateStore, ProgressionStore, QuestionPool};
use crate::{StorageError, StorageResult};
use acumen_types::{
    Assessment, AssessmentId, AssessmentStatus, Certificate, CertificateId, CertificateStatus,
    Level, Question, QuestionId, Step, UserId, UserProgression,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// In-memory storage adapter. Deterministic and test-friendly; uniqueness
/// and version checks mirror what a transactional backend enforces with
/// unique indexes and row versions.
#[derive(Default)]
pub struct InMemoryStorage {
    questions: RwLock<HashMap<QuestionId, Question>>,
    assessments: RwLock<HashMap<AssessmentId, Assessment>>,
    progressions: RwLock<HashMap<UserId, UserProgression>>,
    certificates: RwLock<HashMap<CertificateId, Certificate>>,
    certificate_by_assessment: RwLock<HashMap<AssessmentId, CertificateId>>,
    certificate_numbers: RwLock<HashSet<String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load pool content. Seeding happens outside the engine's read-only
    /// view of the pool, so it lives on the concrete type.
    pub fn seed_questions(
        &self,
        questions: impl IntoIterator<Item = Question>,
    ) -> StorageResult<()> {
        let mut guard = self
            .questions
            .write()
            .map_err(|_| StorageError::Backend("questions lock poisoned".to_string()))?;
        for question in questions {
            guard.insert(question.id.clone(), question);
        }
        Ok(())
    }
}

#[async_trait]
impl QuestionPool for InMemoryStorage {
    async fn find_questions(&self, step: Step, levels: &[Level]) -> StorageResult<Vec<Question>> {
        let guard = self
            .questions
            .read()
            .map_err(|_| StorageError::Backend("questions lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .filter(|q| q.step == step && levels.contains(&q.level))
            .cloned()
            .collect())
    }

    async fn get_questions(&self, ids: &[QuestionId]) -> StorageResult<Vec<Question>> {
        let guard = self
            .questions
            .read()
            .map_err(|_| StorageError::Backend("questions lock poisoned".to_string()))?;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }
}

#[async_trait]
impl AssessmentStore for InMemoryStorage {
    async fn create_assessment(&self, assessment: Assessment) -> StorageResult<()> {
        let mut guard = self
            .assessments
            .write()
            .map_err(|_| StorageError::Backend("assessments lock poisoned".to_string()))?;
        if guard.contains_key(&assessment.id) {
            return Err(StorageError::Conflict(format!(
                "assessment {} already exists",
                assessment.id
            )));
        }
        guard.insert(assessment.id.clone(), assessment);
        Ok(())
    }

    async fn get_assessment(&self, id: &AssessmentId) -> StorageResult<Option<Assessment>> {
        let guard = self
            .assessments
            .read()
            .map_err(|_| StorageError::Backend("assessments lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn update_assessment(
        &self,
        mut assessment: Assessment,
        expected_version: u64,
    ) -> StorageResult<Assessment> {
        let mut guard = self
            .assessments
            .write()
            .map_err(|_| StorageError::Backend("assessments lock poisoned".to_string()))?;
        let current = guard
            .get(&assessment.id)
            .ok_or_else(|| StorageError::NotFound(format!("assessment {}", assessment.id)))?;
        if current.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "assessment {} version {} does not match expected {}",
                assessment.id, current.version, expected_version
            )));
        }
        assessment.version = expected_version + 1;
        guard.insert(assessment.id.clone(), assessment.clone());
        Ok(assessment)
    }

    async fn find_latest_by_user_and_step(
        &self,
        user_id: &UserId,
        step: Step,
        status: Option<AssessmentStatus>,
    ) -> StorageResult<Option<Assessment>> {
        let guard = self
            .assessments
            .read()
            .map_err(|_| StorageError::Backend("assessments lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .filter(|a| {
                a.user_id == *user_id
                    && a.step == step
                    && status.map_or(true, |wanted| a.status == wanted)
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }
}

#[async_trait]
impl ProgressionStore for InMemoryStorage {
    async fn get_progression(&self, user_id: &UserId) -> StorageResult<Option<UserProgression>> {
        let guard = self
            .progressions
            .read()
            .map_err(|_| StorageError::Backend("progressions lock poisoned".to_string()))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn upsert_progression(&self, progression: UserProgression) -> StorageResult<()> {
        let mut guard = self
            .progressions
            .write()
            .map_err(|_| StorageError::Backend("progressions lock poisoned".to_string()))?;
        guard.insert(progression.user_id.clone(), progression);
        Ok(())
    }
}

#[async_trait]
impl CertificateStore for InMemoryStorage {
    async fn create_certificate(&self, certificate: Certificate) -> StorageResult<Certificate> {
        // Single lock order: by-assessment index, numbers, then records.
        let mut by_assessment = self
            .certificate_by_assessment
            .write()
            .map_err(|_| StorageError::Backend("certificate index lock poisoned".to_string()))?;
        if by_assessment.contains_key(&certificate.assessment_id) {
            return Err(StorageError::Conflict(format!(
                "certificate already issued for assessment {}",
                certificate.assessment_id
            )));
        }

        let mut numbers = self
            .certificate_numbers
            .write()
            .map_err(|_| StorageError::Backend("certificate numbers lock poisoned".to_string()))?;
        if !numbers.insert(certificate.number.clone()) {
            return Err(StorageError::Conflict(format!(
                "certificate number {} already in use",
                certificate.number
            )));
        }

        let mut certificates = self
            .certificates
            .write()
            .map_err(|_| StorageError::Backend("certificates lock poisoned".to_string()))?;
        by_assessment.insert(certificate.assessment_id.clone(), certificate.id.clone());
        certificates.insert(certificate.id.clone(), certificate.clone());
        Ok(certificate)
    }

    async fn find_by_assessment(
        &self,
        assessment_id: &AssessmentId,
    ) -> StorageResult<Option<Certificate>> {
        let by_assessment = self
            .certificate_by_assessment
            .read()
            .map_err(|_| StorageError::Backend("certificate index lock poisoned".to_string()))?;
        let Some(certificate_id) = by_assessment.get(assessment_id) else {
            return Ok(None);
        };
        let certificates = self
            .certificates
            .read()
            .map_err(|_| StorageError::Backend("certificates lock poisoned".to_string()))?;
        Ok(certificates.get(certificate_id).cloned())
    }

    async fn revoke_certificate(&self, certificate_id: &CertificateId) -> StorageResult<()> {
        let mut certificates = self
            .certificates
            .write()
            .map_err(|_| StorageError::Backend("certificates lock poisoned".to_string()))?;
        let certificate = certificates
            .get_mut(certificate_id)
            .ok_or_else(|| StorageError::NotFound(format!("certificate {}", certificate_id)))?;
        certificate.status = CertificateStatus::Revoked;
        Ok(())
    }
}
