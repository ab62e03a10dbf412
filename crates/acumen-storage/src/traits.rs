use crate::StorageResult;
use acumen_types::{
    Assessment, AssessmentId, AssessmentStatus, Certificate, CertificateId, Level, Question,
    QuestionId, Step, UserId, UserProgression,
};
use async_trait::async_trait;

/// Read-only access to the question pool. Content management owns writes.
#[async_trait]
pub trait QuestionPool: Send + Sync {
    /// All questions for a step whose level is in `levels`.
    async fn find_questions(&self, step: Step, levels: &[Level]) -> StorageResult<Vec<Question>>;

    /// Fetch questions by id. Unknown ids are silently absent from the
    /// result; the caller decides whether that matters.
    async fn get_questions(&self, ids: &[QuestionId]) -> StorageResult<Vec<Question>>;
}

/// Storage for assessment lifecycle records.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Insert a freshly created assessment. Conflict if the id exists.
    async fn create_assessment(&self, assessment: Assessment) -> StorageResult<()>;

    async fn get_assessment(&self, id: &AssessmentId) -> StorageResult<Option<Assessment>>;

    /// Optimistic write: succeeds only when the stored version still equals
    /// `expected_version`, and bumps the version on success. The version a
    /// concurrent writer already bumped surfaces as a Conflict.
    async fn update_assessment(
        &self,
        assessment: Assessment,
        expected_version: u64,
    ) -> StorageResult<Assessment>;

    /// Most recently created assessment for a user at a step, optionally
    /// narrowed to one status.
    async fn find_latest_by_user_and_step(
        &self,
        user_id: &UserId,
        step: Step,
        status: Option<AssessmentStatus>,
    ) -> StorageResult<Option<Assessment>>;
}

/// Storage for per-user progression summaries.
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    async fn get_progression(&self, user_id: &UserId) -> StorageResult<Option<UserProgression>>;

    async fn upsert_progression(&self, progression: UserProgression) -> StorageResult<()>;
}

/// Storage for issued certificates.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Insert a certificate. Conflict when one already exists for the same
    /// assessment, or when the certificate number collides — both are
    /// uniqueness guarantees the issuer leans on.
    async fn create_certificate(&self, certificate: Certificate) -> StorageResult<Certificate>;

    async fn find_by_assessment(
        &self,
        assessment_id: &AssessmentId,
    ) -> StorageResult<Option<Certificate>>;

    /// Administrative revocation. NotFound for unknown ids.
    async fn revoke_certificate(&self, certificate_id: &CertificateId) -> StorageResult<()>;
}

/// Unified storage bundle the engine and service operate over.
pub trait EngineStorage:
    QuestionPool + AssessmentStore + ProgressionStore + CertificateStore + Send + Sync
{
}

impl<T> EngineStorage for T where
    T: QuestionPool + AssessmentStore + ProgressionStore + CertificateStore + Send + Sync
{
}
