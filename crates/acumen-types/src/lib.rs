//! Acumen Types - shared domain model for the assessment engine
//!
//! Everything the progression engine touches is defined here: competency
//! levels and steps, questions, assessments, user progression, certificates.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of six ordered proficiency bands. Ordering is part of the contract:
/// `A1 < A2 < B1 < B2 < C1 < C2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::A1 => "A1",
            Level::A2 => "A2",
            Level::B1 => "B1",
            Level::B2 => "B2",
            Level::C1 => "C1",
            Level::C2 => "C2",
        }
    }

    /// The assessment step that owns this level.
    pub fn step(&self) -> Step {
        match self {
            Level::A1 | Level::A2 => Step::One,
            Level::B1 | Level::B2 => Step::Two,
            Level::C1 | Level::C2 => Step::Three,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of three sequential assessment phases, each spanning two adjacent
/// competency levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    One,
    Two,
    Three,
}

impl Step {
    pub fn number(&self) -> u8 {
        match self {
            Step::One => 1,
            Step::Two => 2,
            Step::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Step> {
        match n {
            1 => Some(Step::One),
            2 => Some(Step::Two),
            3 => Some(Step::Three),
            _ => None,
        }
    }

    /// The (low, high) pair of levels this step examines.
    pub fn levels(&self) -> (Level, Level) {
        match self {
            Step::One => (Level::A1, Level::A2),
            Step::Two => (Level::B1, Level::B2),
            Step::Three => (Level::C1, Level::C2),
        }
    }

    /// The level a candidate falls back to on failure. Step 1 has no floor.
    pub fn floor(&self) -> Option<Level> {
        match self {
            Step::One => None,
            Step::Two => Some(Level::A2),
            Step::Three => Some(Level::B2),
        }
    }

    /// Target question count for a full assessment at this step.
    pub fn question_target(&self) -> usize {
        match self {
            Step::One => 20,
            Step::Two => 25,
            Step::Three => 30,
        }
    }

    pub fn next(&self) -> Option<Step> {
        match self {
            Step::One => Some(Step::Two),
            Step::Two => Some(Step::Three),
            Step::Three => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {}", self.number())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);
impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionId(pub String);
impl QuestionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssessmentId(pub String);
impl AssessmentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for AssessmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(pub String);
impl CertificateId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The correct answer as authored. Content tooling historically stored either
/// an option index or the literal option text; both forms are represented and
/// normalized to an index before any comparison.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectAnswer {
    Index(usize),
    Text(String),
}

/// A single pool question. Immutable once created as far as the engine is
/// concerned; content edits happen upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub competency: String,
    pub level: Level,
    pub step: Step,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct: CorrectAnswer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    /// Build a validated question. Options must number 2..=6 and an indexed
    /// correct answer must point inside them.
    pub fn new(
        competency: impl Into<String>,
        level: Level,
        prompt: impl Into<String>,
        options: Vec<String>,
        correct: CorrectAnswer,
    ) -> Result<Self, DomainError> {
        if options.len() < 2 || options.len() > 6 {
            return Err(DomainError::InvalidOptionCount(options.len()));
        }
        if let CorrectAnswer::Index(index) = correct {
            if index >= options.len() {
                return Err(DomainError::CorrectIndexOutOfRange {
                    index,
                    options: options.len(),
                });
            }
        }
        Ok(Self {
            id: QuestionId::generate(),
            competency: competency.into(),
            step: level.step(),
            level,
            prompt: prompt.into(),
            options,
            correct,
            explanation: None,
        })
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Normalize the authored correct answer to an option index. Returns
    /// `None` when a textual answer matches no option, which grading treats
    /// as unanswerable-correctly rather than a panic.
    pub fn correct_index(&self) -> Option<usize> {
        match &self.correct {
            CorrectAnswer::Index(index) if *index < self.options.len() => Some(*index),
            CorrectAnswer::Index(_) => None,
            CorrectAnswer::Text(text) => self.options.iter().position(|option| option == text),
        }
    }
}

/// Assessment lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentStatus {
    Pending,
    InProgress,
    Completed,
    Expired,
}

impl AssessmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssessmentStatus::Completed | AssessmentStatus::Expired)
    }
}

/// One graded answer within a completed assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub selected_index: usize,
    pub correct: bool,
}

/// A single assessment instance and everything recorded about it.
///
/// `version` is bumped by the store on every write; optimistic updates carry
/// the version they read so concurrent submissions serialize cleanly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub user_id: UserId,
    pub step: Step,
    pub levels: Vec<Level>,
    pub question_ids: Vec<QuestionId>,
    pub time_budget_minutes: u64,
    pub status: AssessmentStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achieved_level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_proceed: Option<bool>,
    pub answers: Vec<AnswerRecord>,
}

impl Assessment {
    /// A freshly created, not-yet-started assessment. One minute per
    /// selected question.
    pub fn new(
        user_id: UserId,
        step: Step,
        question_ids: Vec<QuestionId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (low, high) = step.levels();
        Self {
            id: AssessmentId::generate(),
            user_id,
            step,
            levels: vec![low, high],
            time_budget_minutes: question_ids.len() as u64,
            question_ids,
            status: AssessmentStatus::Pending,
            version: 0,
            created_at,
            started_at: None,
            completed_at: None,
            score: None,
            percentage: None,
            achieved_level: None,
            can_proceed: None,
            answers: vec![],
        }
    }

    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }
}

/// One line of a user's assessment history. Appended only for completions
/// that produced a non-null achieved level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: Step,
    pub percentage: f64,
    pub level: Level,
    pub date: DateTime<Utc>,
}

/// The authoritative, continuously-updated summary of a user's standing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProgression {
    pub user_id: UserId,
    pub current_level: Option<Level>,
    pub completed_steps: Vec<Step>,
    /// Flips to false, permanently, the first time a step-1 attempt lands
    /// below the hard-fail threshold.
    pub can_retake: bool,
    pub history: Vec<HistoryEntry>,
}

impl UserProgression {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            current_level: None,
            completed_steps: vec![],
            can_retake: true,
            history: vec![],
        }
    }

    pub fn has_completed(&self, step: Step) -> bool {
        self.completed_steps.contains(&step)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateStatus {
    Active,
    Revoked,
}

/// An issued certificate. Immutable after issuance except for revocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub number: String,
    pub user_id: UserId,
    pub level: Level,
    pub assessment_id: AssessmentId,
    pub issued_at: DateTime<Utc>,
    pub status: CertificateStatus,
}

/// What a caller gets back from a submission: the graded result plus any
/// certificate minted for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    pub assessment_id: AssessmentId,
    pub score: u32,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achieved_level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_level: Option<Level>,
    pub can_proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

/// Domain-model construction errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("question must carry between 2 and 6 options, got {0}")]
    InvalidOptionCount(usize),

    #[error("correct answer index {index} is out of range for {options} options")]
    CorrectIndexOutOfRange { index: usize, options: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::A1 < Level::A2);
        assert!(Level::A2 < Level::B1);
        assert!(Level::B2 < Level::C1);
        assert!(Level::C1 < Level::C2);
    }

    #[test]
    fn steps_own_adjacent_levels() {
        assert_eq!(Step::One.levels(), (Level::A1, Level::A2));
        assert_eq!(Step::Two.levels(), (Level::B1, Level::B2));
        assert_eq!(Step::Three.levels(), (Level::C1, Level::C2));
        assert_eq!(Step::Two.floor(), Some(Level::A2));
        assert_eq!(Step::Three.next(), None);
    }

    #[test]
    fn question_rejects_bad_option_counts() {
        let result = Question::new(
            "navigation",
            Level::A1,
            "Pick one",
            vec!["only".to_string()],
            CorrectAnswer::Index(0),
        );
        assert!(matches!(result, Err(DomainError::InvalidOptionCount(1))));
    }

    #[test]
    fn question_rejects_out_of_range_correct_index() {
        let result = Question::new(
            "navigation",
            Level::A1,
            "Pick one",
            vec!["a".to_string(), "b".to_string()],
            CorrectAnswer::Index(5),
        );
        assert!(matches!(
            result,
            Err(DomainError::CorrectIndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn textual_correct_answer_normalizes_to_index() {
        let question = Question::new(
            "mail",
            Level::B1,
            "Which field hides recipients?",
            vec!["To".to_string(), "Cc".to_string(), "Bcc".to_string()],
            CorrectAnswer::Text("Bcc".to_string()),
        )
        .unwrap();
        assert_eq!(question.correct_index(), Some(2));

        let unmatched = Question::new(
            "mail",
            Level::B1,
            "Which field hides recipients?",
            vec!["To".to_string(), "Cc".to_string()],
            CorrectAnswer::Text("Bcc".to_string()),
        )
        .unwrap();
        assert_eq!(unmatched.correct_index(), None);
    }

    #[test]
    fn correct_answer_survives_serde_in_both_forms() {
        let indexed: CorrectAnswer =
            serde_json::from_str(&serde_json::to_string(&CorrectAnswer::Index(2)).unwrap())
                .unwrap();
        assert_eq!(indexed, CorrectAnswer::Index(2));

        let textual: CorrectAnswer = serde_json::from_str(
            &serde_json::to_string(&CorrectAnswer::Text("Bcc".to_string())).unwrap(),
        )
        .unwrap();
        assert_eq!(textual, CorrectAnswer::Text("Bcc".to_string()));
    }

    #[test]
    fn new_assessment_budgets_one_minute_per_question() {
        let questions: Vec<_> = (0..20).map(|_| QuestionId::generate()).collect();
        let assessment =
            Assessment::new(UserId::new("u-1"), Step::One, questions, Utc::now());
        assert_eq!(assessment.time_budget_minutes, 20);
        assert_eq!(assessment.status, AssessmentStatus::Pending);
        assert_eq!(assessment.levels, vec![Level::A1, Level::A2]);
    }
}
