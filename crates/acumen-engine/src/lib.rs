//! Acumen Engine - the assessment lifecycle state machine
//!
//! Owns one assessment instance from question selection through timed
//! execution to grading: `pending -> in_progress -> completed`, with
//! `in_progress -> expired` when the time budget ran out before submission.
//! Transition legality is checked against the stored status and writes go
//! through the store's optimistic version check, so a concurrent submitter
//! loses cleanly with an "already completed" rejection instead of a double
//! grade.
//!
//! The engine runs no background clock; remaining time is advisory and the
//! surrounding tier decides when to trigger expiry.

#![deny(unsafe_code)]

mod shuffle;
mod time;

pub use shuffle::{EntropyShuffle, IdentityShuffle, SeededShuffle, ShuffleSource};
pub use time::{Clock, ManualClock, SystemClock};

use acumen_scoring::{determine_outcome, percentage, ScoreOutcome};
use acumen_storage::{AssessmentStore, QuestionPool, StorageError};
use acumen_types::{
    AnswerRecord, Assessment, AssessmentId, AssessmentStatus, Question, QuestionId, Step, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One answer as submitted by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    pub selected_index: usize,
}

/// The graded result of a submit or expire transition.
#[derive(Clone, Debug)]
pub struct GradedSubmission {
    pub assessment: Assessment,
    pub outcome: ScoreOutcome,
}

pub struct AssessmentEngine<S> {
    storage: Arc<S>,
    shuffle: Arc<dyn ShuffleSource>,
    clock: Arc<dyn Clock>,
}

impl<S: QuestionPool + AssessmentStore> AssessmentEngine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_parts(storage, Arc::new(EntropyShuffle), Arc::new(SystemClock))
    }

    pub fn with_parts(
        storage: Arc<S>,
        shuffle: Arc<dyn ShuffleSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            shuffle,
            clock,
        }
    }

    /// Create a `pending` assessment for an already-authorized (user, step).
    ///
    /// Draws the step's target count evenly across its two levels, takes
    /// whatever is available when a level falls short, and randomizes the
    /// final order per instance.
    pub async fn create(&self, user_id: UserId, step: Step) -> Result<Assessment, EngineError> {
        let (low, high) = step.levels();
        let target = step.question_target();
        let high_target = target / 2;
        let low_target = target - high_target;

        let mut selected: Vec<Question> = Vec::with_capacity(target);
        for (level, level_target) in [(low, low_target), (high, high_target)] {
            let mut available = self.storage.find_questions(step, &[level]).await?;
            if available.len() < level_target {
                warn!(
                    level = %level,
                    available = available.len(),
                    wanted = level_target,
                    "question pool shortfall, taking all available"
                );
            }
            self.shuffle.shuffle_questions(&mut available);
            available.truncate(level_target);
            selected.extend(available);
        }

        if selected.is_empty() {
            return Err(EngineError::EmptyQuestionPool { step });
        }

        self.shuffle.shuffle_questions(&mut selected);
        let question_ids = selected.into_iter().map(|q| q.id).collect();
        let assessment = Assessment::new(user_id, step, question_ids, self.clock.now());
        self.storage.create_assessment(assessment.clone()).await?;

        info!(
            assessment_id = %assessment.id,
            user_id = %assessment.user_id,
            step = %assessment.step,
            questions = assessment.question_count(),
            budget_minutes = assessment.time_budget_minutes,
            "assessment created"
        );
        Ok(assessment)
    }

    /// `pending -> in_progress`. Not idempotent: a second start is a caller
    /// bug and fails explicitly.
    pub async fn start(&self, id: &AssessmentId) -> Result<Assessment, EngineError> {
        let mut assessment = self.load(id).await?;
        if assessment.status != AssessmentStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: assessment.status,
                operation: "start",
            });
        }

        let version = assessment.version;
        assessment.status = AssessmentStatus::InProgress;
        assessment.started_at = Some(self.clock.now());
        let assessment = self.storage.update_assessment(assessment, version).await?;

        info!(
            assessment_id = %assessment.id,
            remaining_seconds = assessment.time_budget_minutes * 60,
            "assessment started"
        );
        Ok(assessment)
    }

    /// Grade and complete. Accepts `pending` defensively but rejects any
    /// terminal state with `AlreadyCompleted` instead of rescoring.
    pub async fn submit(
        &self,
        id: &AssessmentId,
        answers: &[SubmittedAnswer],
    ) -> Result<GradedSubmission, EngineError> {
        let assessment = self.load(id).await?;
        if assessment.status.is_terminal() {
            return Err(EngineError::AlreadyCompleted(assessment.id));
        }
        self.finalize(assessment, answers, AssessmentStatus::Completed)
            .await
    }

    /// Force-score an `in_progress` assessment whose time budget is spent,
    /// landing it in the `expired` terminal state. Grading, progression, and
    /// certificate semantics match a regular submission; only the recorded
    /// status differs.
    pub async fn expire(
        &self,
        id: &AssessmentId,
        answers: &[SubmittedAnswer],
    ) -> Result<GradedSubmission, EngineError> {
        let assessment = self.load(id).await?;
        if assessment.status.is_terminal() {
            return Err(EngineError::AlreadyCompleted(assessment.id));
        }
        if assessment.status != AssessmentStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                from: assessment.status,
                operation: "expire",
            });
        }
        let remaining = self.remaining_of(&assessment);
        if remaining > 0 {
            return Err(EngineError::TimeRemaining { seconds: remaining });
        }
        self.finalize(assessment, answers, AssessmentStatus::Expired)
            .await
    }

    /// Advisory remaining time in seconds. Zero once terminal.
    pub async fn remaining_seconds(&self, id: &AssessmentId) -> Result<i64, EngineError> {
        let assessment = self.load(id).await?;
        Ok(self.remaining_of(&assessment))
    }

    fn remaining_of(&self, assessment: &Assessment) -> i64 {
        let budget = assessment.time_budget_minutes as i64 * 60;
        match assessment.status {
            AssessmentStatus::Pending => budget,
            AssessmentStatus::InProgress => {
                let Some(started_at) = assessment.started_at else {
                    return budget;
                };
                let elapsed = (self.clock.now() - started_at).num_seconds();
                (budget - elapsed).max(0)
            }
            AssessmentStatus::Completed | AssessmentStatus::Expired => 0,
        }
    }

    async fn finalize(
        &self,
        mut assessment: Assessment,
        answers: &[SubmittedAnswer],
        terminal: AssessmentStatus,
    ) -> Result<GradedSubmission, EngineError> {
        let questions = self.storage.get_questions(&assessment.question_ids).await?;
        let records = grade(&assessment, &questions, answers);

        let score = records.iter().filter(|r| r.correct).count() as u32;
        // Percentage is against the full question set: unanswered counts as wrong.
        let pct = percentage(score, assessment.question_count());
        let outcome = determine_outcome(assessment.step, pct);

        let version = assessment.version;
        assessment.status = terminal;
        assessment.completed_at = Some(self.clock.now());
        assessment.score = Some(score);
        assessment.percentage = Some(pct);
        assessment.achieved_level = outcome.achieved_level;
        assessment.can_proceed = Some(outcome.can_proceed);
        assessment.answers = records;

        let id = assessment.id.clone();
        let assessment = match self.storage.update_assessment(assessment, version).await {
            Ok(written) => written,
            // A concurrent submitter bumped the version first; this caller
            // is the benign loser.
            Err(StorageError::Conflict(_)) => return Err(EngineError::AlreadyCompleted(id)),
            Err(other) => return Err(other.into()),
        };

        info!(
            assessment_id = %assessment.id,
            status = ?assessment.status,
            score,
            percentage = pct,
            achieved = ?outcome.achieved_level,
            can_proceed = outcome.can_proceed,
            "assessment graded"
        );
        Ok(GradedSubmission {
            assessment,
            outcome,
        })
    }

    async fn load(&self, id: &AssessmentId) -> Result<Assessment, EngineError> {
        self.storage
            .get_assessment(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }
}

/// Match submitted answers against the assessment's question set. Unmatched
/// or duplicate question ids are logged and skipped, never scored.
fn grade(
    assessment: &Assessment,
    questions: &[Question],
    answers: &[SubmittedAnswer],
) -> Vec<AnswerRecord> {
    let by_id: HashMap<&QuestionId, &Question> =
        questions.iter().map(|q| (&q.id, q)).collect();
    let in_set: HashSet<&QuestionId> = assessment.question_ids.iter().collect();

    let mut seen: HashSet<&QuestionId> = HashSet::new();
    let mut records = Vec::with_capacity(answers.len());
    for answer in answers {
        if !in_set.contains(&answer.question_id) {
            warn!(
                assessment_id = %assessment.id,
                question_id = %answer.question_id,
                "submitted answer for question outside this assessment, ignoring"
            );
            continue;
        }
        if !seen.insert(&answer.question_id) {
            debug!(
                assessment_id = %assessment.id,
                question_id = %answer.question_id,
                "duplicate answer for question, keeping the first"
            );
            continue;
        }
        let Some(question) = by_id.get(&answer.question_id) else {
            warn!(
                assessment_id = %assessment.id,
                question_id = %answer.question_id,
                "question no longer present in pool, scoring as wrong"
            );
            records.push(AnswerRecord {
                question_id: answer.question_id.clone(),
                selected_index: answer.selected_index,
                correct: false,
            });
            continue;
        };
        records.push(AnswerRecord {
            question_id: answer.question_id.clone(),
            selected_index: answer.selected_index,
            correct: question.correct_index() == Some(answer.selected_index),
        });
    }
    records
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("assessment {0} not found")]
    NotFound(AssessmentId),

    /// Submission idempotency: the assessment is already terminal. For a
    /// racing caller this is the benign "someone else already did this".
    #[error("assessment {0} is already completed")]
    AlreadyCompleted(AssessmentId),

    #[error("cannot {operation} an assessment in state {from:?}")]
    InvalidTransition {
        from: AssessmentStatus,
        operation: &'static str,
    },

    #[error("assessment still has {seconds}s remaining, expiry refused")]
    TimeRemaining { seconds: i64 },

    #[error("no questions available for {step}")]
    EmptyQuestionPool { step: Step },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use acumen_storage::InMemoryStorage;
    use acumen_types::{CorrectAnswer, Level};
    use chrono::{Duration, Utc};

    fn seed_pool(storage: &InMemoryStorage, level: Level, count: usize) {
        let questions = (0..count).map(|i| {
            Question::new(
                "basics",
                level,
                format!("{} question {}", level, i),
                vec!["right".to_string(), "wrong".to_string()],
                CorrectAnswer::Index(0),
            )
            .unwrap()
        });
        storage.seed_questions(questions).unwrap();
    }

    fn engine_with_clock(
        storage: Arc<InMemoryStorage>,
        clock: Arc<ManualClock>,
    ) -> AssessmentEngine<InMemoryStorage> {
        AssessmentEngine::with_parts(storage, Arc::new(SeededShuffle::new(7)), clock)
    }

    fn setup() -> (
        Arc<InMemoryStorage>,
        Arc<ManualClock>,
        AssessmentEngine<InMemoryStorage>,
    ) {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine_with_clock(storage.clone(), clock.clone());
        (storage, clock, engine)
    }

    fn answers_for(assessment: &Assessment, correct: usize) -> Vec<SubmittedAnswer> {
        assessment
            .question_ids
            .iter()
            .enumerate()
            .map(|(i, id)| SubmittedAnswer {
                question_id: id.clone(),
                selected_index: if i < correct { 0 } else { 1 },
            })
            .collect()
    }

    #[tokio::test]
    async fn create_draws_evenly_from_both_levels() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);

        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        assert_eq!(assessment.question_count(), 20);
        assert_eq!(assessment.time_budget_minutes, 20);
        assert_eq!(assessment.status, AssessmentStatus::Pending);

        // Selection is a property, not a sequence: everything drawn must
        // come from the step's two levels, ten from each.
        let questions = storage.get_questions(&assessment.question_ids).await.unwrap();
        assert_eq!(questions.len(), 20);
        let low = questions.iter().filter(|q| q.level == Level::A1).count();
        let high = questions.iter().filter(|q| q.level == Level::A2).count();
        assert_eq!((low, high), (10, 10));
    }

    #[tokio::test]
    async fn create_takes_what_is_available_on_shortfall() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 4);
        seed_pool(&storage, Level::A2, 12);

        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        assert_eq!(assessment.question_count(), 14);
        assert_eq!(assessment.time_budget_minutes, 14);
    }

    #[tokio::test]
    async fn create_fails_on_empty_pool() {
        let (_, _, engine) = setup();
        let result = engine.create(UserId::new("u-1"), Step::Three).await;
        assert!(matches!(
            result,
            Err(EngineError::EmptyQuestionPool { step: Step::Three })
        ));
    }

    #[tokio::test]
    async fn start_is_not_idempotent() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();

        let started = engine.start(&assessment.id).await.unwrap();
        assert_eq!(started.status, AssessmentStatus::InProgress);
        assert!(started.started_at.is_some());

        let second = engine.start(&assessment.id).await;
        assert!(matches!(
            second,
            Err(EngineError::InvalidTransition {
                from: AssessmentStatus::InProgress,
                operation: "start",
            })
        ));
    }

    #[tokio::test]
    async fn submit_grades_against_full_question_count() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        engine.start(&assessment.id).await.unwrap();

        // Answer only half the questions, all correctly: 10/20 = 50%.
        let half: Vec<_> = answers_for(&assessment, 20).into_iter().take(10).collect();
        let graded = engine.submit(&assessment.id, &half).await.unwrap();
        assert_eq!(graded.assessment.score, Some(10));
        assert_eq!(graded.assessment.percentage, Some(50.0));
        assert_eq!(graded.outcome.achieved_level, Some(Level::A2));
        assert!(!graded.outcome.can_proceed);
        assert_eq!(graded.assessment.status, AssessmentStatus::Completed);
    }

    #[tokio::test]
    async fn second_submit_is_rejected_without_rescoring() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        engine.start(&assessment.id).await.unwrap();

        let first = engine
            .submit(&assessment.id, &answers_for(&assessment, 20))
            .await
            .unwrap();
        assert_eq!(first.assessment.percentage, Some(100.0));

        let second = engine.submit(&assessment.id, &[]).await;
        assert!(matches!(second, Err(EngineError::AlreadyCompleted(_))));

        let stored = storage.get_assessment(&assessment.id).await.unwrap().unwrap();
        assert_eq!(stored.percentage, Some(100.0));
        assert_eq!(stored.score, Some(20));
    }

    #[tokio::test]
    async fn unmatched_question_ids_are_ignored() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        engine.start(&assessment.id).await.unwrap();

        let mut answers = answers_for(&assessment, 20);
        answers.push(SubmittedAnswer {
            question_id: QuestionId::generate(),
            selected_index: 0,
        });
        let graded = engine.submit(&assessment.id, &answers).await.unwrap();
        assert_eq!(graded.assessment.score, Some(20));
        assert_eq!(graded.assessment.answers.len(), 20);
    }

    #[tokio::test]
    async fn submit_from_pending_is_tolerated() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();

        let graded = engine.submit(&assessment.id, &[]).await.unwrap();
        assert_eq!(graded.assessment.score, Some(0));
        assert_eq!(graded.outcome.achieved_level, None);
    }

    #[tokio::test]
    async fn expiry_is_refused_while_time_remains() {
        let (storage, _, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        engine.start(&assessment.id).await.unwrap();

        let result = engine.expire(&assessment.id, &[]).await;
        assert!(matches!(result, Err(EngineError::TimeRemaining { .. })));
    }

    #[tokio::test]
    async fn expiry_after_budget_scores_and_lands_expired() {
        let (storage, clock, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        engine.start(&assessment.id).await.unwrap();

        clock.advance(Duration::minutes(21));
        assert_eq!(engine.remaining_seconds(&assessment.id).await.unwrap(), 0);

        let answers: Vec<_> = answers_for(&assessment, 20).into_iter().take(6).collect();
        let graded = engine.expire(&assessment.id, &answers).await.unwrap();
        assert_eq!(graded.assessment.status, AssessmentStatus::Expired);
        assert_eq!(graded.assessment.score, Some(6));
        assert_eq!(graded.assessment.percentage, Some(30.0));
        assert_eq!(graded.outcome.achieved_level, Some(Level::A1));

        // Terminal: a follow-up submit is rejected.
        let late = engine.submit(&assessment.id, &[]).await;
        assert!(matches!(late, Err(EngineError::AlreadyCompleted(_))));
    }

    #[tokio::test]
    async fn remaining_seconds_tracks_the_clock() {
        let (storage, clock, engine) = setup();
        seed_pool(&storage, Level::A1, 12);
        seed_pool(&storage, Level::A2, 12);
        let assessment = engine.create(UserId::new("u-1"), Step::One).await.unwrap();
        assert_eq!(
            engine.remaining_seconds(&assessment.id).await.unwrap(),
            20 * 60
        );

        engine.start(&assessment.id).await.unwrap();
        clock.advance(Duration::minutes(5));
        assert_eq!(
            engine.remaining_seconds(&assessment.id).await.unwrap(),
            15 * 60
        );
    }
}
