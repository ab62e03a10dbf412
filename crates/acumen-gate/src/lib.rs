//! Acumen Gate - decides which step a user may attempt
//!
//! The gate reads the continuously-maintained `UserProgression` summary,
//! never raw assessment history: `completed_steps` and `can_retake` are the
//! authoritative record of what has been unlocked and whether step 1 is
//! still open.
//!
//! A step lands in `completed_steps` when an attempt authorizes what comes
//! after it: steps 1 and 2 on a proceed-eligible result, terminal step 3 on
//! any certificate-earning result.

#![deny(unsafe_code)]

use acumen_storage::{ProgressionStore, StorageError};
use acumen_types::{Step, UserId, UserProgression};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// The progression gate. Every assessment request passes through here
/// before the state machine is allowed to create anything.
pub struct ProgressionGate<S> {
    storage: Arc<S>,
}

impl<S: ProgressionStore> ProgressionGate<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// The step this user is currently entitled to attempt.
    pub async fn next_eligible_step(&self, user_id: &UserId) -> Result<Step, GateError> {
        let progression = self.load(user_id).await?;
        if !progression.has_completed(Step::One) {
            if !progression.can_retake {
                return Err(GateError::RetakeLockedOut);
            }
            return Ok(Step::One);
        }
        if !progression.has_completed(Step::Two) {
            return Ok(Step::Two);
        }
        // Step 3 stays attemptable; there is nothing beyond it to unlock.
        Ok(Step::Three)
    }

    /// Check that `step` is open to this user, returning the progression
    /// snapshot the caller will keep working with.
    pub async fn authorize_step(
        &self,
        user_id: &UserId,
        step: Step,
    ) -> Result<UserProgression, GateError> {
        let progression = self.load(user_id).await?;
        match step {
            Step::One => {
                // Lockout bites only while no later step has been unlocked:
                // a user who already passed step 1 keeps their standing.
                if !progression.can_retake && !progression.has_completed(Step::One) {
                    return Err(GateError::RetakeLockedOut);
                }
            }
            Step::Two => {
                if !progression.has_completed(Step::One) {
                    return Err(GateError::StepNotUnlocked {
                        step: Step::Two,
                        requires: Step::One,
                    });
                }
            }
            Step::Three => {
                if !progression.has_completed(Step::Two) {
                    return Err(GateError::StepNotUnlocked {
                        step: Step::Three,
                        requires: Step::Two,
                    });
                }
            }
        }
        Ok(progression)
    }

    /// Permanently forfeit step-1 retakes. Invoked from the submission flow
    /// when a step-1 attempt scores below the hard-fail threshold. There is
    /// no unlock path.
    pub async fn apply_hard_fail_lockout(&self, user_id: &UserId) -> Result<(), GateError> {
        let mut progression = self.load(user_id).await?;
        if progression.can_retake {
            progression.can_retake = false;
            warn!(user_id = %user_id, "step-1 hard fail, retakes permanently locked");
            self.storage.upsert_progression(progression).await?;
        }
        Ok(())
    }

    async fn load(&self, user_id: &UserId) -> Result<UserProgression, GateError> {
        Ok(self
            .storage
            .get_progression(user_id)
            .await?
            .unwrap_or_else(|| UserProgression::new(user_id.clone())))
    }
}

/// Gate rejections.
#[derive(Debug, Error)]
pub enum GateError {
    /// A historical step-1 hard fail forfeited all retakes.
    #[error("retakes are not allowed after a step-1 hard fail")]
    RetakeLockedOut,

    #[error("{step} is locked: complete {requires} with at least 75% first")]
    StepNotUnlocked { step: Step, requires: Step },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use acumen_storage::InMemoryStorage;

    fn setup() -> (Arc<InMemoryStorage>, ProgressionGate<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (storage.clone(), ProgressionGate::new(storage))
    }

    async fn store(
        storage: &InMemoryStorage,
        user: &UserId,
        completed: Vec<Step>,
        can_retake: bool,
    ) {
        let mut progression = UserProgression::new(user.clone());
        progression.completed_steps = completed;
        progression.can_retake = can_retake;
        storage.upsert_progression(progression).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_user_starts_at_step_one() {
        let (_, gate) = setup();
        let user = UserId::new("u-1");
        assert_eq!(gate.next_eligible_step(&user).await.unwrap(), Step::One);
        assert!(gate.authorize_step(&user, Step::One).await.is_ok());
    }

    #[tokio::test]
    async fn later_steps_require_the_one_before() {
        let (storage, gate) = setup();
        let user = UserId::new("u-1");

        let denied = gate.authorize_step(&user, Step::Two).await;
        assert!(matches!(
            denied,
            Err(GateError::StepNotUnlocked { step: Step::Two, requires: Step::One })
        ));

        store(&storage, &user, vec![Step::One], true).await;
        assert!(gate.authorize_step(&user, Step::Two).await.is_ok());
        assert_eq!(gate.next_eligible_step(&user).await.unwrap(), Step::Two);

        let denied = gate.authorize_step(&user, Step::Three).await;
        assert!(matches!(denied, Err(GateError::StepNotUnlocked { .. })));

        store(&storage, &user, vec![Step::One, Step::Two], true).await;
        assert!(gate.authorize_step(&user, Step::Three).await.is_ok());
        assert_eq!(gate.next_eligible_step(&user).await.unwrap(), Step::Three);
    }

    #[tokio::test]
    async fn lockout_blocks_step_one() {
        let (storage, gate) = setup();
        let user = UserId::new("u-1");
        store(&storage, &user, vec![], false).await;

        assert!(matches!(
            gate.authorize_step(&user, Step::One).await,
            Err(GateError::RetakeLockedOut)
        ));
        assert!(matches!(
            gate.next_eligible_step(&user).await,
            Err(GateError::RetakeLockedOut)
        ));
    }

    #[tokio::test]
    async fn lockout_is_irrelevant_once_step_one_is_behind() {
        let (storage, gate) = setup();
        let user = UserId::new("u-1");
        // Passed step 1 earlier, then hard-failed a vanity retake.
        store(&storage, &user, vec![Step::One], false).await;

        assert!(gate.authorize_step(&user, Step::One).await.is_ok());
        assert!(gate.authorize_step(&user, Step::Two).await.is_ok());
    }

    #[tokio::test]
    async fn hard_fail_lockout_sticks() {
        let (storage, gate) = setup();
        let user = UserId::new("u-1");

        gate.apply_hard_fail_lockout(&user).await.unwrap();
        let progression = storage.get_progression(&user).await.unwrap().unwrap();
        assert!(!progression.can_retake);

        // Applying again is a no-op, not an error.
        gate.apply_hard_fail_lockout(&user).await.unwrap();
        let progression = storage.get_progression(&user).await.unwrap().unwrap();
        assert!(!progression.can_retake);
    }
}
