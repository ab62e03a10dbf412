//! Injected randomness for question selection.
//!
//! Selection order is deliberately non-reproducible in production to
//! discourage answer-sharing, so tests assert set-membership properties
//! against a deterministic source instead of exact sequences.

use acumen_types::Question;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;

/// Source of shuffle decisions for question selection and ordering.
pub trait ShuffleSource: Send + Sync {
    fn shuffle_questions(&self, questions: &mut [Question]);
}

/// Production shuffle: fresh OS entropy per call.
#[derive(Default)]
pub struct EntropyShuffle;

impl ShuffleSource for EntropyShuffle {
    fn shuffle_questions(&self, questions: &mut [Question]) {
        questions.shuffle(&mut rand::thread_rng());
    }
}

/// Deterministic shuffle for tests and replayable simulations.
pub struct SeededShuffle {
    rng: Mutex<StdRng>,
}

impl SeededShuffle {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ShuffleSource for SeededShuffle {
    fn shuffle_questions(&self, questions: &mut [Question]) {
        if let Ok(mut rng) = self.rng.lock() {
            questions.shuffle(&mut *rng);
        }
    }
}

/// No-op shuffle: keeps pool order. Handy when a test wants to predict the
/// exact selected subset.
#[derive(Default)]
pub struct IdentityShuffle;

impl ShuffleSource for IdentityShuffle {
    fn shuffle_questions(&self, _questions: &mut [Question]) {}
}
