// Pairwise Elo Updater
//
// Pure rating arithmetic for a single two-party outcome.
// No state, no errors: defined for every pair of real ratings.

use serde::{Deserialize, Serialize};

/// Outcome score for party A of a pairwise result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score {
    /// A beat B.
    Win,

    /// A and B drew.
    Draw,

    /// B beat A.
    Loss,
}

impl Score {
    /// Numeric score from A's perspective.
    pub fn value(self) -> f64 {
        match self {
            Score::Win => 1.0,
            Score::Draw => 0.5,
            Score::Loss => 0.0,
        }
    }

    /// The same outcome seen from B's side.
    pub fn reversed(self) -> Self {
        match self {
            Score::Win => Score::Loss,
            Score::Draw => Score::Draw,
            Score::Loss => Score::Win,
        }
    }
}

/// Result of applying one pairwise outcome to two ratings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloUpdate {
    pub rating_a: f64,
    pub rating_b: f64,

    /// Change applied to A. B receives exactly the negation.
    pub delta: f64,

    /// Expected score of A before the outcome.
    pub expected: f64,

    /// The outcome contradicts the favoured party. Display only.
    pub upset: bool,
}

/// Expected score of a party rated `rating_a` against one rated `rating_b`.
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// Apply one outcome with the given K-factor.
pub fn update(rating_a: f64, rating_b: f64, score: Score, k_factor: f64) -> EloUpdate {
    let expected = expected_score(rating_a, rating_b);
    let delta = k_factor * (score.value() - expected);

    let upset = match score {
        Score::Win => expected < 0.5,
        Score::Loss => expected > 0.5,
        Score::Draw => false,
    };

    EloUpdate {
        rating_a: rating_a + delta,
        rating_b: rating_b - delta,
        delta,
        expected,
        upset,
    }
}
