//! Offline disambiguation.

use async_trait::async_trait;

use crate::error::CanonResult;
use crate::traits::{Disambiguation, DisambiguationOracle, OracleCandidate};
use crate::types::{normalize_name, EntityCandidate};

/// Confidence assigned when names match after normalization.
const NAME_MATCH_CONFIDENCE: f32 = 0.95;

/// A [`DisambiguationOracle`] that needs no model.
///
/// Picks the candidate with the highest vector score, boosted when the
/// normalized names are equal, and calls it a duplicate when that
/// confidence reaches `duplicate_floor`.
#[derive(Debug, Clone)]
pub struct HeuristicOracle {
    duplicate_floor: f32,
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self {
            duplicate_floor: 0.9,
        }
    }
}

impl HeuristicOracle {
    pub fn new(duplicate_floor: f32) -> Self {
        Self {
            duplicate_floor: duplicate_floor.clamp(0.0, 1.0),
        }
    }

    fn confidence(target: &str, candidate: &OracleCandidate) -> f32 {
        let score = candidate.score.clamp(0.0, 1.0);
        if normalize_name(target) == normalize_name(&candidate.name) {
            score.max(NAME_MATCH_CONFIDENCE)
        } else {
            score
        }
    }
}

#[async_trait]
impl DisambiguationOracle for HeuristicOracle {
    async fn disambiguate(
        &self,
        target: &EntityCandidate,
        candidates: &[OracleCandidate],
    ) -> CanonResult<Disambiguation> {
        let best = candidates
            .iter()
            .map(|c| (c, Self::confidence(&target.name, c)))
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.entity_id.cmp(&a.0.entity_id)));

        let verdict = match best {
            Some((candidate, confidence)) if confidence >= self.duplicate_floor => {
                Disambiguation::duplicate_of(candidate.entity_id, confidence).with_reasoning(
                    format!("'{}' matches '{}'", target.name, candidate.name),
                )
            }
            Some((_, confidence)) => Disambiguation::distinct(1.0 - confidence),
            None => Disambiguation::distinct(1.0),
        };
        Ok(verdict)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
