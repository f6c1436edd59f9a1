//! Learned weight from historical feedback

use super::RankingConfig;
use crate::storage::{InteractionRecord, Usefulness};
use chrono::{DateTime, Utc};

/// Mean click rank assumed when no interaction recorded a rank
const NO_RANK: f32 = 999.0;

/// Sigmoid with the input clamped to [-10, 10]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-10.0, 10.0)).exp())
}

/// Aggregated feedback signals for one item within a query cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnedSignals {
    pub positive: u32,
    pub negative: u32,
    /// Mean dwell in seconds over interactions with positive dwell (0 if none)
    pub mean_dwell_secs: f32,
    /// Mean 1-based click rank over ranked interactions
    pub mean_rank: f32,
    /// Mean half-life decay factor in (0, 1]
    pub mean_decay: f32,
    pub interactions: usize,
}

impl LearnedSignals {
    /// Aggregate `interactions`; `None` when there are none
    pub fn collect(
        interactions: &[InteractionRecord],
        now: DateTime<Utc>,
        half_life_days: f64,
    ) -> Option<Self> {
        if interactions.is_empty() {
            return None;
        }

        let positive = interactions
            .iter()
            .filter(|i| i.usefulness == Usefulness::Useful)
            .count() as u32;
        let negative = interactions
            .iter()
            .filter(|i| i.usefulness == Usefulness::NotUseful)
            .count() as u32;

        let dwells: Vec<f32> = interactions
            .iter()
            .filter(|i| i.dwell_ms > 0)
            .map(|i| i.dwell_ms as f32 / 1000.0)
            .collect();
        let mean_dwell_secs = mean(&dwells).unwrap_or(0.0);

        let ranks: Vec<f32> = interactions
            .iter()
            .filter(|i| i.click_rank > 0)
            .map(|i| i.click_rank as f32)
            .collect();
        let mean_rank = mean(&ranks).unwrap_or(NO_RANK);

        let half_life_secs = (half_life_days * 86_400.0).max(f64::MIN_POSITIVE);
        let decays: Vec<f32> = interactions
            .iter()
            .map(|i| {
                let age_secs = ((now - i.ts).num_milliseconds() as f64 / 1000.0).max(0.0);
                2f64.powf(-age_secs / half_life_secs) as f32
            })
            .collect();
        let mean_decay = mean(&decays).unwrap_or(0.0);

        Some(Self {
            positive,
            negative,
            mean_dwell_secs,
            mean_rank,
            mean_decay,
            interactions: interactions.len(),
        })
    }

    /// Linear pre-activation combining every signal
    pub fn pre_activation(&self, config: &RankingConfig) -> f32 {
        let votes = config.a1 * (self.positive as f32 - self.negative as f32);
        let dwell = config.a2 * self.mean_dwell_secs;
        let rank = config.a3 / self.mean_rank.max(1.0);
        let transfer = config.a4 * self.transfer();
        let decay = config.a5 * (1.0 - self.mean_decay);

        votes + dwell + rank + transfer - decay
    }

    /// Cross-query transfer signal; no source feeds it yet
    fn transfer(&self) -> f32 {
        0.0
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

/// Learned weight in (-1, 1) for an item's cluster interactions
///
/// The sigmoid activation is centred (`2·σ(x) − 1`) so that an item without
/// history sits at 0, positive feedback raises it and negative feedback
/// lowers it.
pub fn learned_weight(
    interactions: &[InteractionRecord],
    now: DateTime<Utc>,
    config: &RankingConfig,
) -> f32 {
    match LearnedSignals::collect(interactions, now, config.half_life_days) {
        Some(signals) => 2.0 * sigmoid(signals.pre_activation(config)) - 1.0,
        None => 0.0,
    }
}
