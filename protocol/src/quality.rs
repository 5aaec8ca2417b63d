//! Adaptive quality controller (C7): RTT-driven tier selection with
//! hysteresis so a single noisy sample can't flap the stream quality.

use std::collections::VecDeque;

const WINDOW: usize = 10;
const HYSTERESIS_STREAK: u32 = 3;

/// Stream quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Lowest bitrate, 15 fps target.
    Low,
    /// Balanced tier, 20 fps target.
    Medium,
    /// Best quality, 30 fps target.
    High,
}

impl Quality {
    /// Target frames per second for this tier.
    pub fn target_fps(self) -> u32 {
        match self {
            Quality::High => 30,
            Quality::Medium => 20,
            Quality::Low => 15,
        }
    }

    fn from_mean_rtt_ms(mean_rtt_ms: f64) -> Self {
        if mean_rtt_ms < 50.0 {
            Quality::High
        } else if mean_rtt_ms <= 150.0 {
            Quality::Medium
        } else {
            Quality::Low
        }
    }
}

/// `quality_change` payload: an explicit override pushed by the
/// technician, or by the controller itself when running in `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QualityChangePayload {
    /// Requested tier.
    pub quality: Quality,
    /// Requested frames per second.
    pub fps: u32,
}

/// Ordering used to detect whether consecutive recommendations keep
/// pointing the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

fn direction(from: Quality, to: Quality) -> Option<Direction> {
    let rank = |q: Quality| match q {
        Quality::Low => 0,
        Quality::Medium => 1,
        Quality::High => 2,
    };
    match rank(to).cmp(&rank(from)) {
        std::cmp::Ordering::Greater => Some(Direction::Up),
        std::cmp::Ordering::Less => Some(Direction::Down),
        std::cmp::Ordering::Equal => None,
    }
}

/// Rolling-window RTT tracker with hysteresis over quality recommendations.
///
/// One instance lives per active session on the side that runs the
/// controller (the agent, per spec.md §4.7 — pushed after each heartbeat
/// ack).
#[derive(Debug, Clone)]
pub struct QualityController {
    samples: VecDeque<f64>,
    current: Quality,
    pending: Option<Direction>,
    streak: u32,
}

impl Default for QualityController {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            current: Quality::Medium,
            pending: None,
            streak: 0,
        }
    }
}

impl QualityController {
    /// Construct a controller starting at the given tier.
    pub fn new(starting: Quality) -> Self {
        Self {
            current: starting,
            ..Self::default()
        }
    }

    /// Current applied tier.
    pub fn current(&self) -> Quality {
        self.current
    }

    /// Apply an explicit override, bypassing hysteresis (spec.md §4.5:
    /// a technician's `quality_change` applies directly to the encoder
    /// collaborator; hysteresis only gates the controller's own
    /// RTT-driven recommendations).
    pub fn force(&mut self, quality: Quality) {
        self.current = quality;
        self.pending = None;
        self.streak = 0;
    }

    /// Record one RTT sample (milliseconds) and return `Some(tier)` if the
    /// running recommendation just flipped the applied tier, `None`
    /// otherwise.
    ///
    /// Negative RTTs are discarded per spec.md §8 boundary behavior.
    pub fn record_rtt(&mut self, rtt_ms: f64) -> Option<Quality> {
        if rtt_ms < 0.0 {
            return None;
        }
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);

        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let recommended = Quality::from_mean_rtt_ms(mean);

        match direction(self.current, recommended) {
            None => {
                self.pending = None;
                self.streak = 0;
                None
            }
            Some(dir) => {
                if self.pending == Some(dir) {
                    self.streak += 1;
                } else {
                    self.pending = Some(dir);
                    self.streak = 1;
                }
                if self.streak >= HYSTERESIS_STREAK {
                    self.current = recommended;
                    self.pending = None;
                    self.streak = 0;
                    Some(recommended)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_does_not_flip_tier() {
        let mut ctrl = QualityController::new(Quality::Medium);
        assert_eq!(ctrl.record_rtt(200.0), None);
        assert_eq!(ctrl.current(), Quality::Medium);
    }

    #[test]
    fn three_consecutive_samples_flip_tier() {
        let mut ctrl = QualityController::new(Quality::Medium);
        assert_eq!(ctrl.record_rtt(200.0), None);
        assert_eq!(ctrl.record_rtt(210.0), None);
        assert_eq!(ctrl.record_rtt(220.0), Some(Quality::Low));
        assert_eq!(ctrl.current(), Quality::Low);
    }

    #[test]
    fn opposite_sample_resets_streak() {
        let mut ctrl = QualityController::new(Quality::Medium);
        assert_eq!(ctrl.record_rtt(200.0), None);
        assert_eq!(ctrl.record_rtt(210.0), None);
        // A low-RTT sample in between resets the "down" streak.
        assert_eq!(ctrl.record_rtt(10.0), None);
        assert_eq!(ctrl.record_rtt(200.0), None);
        assert_eq!(ctrl.current(), Quality::Medium);
    }

    #[test]
    fn negative_rtt_is_discarded() {
        let mut ctrl = QualityController::new(Quality::Medium);
        assert_eq!(ctrl.record_rtt(-5.0), None);
        assert!(ctrl.samples.is_empty());
    }
}
