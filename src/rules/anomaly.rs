//! Anomaly detection.
//!
//! Detects suspicious patterns that may indicate manipulation or unreliable
//! data: extreme probabilities, abnormal probability movement, trader-count
//! vs volume mismatch, and statistical z-score outliers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use statrs::statistics::Statistics;

use crate::domain::common::ValidationStatus;
use crate::domain::explanation::ExplanationStep;
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;
use crate::rules::ValidationRule;

/// Thresholds for anomaly detection.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Probabilities below this are suspiciously extreme.
    pub min_probability: f64,
    pub max_probability: f64,
    /// Probability change above this within its window is suspicious.
    pub max_probability_change_24h: f64,
    pub min_volume_for_high_confidence: f64,
    pub min_traders: u32,
    pub z_score_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.05,
            max_probability: 0.95,
            max_probability_change_24h: 0.5,
            min_volume_for_high_confidence: 10_000.0,
            min_traders: 10,
            z_score_threshold: 3.0,
        }
    }
}

/// Outcome of a single z-score check.
#[derive(Debug, Clone)]
pub struct ZScoreResult {
    pub is_anomaly: bool,
    /// Clamped to [-10, 10]; out-of-range hard-boundary hits report 10.0.
    pub z_score: f64,
    pub details: String,
}

/// Z-score anomaly detection over a rolling window of observations.
///
/// Requires at least 10 observations before activating; keeps at most
/// `max_history`. The reported z-score is always clamped so it can be
/// serialized safely (no NaN/Inf ever escapes).
pub struct StatisticalAnomalyDetector {
    z_threshold: f64,
    max_history: usize,
    history: VecDeque<f64>,
}

const MIN_OBSERVATIONS: usize = 10;
const Z_CLAMP: f64 = 10.0;

impl StatisticalAnomalyDetector {
    pub fn new(z_threshold: f64) -> Self {
        Self::with_history(z_threshold, 1000)
    }

    pub fn with_history(z_threshold: f64, max_history: usize) -> Self {
        Self {
            z_threshold,
            max_history,
            history: VecDeque::with_capacity(max_history.min(64)),
        }
    }

    pub fn add_observation(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.history.push_back(value);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn detect(&self, value: f64) -> ZScoreResult {
        if self.history.len() < MIN_OBSERVATIONS {
            return ZScoreResult {
                is_anomaly: false,
                z_score: 0.0,
                details: format!(
                    "Insufficient history for z-score detection ({} of {MIN_OBSERVATIONS})",
                    self.history.len()
                ),
            };
        }

        let values: Vec<f64> = self.history.iter().copied().collect();
        let mean = (&values).mean();
        let stdev = (&values).std_dev();

        if !stdev.is_finite() || stdev == 0.0 {
            return ZScoreResult {
                is_anomaly: false,
                z_score: 0.0,
                details: "Zero standard deviation, all observations identical".into(),
            };
        }

        let z = ((value - mean) / stdev).abs().min(Z_CLAMP);
        ZScoreResult {
            is_anomaly: z > self.z_threshold,
            z_score: (z * 10_000.0).round() / 10_000.0,
            details: format!("z={z:.2}, mean={mean:.4}, stdev={stdev:.4}"),
        }
    }

    /// Combined hard-boundary and statistical check. Values outside the
    /// valid range always flag, reported at the clamp bound.
    pub fn detect_with_range(
        &self,
        value: f64,
        min_valid: Option<f64>,
        max_valid: Option<f64>,
    ) -> ZScoreResult {
        if let Some(min) = min_valid {
            if value < min {
                return ZScoreResult {
                    is_anomaly: true,
                    z_score: Z_CLAMP,
                    details: format!("Value {value:.4} below minimum valid {min}"),
                };
            }
        }
        if let Some(max) = max_valid {
            if value > max {
                return ZScoreResult {
                    is_anomaly: true,
                    z_score: Z_CLAMP,
                    details: format!("Value {value:.4} above maximum valid {max}"),
                };
            }
        }
        self.detect(value)
    }
}

struct Detectors {
    probability: StatisticalAnomalyDetector,
    volume: StatisticalAnomalyDetector,
    change: StatisticalAnomalyDetector,
}

/// The anomaly rule. Accumulates a risk score across checks; at or above
/// 0.5 the event is rejected as suspected manipulation, below that minor
/// anomalies are noted but the event passes.
pub struct AnomalyDetectionRule {
    config: AnomalyConfig,
    detectors: Mutex<Detectors>,
}

impl AnomalyDetectionRule {
    pub fn new(config: AnomalyConfig) -> Self {
        let z = config.z_score_threshold;
        Self {
            config,
            detectors: Mutex::new(Detectors {
                probability: StatisticalAnomalyDetector::new(z),
                volume: StatisticalAnomalyDetector::new(z),
                // Change magnitudes flag at a tighter threshold.
                change: StatisticalAnomalyDetector::new(2.5),
            }),
        }
    }
}

impl Default for AnomalyDetectionRule {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}

impl ValidationRule for AnomalyDetectionRule {
    fn name(&self) -> &'static str {
        "anomaly_detection"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn apply(&self, event: &RawSignalEvent) -> Result<ValidationResult, OmenError> {
        let mut anomalies: Vec<String> = Vec::new();
        let mut risk_score: f64 = 0.0;

        let prob = event.probability;
        if prob < self.config.min_probability {
            anomalies.push(format!("Probability too low ({:.1}%)", prob * 100.0));
            risk_score += 0.3;
        } else if prob > self.config.max_probability {
            anomalies.push(format!("Probability too high ({:.1}%)", prob * 100.0));
            risk_score += 0.3;
        }

        let mut detectors = self.detectors.lock();

        let z_prob = detectors
            .probability
            .detect_with_range(prob, Some(0.0), Some(1.0));
        detectors.probability.add_observation(prob);
        if z_prob.is_anomaly && z_prob.z_score < Z_CLAMP {
            anomalies.push(format!("Statistical probability anomaly: {}", z_prob.details));
            risk_score += 0.2;
        }

        if let Some(movement) = &event.movement {
            if movement.delta.abs() > self.config.max_probability_change_24h {
                anomalies.push(format!(
                    "Unusual probability change ({:+.1}% in {}h)",
                    movement.delta * 100.0,
                    movement.window_hours
                ));
                risk_score += 0.4;
            }

            let change_z = detectors.change.detect(movement.delta.abs());
            detectors.change.add_observation(movement.delta.abs());
            if change_z.is_anomaly {
                anomalies.push(format!("Change rate anomaly: {}", change_z.details));
                risk_score += 0.15;
            }
        }

        let market = &event.market;
        if let Some(traders) = market.num_traders {
            if traders < self.config.min_traders
                && market.total_volume_usd > self.config.min_volume_for_high_confidence
            {
                anomalies.push(format!(
                    "High volume (${:.0}) but few traders ({traders})",
                    market.total_volume_usd
                ));
                risk_score += 0.3;
            }
        }

        if market.total_volume_usd > 0.0 {
            let vol_z = detectors.volume.detect(market.total_volume_usd);
            detectors.volume.add_observation(market.total_volume_usd);
            if vol_z.is_anomaly {
                anomalies.push(format!("Volume anomaly: {}", vol_z.details));
                risk_score += 0.15;
            }
        }

        drop(detectors);

        let score = (1.0_f64 - risk_score).max(0.0);
        if risk_score >= 0.5 {
            Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::RejectedManipulationSuspected,
                score,
                format!("Anomalies detected: {}", anomalies.join("; ")),
            ))
        } else if !anomalies.is_empty() {
            Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::Passed,
                score,
                format!("Minor anomalies noted: {}", anomalies.join("; ")),
            ))
        } else {
            Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::Passed,
                1.0,
                "No anomalies detected",
            ))
        }
    }

    fn explain(
        &self,
        event: &RawSignalEvent,
        result: &ValidationResult,
        at: DateTime<Utc>,
    ) -> ExplanationStep {
        ExplanationStep::new(
            1,
            self.name(),
            self.version(),
            result.reason.clone(),
            result.score * 0.2,
            at,
        )
        .with_input("probability", json!(event.probability))
        .with_input("has_movement", json!(event.movement.is_some()))
        .with_input("num_traders", json!(event.market.num_traders))
        .with_output("status", json!(result.status.as_str()))
        .with_output("score", json!(result.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::common::ProbabilityMovement;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft};

    fn event(probability: f64, movement: Option<ProbabilityMovement>) -> RawSignalEvent {
        RawSignalEvent::new(RawEventDraft {
            event_id: "e1".into(),
            title: "test".into(),
            probability,
            movement,
            market: Some(MarketMetadata {
                current_liquidity_usd: 50_000.0,
                total_volume_usd: 500_000.0,
                num_traders: Some(250),
                ..MarketMetadata::minimal("polymarket", "m1")
            }),
            ..Default::default()
        })
    }

    #[test]
    fn clean_event_passes_with_full_score() {
        let rule = AnomalyDetectionRule::default();
        let result = rule.apply(&event(0.6, None)).unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn extreme_probability_plus_wild_movement_rejects() {
        let rule = AnomalyDetectionRule::default();
        let movement = ProbabilityMovement {
            current: 0.97,
            previous: 0.30,
            delta: 0.67,
            window_hours: 24,
        };
        let result = rule.apply(&event(0.97, Some(movement))).unwrap();
        assert_eq!(result.status, ValidationStatus::RejectedManipulationSuspected);
    }

    #[test]
    fn few_traders_high_volume_is_noted() {
        let rule = AnomalyDetectionRule::default();
        let e = RawSignalEvent::new(RawEventDraft {
            event_id: "e2".into(),
            title: "test".into(),
            probability: 0.5,
            market: Some(MarketMetadata {
                current_liquidity_usd: 50_000.0,
                total_volume_usd: 100_000.0,
                num_traders: Some(3),
                ..MarketMetadata::minimal("polymarket", "m2")
            }),
            ..Default::default()
        });
        let result = rule.apply(&e).unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert!(result.reason.contains("few traders"));
    }

    #[test]
    fn detector_needs_ten_observations() {
        let mut d = StatisticalAnomalyDetector::new(3.0);
        for i in 0..9 {
            d.add_observation(i as f64);
        }
        assert!(!d.detect(1000.0).is_anomaly);
        d.add_observation(9.0);
        assert!(d.detect(1000.0).is_anomaly);
    }

    #[test]
    fn z_score_is_clamped_for_json_safety() {
        let mut d = StatisticalAnomalyDetector::new(3.0);
        for i in 0..100 {
            d.add_observation(50.0 + (i % 3) as f64);
        }
        let result = d.detect(1.0e12);
        assert!(result.is_anomaly);
        assert!(result.z_score <= 10.0);
        assert!(result.z_score.is_finite());
    }

    #[test]
    fn out_of_range_always_flags() {
        let d = StatisticalAnomalyDetector::new(3.0);
        let result = d.detect_with_range(1.5, Some(0.0), Some(1.0));
        assert!(result.is_anomaly);
        assert_eq!(result.z_score, 10.0);
    }
}
