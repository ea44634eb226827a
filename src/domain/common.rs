//! Common value objects shared across the OMEN domain.
//!
//! These are the atomic building blocks: confidence levels, categories,
//! geographic points, probability movement, and the deterministic hash that
//! every fingerprint and trace id derives from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Explicit confidence classification. OMEN never claims absolute accuracy;
/// confidence is always explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl ConfidenceLevel {
    /// Deterministic mapping from numeric score to level.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            ConfidenceLevel::High
        } else if score >= 0.4 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::High => "HIGH",
        }
    }
}

/// Primary classification of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalCategory {
    Geopolitical,
    Climate,
    Labor,
    Regulatory,
    Infrastructure,
    Economic,
    Other,
    Unknown,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Geopolitical => "GEOPOLITICAL",
            SignalCategory::Climate => "CLIMATE",
            SignalCategory::Labor => "LABOR",
            SignalCategory::Regulatory => "REGULATORY",
            SignalCategory::Infrastructure => "INFRASTRUCTURE",
            SignalCategory::Economic => "ECONOMIC",
            SignalCategory::Other => "OTHER",
            SignalCategory::Unknown => "UNKNOWN",
        }
    }
}

/// Result status of a single validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Passed,
    RejectedLowLiquidity,
    RejectedIrrelevantGeography,
    RejectedIrrelevantSemantic,
    RejectedInsufficientMovement,
    RejectedManipulationSuspected,
    RejectedRuleError,
}

impl ValidationStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationStatus::Passed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "PASSED",
            ValidationStatus::RejectedLowLiquidity => "REJECTED_LOW_LIQUIDITY",
            ValidationStatus::RejectedIrrelevantGeography => "REJECTED_IRRELEVANT_GEOGRAPHY",
            ValidationStatus::RejectedIrrelevantSemantic => "REJECTED_IRRELEVANT_SEMANTIC",
            ValidationStatus::RejectedInsufficientMovement => "REJECTED_INSUFFICIENT_MOVEMENT",
            ValidationStatus::RejectedManipulationSuspected => "REJECTED_MANIPULATION_SUSPECTED",
            ValidationStatus::RejectedRuleError => "REJECTED_RULE_ERROR",
        }
    }
}

/// Where a probability value came from. Carried alongside the probability so
/// a fallback is never encoded as a magic sentinel (and never as NaN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilitySource {
    MarketPrice,
    BestAsk,
    Fallback,
    Derived,
}

impl ProbabilitySource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ProbabilitySource::Fallback)
    }
}

impl Default for ProbabilitySource {
    fn default() -> Self {
        ProbabilitySource::Derived
    }
}

/// Geographic reference point, used for proximity checks against logistics
/// chokepoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// ISO 3166-1 alpha-2 when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            name: None,
            region_code: None,
        }
    }

    pub fn named(latitude: f64, longitude: f64, name: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            name: Some(name.into()),
            region_code: None,
        }
    }
}

/// Probability change over a time window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMovement {
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub window_hours: u32,
}

impl ProbabilityMovement {
    /// Movement of more than 10% in either direction is significant.
    pub fn is_significant(&self) -> bool {
        self.delta.abs() > 0.1
    }

    pub fn direction(&self) -> &'static str {
        if self.delta > 0.01 {
            "INCREASING"
        } else if self.delta < -0.01 {
            "DECREASING"
        } else {
            "STABLE"
        }
    }
}

/// Deterministic SHA-256 over `parts.join("|")`, truncated to 16 hex chars.
///
/// Same inputs always produce the same hash; this is the primitive behind
/// `input_event_hash`, trace ids, dedupe hashes, and deterministic event ids.
pub fn deterministic_hash(parts: &[&str]) -> String {
    let combined = parts.join("|");
    let digest = Sha256::digest(combined.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Full-length SHA-256 hex of raw bytes. Used for `api_response_hash`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Format a timestamp the way every serialized OMEN artifact does: RFC 3339
/// with explicit UTC offset.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_level_buckets() {
        assert_eq!(ConfidenceLevel::from_score(0.39), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.4), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.69), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::High);
    }

    #[test]
    fn deterministic_hash_is_stable() {
        let a = deterministic_hash(&["foo", "bar"]);
        let b = deterministic_hash(&["foo", "bar"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, deterministic_hash(&["foo", "baz"]));
    }

    #[test]
    fn haversine_suez_to_red_sea() {
        // Suez Canal (30.5, 32.3) to Red Sea reference point (20.0, 38.0)
        let d = haversine_km(30.5, 32.3, 20.0, 38.0);
        assert!(d > 1000.0 && d < 1500.0, "unexpected distance {d}");
    }

    #[test]
    fn movement_direction() {
        let m = ProbabilityMovement {
            current: 0.6,
            previous: 0.4,
            delta: 0.2,
            window_hours: 24,
        };
        assert!(m.is_significant());
        assert_eq!(m.direction(), "INCREASING");
    }

    #[test]
    fn validation_status_serializes_screaming() {
        let s = serde_json::to_string(&ValidationStatus::RejectedLowLiquidity).unwrap();
        assert_eq!(s, "\"REJECTED_LOW_LIQUIDITY\"");
    }
}
