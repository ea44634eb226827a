//! Geographic relevance validation.
//!
//! A signal is geographically relevant if its keywords name a known
//! chokepoint, its inferred locations lie within the proximity threshold of
//! one, or it matches the broader logistics keyword database.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

use crate::domain::common::{haversine_km, GeoLocation, ValidationStatus};
use crate::domain::explanation::{ExplanationStep, ParameterReference};
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;
use crate::rules::keywords::{matched_keywords, relevance_score};
use crate::rules::ValidationRule;

/// Known logistics chokepoints with coordinates.
pub const CHOKEPOINTS: &[(&str, f64, f64)] = &[
    ("Suez Canal", 30.5, 32.3),
    ("Panama Canal", 9.1, -79.7),
    ("Strait of Malacca", 2.5, 101.5),
    ("Strait of Hormuz", 26.5, 56.3),
    ("Bab el-Mandeb", 12.5, 43.3),
    ("Red Sea", 20.0, 38.0),
    ("Cape of Good Hope", -34.4, 18.5),
    ("English Channel", 50.5, -1.0),
    ("Taiwan Strait", 24.0, 119.0),
];

/// Keywords that map text to a chokepoint.
const GEO_KEYWORDS: &[(&str, &[&str])] = &[
    ("Suez Canal", &["suez", "egypt", "port said", "red sea"]),
    ("Panama Canal", &["panama", "central america", "colon"]),
    (
        "Strait of Malacca",
        &["malacca", "singapore", "malaysia", "indonesia"],
    ),
    (
        "Strait of Hormuz",
        &["hormuz", "iran", "oman", "persian gulf", "gulf"],
    ),
    ("Bab el-Mandeb", &["bab el-mandeb", "yemen", "djibouti", "aden"]),
    ("Red Sea", &["red sea", "houthi", "yemen", "saudi"]),
    ("Taiwan Strait", &["taiwan", "china", "taipei"]),
];

lazy_static! {
    static ref GEO_PATTERNS: Vec<(&'static str, Vec<(&'static str, Regex)>)> = GEO_KEYWORDS
        .iter()
        .map(|(chokepoint, kws)| {
            let patterns = kws
                .iter()
                .map(|kw| {
                    let re = Regex::new(&format!(r"\b{}\b", regex::escape(kw)))
                        .expect("static geo keyword pattern");
                    (*kw, re)
                })
                .collect();
            (*chokepoint, patterns)
        })
        .collect();
}

/// Look up a chokepoint's coordinates by name.
pub fn chokepoint_location(name: &str) -> Option<GeoLocation> {
    CHOKEPOINTS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(n, lat, lon)| GeoLocation::named(*lat, *lon, *n))
}

#[derive(Debug, Clone)]
pub struct GeographicRelevanceConfig {
    /// Max distance from an inferred location to a chokepoint.
    pub proximity_threshold_km: f64,
}

impl Default for GeographicRelevanceConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_km: 500.0,
        }
    }
}

pub struct GeographicRelevanceRule {
    config: GeographicRelevanceConfig,
}

impl GeographicRelevanceRule {
    pub fn new(config: GeographicRelevanceConfig) -> Self {
        Self { config }
    }
}

impl Default for GeographicRelevanceRule {
    fn default() -> Self {
        Self::new(GeographicRelevanceConfig::default())
    }
}

impl ValidationRule for GeographicRelevanceRule {
    fn name(&self) -> &'static str {
        "geographic_relevance"
    }

    fn version(&self) -> &'static str {
        "3.0.0"
    }

    fn apply(&self, event: &RawSignalEvent) -> Result<ValidationResult, OmenError> {
        let event_text = format!(
            "{} {}",
            event.title,
            event.description.as_deref().unwrap_or("")
        )
        .to_lowercase();

        let mut matched_chokepoints: Vec<&str> = Vec::new();
        let mut match_reasons: Vec<String> = Vec::new();

        // Chokepoint keywords: whole-word in text, exact in event keywords.
        for (chokepoint, patterns) in GEO_PATTERNS.iter() {
            for (kw, re) in patterns {
                let in_keywords = event.keywords.iter().any(|k| k == kw);
                if in_keywords || re.is_match(&event_text) {
                    if !matched_chokepoints.contains(chokepoint) {
                        matched_chokepoints.push(*chokepoint);
                        match_reasons.push(format!("keyword '{kw}' -> {chokepoint}"));
                    }
                    break;
                }
            }
        }

        // Location proximity.
        for loc in &event.inferred_locations {
            for (name, lat, lon) in CHOKEPOINTS {
                let distance = haversine_km(loc.latitude, loc.longitude, *lat, *lon);
                if distance <= self.config.proximity_threshold_km
                    && !matched_chokepoints.contains(name)
                {
                    matched_chokepoints.push(*name);
                    match_reasons.push(format!("location within {distance:.0}km of {name}"));
                }
            }
        }

        if !matched_chokepoints.is_empty() {
            let score = ((matched_chokepoints.len() as f64) * 0.3 + 0.4).min(1.0);
            return Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::Passed,
                score,
                format!(
                    "Relevant to {} chokepoint(s): {}",
                    matched_chokepoints.len(),
                    matched_chokepoints.join(", ")
                ),
            ));
        }

        // Fallback: any logistics keyword counts as relevant.
        let logistics = matched_keywords(&event_text);
        if !logistics.is_empty() {
            let score = relevance_score(&logistics);
            let shown: Vec<&str> = logistics.iter().take(5).map(String::as_str).collect();
            let suffix = if logistics.len() > 5 { "..." } else { "" };
            return Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::Passed,
                score,
                format!(
                    "Found {} logistics keyword(s): {}{suffix}",
                    logistics.len(),
                    shown.join(", ")
                ),
            ));
        }

        Ok(ValidationResult::new(
            self.name(),
            self.version(),
            ValidationStatus::RejectedIrrelevantGeography,
            0.1,
            "No geographic relevance to known logistics chokepoints or keywords",
        ))
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
            result.score * 0.25,
            at,
        )
        .with_input("keyword_count", json!(event.keywords.len()))
        .with_input("location_count", json!(event.inferred_locations.len()))
        .with_output("status", json!(result.status.as_str()))
        .with_output("score", json!(result.score))
        .with_parameter(
            ParameterReference::new(
                "proximity_threshold_km",
                json!(self.config.proximity_threshold_km),
                "km",
            )
            .with_source("ruleset configuration"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft};

    fn event(title: &str, locations: Vec<GeoLocation>, keywords: Vec<String>) -> RawSignalEvent {
        RawSignalEvent::new(RawEventDraft {
            event_id: "e1".into(),
            title: title.into(),
            probability: 0.5,
            keywords,
            inferred_locations: locations,
            market: Some(MarketMetadata::minimal("polymarket", "m1")),
            ..Default::default()
        })
    }

    #[test]
    fn chokepoint_keyword_match_passes() {
        let rule = GeographicRelevanceRule::default();
        let result = rule
            .apply(&event("Houthi drone activity escalates", vec![], vec![]))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert!(result.reason.contains("Red Sea"));
    }

    #[test]
    fn location_within_threshold_passes() {
        let rule = GeographicRelevanceRule::default();
        // Point in the southern Red Sea, within 500 km of the reference.
        let result = rule
            .apply(&event(
                "Maritime incident reported",
                vec![GeoLocation::new(15.5, 42.5)],
                vec![],
            ))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
    }

    #[test]
    fn unrelated_event_rejects() {
        let rule = GeographicRelevanceRule::default();
        let result = rule
            .apply(&event("Celebrity announces new album", vec![], vec![]))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::RejectedIrrelevantGeography);
        assert_eq!(result.score, 0.1);
    }

    #[test]
    fn logistics_keywords_fall_back_to_relevance_score() {
        let rule = GeographicRelevanceRule::default();
        let result = rule
            .apply(&event("Container freight rates surge", vec![], vec![]))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert!(result.reason.contains("logistics keyword"));
    }
}
