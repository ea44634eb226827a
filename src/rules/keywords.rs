//! Logistics keyword registry.
//!
//! Immutable static tables compiled into the binary, organized by category.
//! All matching is whole-word ("port" does not match "sport", "strike" does
//! not match "striker").

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

/// Keyword vocabulary by category. Categories feed both validation scoring
/// and tag generation.
pub const LOGISTICS_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "maritime",
        &[
            "shipping", "ship", "vessel", "cargo", "container", "freight", "maritime", "port",
            "harbor", "dock", "terminal", "berth", "tanker", "bulk", "liner", "carrier", "fleet",
        ],
    ),
    (
        "routes",
        &[
            "red sea", "suez", "panama", "hormuz", "malacca", "bosphorus", "gibraltar", "cape",
            "route", "strait", "canal", "passage", "bab el-mandeb", "taiwan strait",
            "singapore strait",
        ],
    ),
    (
        "trade",
        &[
            "trade", "export", "import", "tariff", "customs", "duty", "commerce", "commodity",
            "goods", "merchandise", "supply chain", "procurement", "sourcing", "vendor",
            "supplier",
        ],
    ),
    (
        "energy",
        &[
            "oil", "gas", "lng", "petroleum", "crude", "fuel", "bunker", "energy", "pipeline",
            "refinery", "opec", "barrel",
        ],
    ),
    (
        "geopolitical",
        &[
            "sanction", "embargo", "blockade", "conflict", "war", "military", "attack", "threat",
            "security", "piracy", "houthi", "rebel", "tension", "dispute", "crisis", "escalation",
            "strike", "closure",
        ],
    ),
    (
        "infrastructure",
        &[
            "port", "airport", "rail", "railway", "road", "bridge", "warehouse", "distribution",
            "logistics", "hub", "node", "infrastructure", "capacity", "congestion",
        ],
    ),
    (
        "weather",
        &[
            "storm", "hurricane", "typhoon", "cyclone", "flood", "drought", "earthquake",
            "tsunami", "weather", "climate", "el nino",
        ],
    ),
    (
        "economic",
        &[
            "freight rate", "shipping cost", "fuel price", "insurance", "premium", "surcharge",
            "fee", "cost", "price", "index", "demand", "supply", "shortage", "surplus",
        ],
    ),
    (
        "regions",
        &[
            "asia", "europe", "america", "africa", "middle east", "pacific", "atlantic",
            "mediterranean", "china", "india", "vietnam", "indonesia", "japan", "korea",
            "singapore", "dubai", "rotterdam", "los angeles", "long beach", "shanghai",
            "shenzhen", "hong kong",
        ],
    ),
];

lazy_static! {
    /// All distinct keywords with precompiled whole-word patterns, in sorted
    /// order so matching output is deterministic.
    static ref KEYWORD_PATTERNS: Vec<(&'static str, Regex)> = {
        let mut keywords: Vec<&'static str> = LOGISTICS_KEYWORDS
            .iter()
            .flat_map(|(_, kws)| kws.iter().copied())
            .collect();
        keywords.sort();
        keywords.dedup();
        keywords
            .into_iter()
            .map(|kw| {
                let pattern = format!(r"\b{}\b", regex::escape(kw));
                (kw, Regex::new(&pattern).expect("static keyword pattern"))
            })
            .collect()
    };
}

/// Whole-word check for a single keyword against lowercased text.
pub fn word_match(keyword: &str, text: &str) -> bool {
    // One-off patterns are only built for dynamic keywords; the registry
    // uses the precompiled set.
    match Regex::new(&format!(r"\b{}\b", regex::escape(keyword))) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

/// Find all logistics keywords present in the text. Output is sorted.
pub fn matched_keywords(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let text_lower = text.to_lowercase();
    KEYWORD_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(&text_lower))
        .map(|(kw, _)| (*kw).to_string())
        .collect()
}

/// Group matched keywords by registry category.
pub fn keyword_categories(keywords: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut result = BTreeMap::new();
    for (category, category_keywords) in LOGISTICS_KEYWORDS {
        let mut matches: Vec<String> = keywords
            .iter()
            .filter(|kw| category_keywords.contains(&kw.as_str()))
            .cloned()
            .collect();
        if !matches.is_empty() {
            matches.sort();
            matches.dedup();
            result.insert((*category).to_string(), matches);
        }
    }
    result
}

/// Logistics relevance from matched keyword count, with a bonus when the
/// "routes" or "geopolitical" categories are present. Capped at 1.0.
pub fn relevance_score(keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let base = match keywords.len() {
        1 => 0.3,
        2..=3 => 0.5,
        4..=5 => 0.7,
        _ => 0.9,
    };
    let categories = keyword_categories(keywords);
    let mut bonus: f64 = 0.0;
    if categories.contains_key("routes") {
        bonus += 0.1;
    }
    if categories.contains_key("geopolitical") {
        bonus += 0.1;
    }
    (base + bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_does_not_match_sport() {
        let matched = matched_keywords("the sport event was exciting");
        assert!(!matched.iter().any(|k| k == "port"));

        let matched = matched_keywords("the port of rotterdam is congested");
        assert!(matched.iter().any(|k| k == "port"));
        assert!(matched.iter().any(|k| k == "rotterdam"));
    }

    #[test]
    fn strike_does_not_match_striker() {
        let matched = matched_keywords("the striker scored twice");
        assert!(!matched.iter().any(|k| k == "strike"));

        let matched = matched_keywords("dockworkers begin strike at terminal");
        assert!(matched.iter().any(|k| k == "strike"));
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let a = matched_keywords("suez canal shipping disruption, red sea attack");
        let b = matched_keywords("suez canal shipping disruption, red sea attack");
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(a, sorted);
    }

    #[test]
    fn relevance_score_buckets() {
        assert_eq!(relevance_score(&[]), 0.0);
        assert_eq!(relevance_score(&["cargo".into()]), 0.3);
        // Two keywords with a routes bonus
        let kws = vec!["suez".to_string(), "cargo".to_string()];
        assert!((relevance_score(&kws) - 0.6).abs() < 1e-9);
        // Bonus capped at 1.0
        let many: Vec<String> = ["suez", "attack", "cargo", "port", "oil", "storm", "trade"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(relevance_score(&many) <= 1.0);
    }

    #[test]
    fn categories_cover_multiword_keywords() {
        let matched = matched_keywords("supply chain disruption in the red sea");
        assert!(matched.iter().any(|k| k == "supply chain"));
        assert!(matched.iter().any(|k| k == "red sea"));
        let cats = keyword_categories(&matched);
        assert!(cats.contains_key("trade"));
        assert!(cats.contains_key("routes"));
    }
}
