//! Deterministic scenario data.
//!
//! Mock providers backing the demo deployment and tests. All pseudo-random
//! generation is seeded from an explicit scenario seed (derive one from
//! `ProcessingContext.processing_time` for replay), never from the system
//! clock at call sites, so a replayed cycle regenerates identical batches.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

use crate::domain::context::ProcessingContext;
use crate::error::SourceError;
use crate::sources::ais::{AisProvider, ChokepointStatus, PortStatus, VesselMovement};
use crate::sources::commodity::{CommodityProvider, PriceTimeSeries};
use crate::sources::freight::{FreightProvider, FreightRate};
use crate::sources::market::MarketDataProvider;
use crate::sources::news::{NewsArticle, NewsProvider};
use crate::sources::weather::{StormAlert, WeatherProvider};

/// Shared configuration for all scenario providers.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub base_time: DateTime<Utc>,
}

impl ScenarioConfig {
    pub fn new(seed: u64, base_time: DateTime<Utc>) -> Self {
        Self { seed, base_time }
    }

    /// Derive a scenario seed from a processing context, for replay.
    pub fn from_context(context: &ProcessingContext) -> Self {
        Self {
            seed: context.processing_time.timestamp() as u64,
            base_time: context.processing_time,
        }
    }

    fn rng(&self, salt: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed ^ salt)
    }
}

pub struct ScenarioMarketProvider {
    config: ScenarioConfig,
}

impl ScenarioMarketProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MarketDataProvider for ScenarioMarketProvider {
    async fn fetch_markets(&self, _limit: usize) -> Result<(Vec<Value>, Vec<u8>), SourceError> {
        let mut rng = self.config.rng(0x6d61726b);
        let jitter = |rng: &mut ChaCha8Rng, base: f64| {
            (base + rng.gen_range(-0.05..0.05)).clamp(0.02, 0.98)
        };

        let markets = vec![
            json!({
                "id": "m-red-sea-001",
                "question": "Will Red Sea shipping be disrupted by attacks before year end?",
                "description": "Resolves YES if commercial shipping through the Red Sea or Bab el-Mandeb is materially disrupted.",
                "outcomePrices": format!("[\"{:.3}\",\"{:.3}\"]", jitter(&mut rng, 0.72), 0.28),
                "volume": "520000",
                "liquidity": "61000",
                "numTraders": 410,
                "slug": "red-sea-shipping-disruption",
            }),
            json!({
                "id": "m-panama-002",
                "question": "Panama Canal transit restrictions extended due to drought?",
                "description": "Resolves YES if draft or transit restrictions remain in force.",
                "outcomePrices": format!("[\"{:.3}\",\"{:.3}\"]", jitter(&mut rng, 0.58), 0.42),
                "volume": "230000",
                "liquidity": "28000",
                "numTraders": 190,
                "slug": "panama-canal-restrictions",
            }),
            json!({
                "id": "m-port-strike-003",
                "question": "Will a dockworkers strike close a major European port this quarter?",
                "description": "Union negotiations at Rotterdam and Hamburg terminals.",
                "outcomePrices": format!("[\"{:.3}\",\"{:.3}\"]", jitter(&mut rng, 0.34), 0.66),
                "volume": "140000",
                "liquidity": "17000",
                "numTraders": 120,
                "slug": "europe-port-strike",
            }),
            json!({
                "id": "m-hormuz-004",
                "question": "Strait of Hormuz tanker transit interrupted this month?",
                "description": "Escalation monitoring in the Persian Gulf.",
                "outcomePrices": format!("[\"{:.3}\",\"{:.3}\"]", jitter(&mut rng, 0.18), 0.82),
                "volume": "310000",
                "liquidity": "45000",
                "numTraders": 260,
                "slug": "hormuz-transit",
            }),
        ];
        let body = serde_json::to_vec(&markets)
            .map_err(|e| SourceError::Unavailable {
                source_name: "scenario_market".into(),
                message: e.to_string(),
            })?;
        Ok((markets, body))
    }
}

pub struct ScenarioNewsProvider {
    config: ScenarioConfig,
}

impl ScenarioNewsProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NewsProvider for ScenarioNewsProvider {
    async fn fetch_articles(
        &self,
        _limit: usize,
    ) -> Result<(Vec<NewsArticle>, Vec<u8>), SourceError> {
        let now = self.config.base_time;
        let articles = vec![
            NewsArticle {
                url: "https://reuters.com/world/red-sea-vessel-attack".into(),
                title: "Missile attack damages container vessel in Red Sea".into(),
                description: Some(
                    "Shipping disruption feared as carriers weigh Suez diversion after the attack."
                        .into(),
                ),
                content: None,
                source_name: "Reuters".into(),
                source_domain: "reuters.com".into(),
                published_at: now - Duration::hours(1),
                fetched_at: now,
            },
            NewsArticle {
                url: "https://gcaptain.com/rotterdam-dockers-walkout".into(),
                title: "Rotterdam dockworkers begin 48-hour walkout over pay".into(),
                description: Some("Union strike threatens terminal shutdown at Europe's busiest port.".into()),
                content: None,
                source_name: "gCaptain".into(),
                source_domain: "gcaptain.com".into(),
                published_at: now - Duration::hours(4),
                fetched_at: now,
            },
            NewsArticle {
                url: "https://example-blog.net/celebrity-news".into(),
                title: "Celebrity couple spotted at film premiere".into(),
                description: None,
                content: None,
                source_name: "Example Blog".into(),
                source_domain: "example-blog.net".into(),
                published_at: now - Duration::hours(2),
                fetched_at: now,
            },
        ];
        let body = serde_json::to_vec(&articles).map_err(|e| SourceError::Unavailable {
            source_name: "scenario_news".into(),
            message: e.to_string(),
        })?;
        Ok((articles, body))
    }
}

pub struct ScenarioCommodityProvider {
    config: ScenarioConfig,
}

impl ScenarioCommodityProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommodityProvider for ScenarioCommodityProvider {
    async fn fetch_series(
        &self,
        _limit: usize,
    ) -> Result<(Vec<PriceTimeSeries>, Vec<u8>), SourceError> {
        let mut rng = self.config.rng(0x636f6d6d);
        let start = self.config.base_time - Duration::days(30);

        let mut brent: Vec<(DateTime<Utc>, f64)> = (0..30)
            .map(|i| {
                let noise: f64 = rng.gen_range(-0.8..0.8);
                (start + Duration::days(i), 82.0 + noise)
            })
            .collect();
        // Scenario: a sharp final-day move.
        brent.push((self.config.base_time, 82.0 * 1.14));

        let wheat: Vec<(DateTime<Utc>, f64)> = (0..31)
            .map(|i| {
                let noise: f64 = rng.gen_range(-2.0..2.0);
                (start + Duration::days(i), 620.0 + noise)
            })
            .collect();

        let series = vec![
            PriceTimeSeries {
                symbol: "BRENT".into(),
                name: "Brent Crude".into(),
                category: "energy".into(),
                prices: brent,
                spike_threshold_pct: 10.0,
                zscore_threshold: 2.0,
            },
            PriceTimeSeries {
                symbol: "WHEAT".into(),
                name: "Wheat Futures".into(),
                category: "agricultural".into(),
                prices: wheat,
                spike_threshold_pct: 10.0,
                zscore_threshold: 2.0,
            },
        ];
        let body = serde_json::to_vec(&series).map_err(|e| SourceError::Unavailable {
            source_name: "scenario_commodity".into(),
            message: e.to_string(),
        })?;
        Ok((series, body))
    }
}

pub struct ScenarioAisProvider {
    config: ScenarioConfig,
}

impl ScenarioAisProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AisProvider for ScenarioAisProvider {
    async fn fetch_observations(
        &self,
    ) -> Result<(Vec<PortStatus>, Vec<ChokepointStatus>, Vec<VesselMovement>, Vec<u8>), SourceError>
    {
        let mut rng = self.config.rng(0x61697321);
        let now = self.config.base_time;

        let ports = vec![
            PortStatus {
                port_code: "SGSIN".into(),
                port_name: "Singapore".into(),
                latitude: 1.26,
                longitude: 103.8,
                vessels_waiting: 24 + rng.gen_range(0..4),
                normal_waiting: 10,
                observed_at: now,
            },
            PortStatus {
                port_code: "NLRTM".into(),
                port_name: "Rotterdam".into(),
                latitude: 51.9,
                longitude: 4.4,
                vessels_waiting: 9,
                normal_waiting: 8,
                observed_at: now,
            },
        ];
        let chokepoints = vec![ChokepointStatus {
            name: "Suez Canal".into(),
            latitude: 30.5,
            longitude: 32.3,
            avg_transit_hours: 46.0 + rng.gen_range(0.0..4.0),
            normal_transit_hours: 14.0,
            vessels_waiting: 72,
            observed_at: now,
        }];
        let movements = vec![VesselMovement {
            vessel_id: "IMO9811000".into(),
            vessel_name: "Ever Given".into(),
            current_lat: -34.0,
            current_lon: 22.0,
            // Expected route through the Red Sea: a Cape diversion shows up
            // as a large deviation.
            expected_route: vec![(12.5, 43.3), (20.0, 38.0), (30.5, 32.3)],
            observed_at: now,
        }];

        let body = serde_json::to_vec(&ports).map_err(|e| SourceError::Unavailable {
            source_name: "scenario_ais".into(),
            message: e.to_string(),
        })?;
        Ok((ports, chokepoints, movements, body))
    }
}

pub struct ScenarioFreightProvider {
    config: ScenarioConfig,
}

impl ScenarioFreightProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FreightProvider for ScenarioFreightProvider {
    async fn fetch_rates(&self) -> Result<(Vec<FreightRate>, Vec<u8>), SourceError> {
        let mut rng = self.config.rng(0x66726569);
        let now = self.config.base_time;
        let history: Vec<f64> = (0..30).map(|_| 2000.0 + rng.gen_range(-60.0..60.0)).collect();

        let rates = vec![
            FreightRate {
                route: "shanghai-rotterdam".into(),
                rate_usd_per_feu: 2950.0 + rng.gen_range(-50.0..50.0),
                baseline_usd_per_feu: 2000.0,
                history: history.clone(),
                observed_at: now,
            },
            FreightRate {
                route: "shanghai-losangeles".into(),
                rate_usd_per_feu: 2050.0,
                baseline_usd_per_feu: 2000.0,
                history,
                observed_at: now,
            },
        ];
        let body = serde_json::to_vec(&rates).map_err(|e| SourceError::Unavailable {
            source_name: "scenario_freight".into(),
            message: e.to_string(),
        })?;
        Ok((rates, body))
    }
}

pub struct ScenarioWeatherProvider {
    config: ScenarioConfig,
}

impl ScenarioWeatherProvider {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WeatherProvider for ScenarioWeatherProvider {
    async fn fetch_alerts(&self) -> Result<(Vec<StormAlert>, Vec<u8>), SourceError> {
        let mut rng = self.config.rng(0x77656174);
        let now = self.config.base_time;
        let alerts = vec![StormAlert {
            storm_id: "WP202506".into(),
            name: "Nari".into(),
            category: 3 + rng.gen_range(0..2),
            path_confidence: 0.75,
            latitude: 20.5,
            longitude: 124.0,
            region: "Taiwan Strait".into(),
            observed_at: now,
        }];
        let body = serde_json::to_vec(&alerts).map_err(|e| SourceError::Unavailable {
            source_name: "scenario_weather".into(),
            message: e.to_string(),
        })?;
        Ok((alerts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> ScenarioConfig {
        ScenarioConfig::new(42, Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn same_seed_regenerates_identical_markets() {
        let a = ScenarioMarketProvider::new(config())
            .fetch_markets(10)
            .await
            .unwrap();
        let b = ScenarioMarketProvider::new(config())
            .fetch_markets(10)
            .await
            .unwrap();
        assert_eq!(a.1, b.1, "raw bodies must be byte-identical");
    }

    #[tokio::test]
    async fn different_seed_changes_prices() {
        let a = ScenarioMarketProvider::new(config())
            .fetch_markets(10)
            .await
            .unwrap();
        let other = ScenarioConfig::new(43, config().base_time);
        let b = ScenarioMarketProvider::new(other)
            .fetch_markets(10)
            .await
            .unwrap();
        assert_ne!(a.1, b.1);
    }

    #[tokio::test]
    async fn commodity_scenario_contains_energy_spike() {
        let (series, _) = ScenarioCommodityProvider::new(config())
            .fetch_series(10)
            .await
            .unwrap();
        let brent = series.iter().find(|s| s.symbol == "BRENT").unwrap();
        let last = brent.prices.last().unwrap().1;
        assert!(last > 90.0, "scenario ends with a sharp move");
    }
}
