//! Per-side fallback chain over volatility sources.

use crate::config::{InstrumentRegistry, InstrumentSpec};
use crate::error::{ConfigError, SourceError};
use crate::market::traits::VolatilitySource;
use crate::market::types::{IvSnapshot, Side};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Walks an ordered list of [`VolatilitySource`]s until one yields a usable value.
///
/// Data unavailability never escapes as an error: a side where every source
/// failed comes back as an [`IvQuality::Unavailable`](crate::market::IvQuality)
/// snapshot. Only an unknown instrument id is reported as a fault.
pub struct DataAcquirer {
    registry: Arc<InstrumentRegistry>,
    sources: Vec<Box<dyn VolatilitySource>>,
    timeout: Duration,
}

impl DataAcquirer {
    /// `sources` are tried in the given order, highest trust first.
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        sources: Vec<Box<dyn VolatilitySource>>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sources,
            timeout,
        }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Acquire domestic and foreign snapshots for one instrument.
    pub async fn acquire(&self, instrument_id: &str) -> Result<(IvSnapshot, IvSnapshot), ConfigError> {
        let spec = self.registry.require(instrument_id)?;

        let domestic = self.acquire_side(spec, Side::Domestic).await;
        let foreign = self.acquire_side(spec, Side::Foreign).await;

        info!(
            "📡 [ACQUIRE] {} | domestic {} ({}) | foreign {} ({})",
            spec.id,
            fmt_value(&domestic),
            domestic.quality,
            fmt_value(&foreign),
            foreign.quality,
        );
        Ok((domestic, foreign))
    }

    async fn acquire_side(&self, spec: &InstrumentSpec, side: Side) -> IvSnapshot {
        for source in &self.sources {
            let attempt = tokio::time::timeout(self.timeout, source.fetch(spec, side)).await;

            let failure = match attempt {
                Ok(Ok(snapshot)) if snapshot.is_usable() => {
                    debug!(
                        instrument = %spec.id,
                        %side,
                        source = source.name(),
                        quality = %snapshot.quality,
                        "Source produced a usable value"
                    );
                    return snapshot;
                }
                Ok(Ok(snapshot)) => SourceError::unavailable(
                    source.name(),
                    format!("unusable value {:?}", snapshot.value),
                ),
                Ok(Err(e)) => e,
                Err(_) => SourceError::Timeout {
                    adapter: source.name(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            debug!(instrument = %spec.id, %side, error = %failure, "Falling through to next source");
        }

        warn!(instrument = %spec.id, %side, "All volatility sources failed");
        IvSnapshot::unavailable(&spec.id, side)
    }
}

fn fmt_value(snapshot: &IvSnapshot) -> String {
    snapshot
        .value
        .map(|v| format!("{:.2}%", v))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_instruments;
    use crate::market::traits::MockVolatilitySource;
    use crate::market::types::IvQuality;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn registry() -> Arc<InstrumentRegistry> {
        Arc::new(InstrumentRegistry::new(default_instruments()).unwrap())
    }

    fn failing(name: &'static str) -> MockVolatilitySource {
        let mut mock = MockVolatilitySource::new();
        mock.expect_name().return_const(name);
        mock.expect_fetch()
            .returning(move |_, _| Err(SourceError::unavailable(name, "down")));
        mock
    }

    fn returning(name: &'static str, value: Decimal, quality: IvQuality) -> MockVolatilitySource {
        let mut mock = MockVolatilitySource::new();
        mock.expect_name().return_const(name);
        mock.expect_fetch()
            .returning(move |spec, side| Ok(IvSnapshot::new(&spec.id, side, value, quality, name)));
        mock
    }

    struct SlowSource;

    #[async_trait]
    impl VolatilitySource for SlowSource {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn fetch(&self, spec: &InstrumentSpec, side: Side) -> Result<IvSnapshot, SourceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(IvSnapshot::new(&spec.id, side, dec!(99), IvQuality::Web, "slow"))
        }
    }

    #[tokio::test]
    async fn test_first_usable_source_wins() {
        let mut never_called = MockVolatilitySource::new();
        never_called.expect_name().return_const("hv");
        never_called.expect_fetch().never();

        let acquirer = DataAcquirer::new(
            registry(),
            vec![
                Box::new(returning("web", dec!(25.5), IvQuality::Web)),
                Box::new(never_called),
            ],
            Duration::from_secs(1),
        );

        let (domestic, foreign) = acquirer.acquire("copper").await.unwrap();
        assert_eq!(domestic.value, Some(dec!(25.5)));
        assert_eq!(domestic.side, Side::Domestic);
        assert_eq!(foreign.quality, IvQuality::Web);
        assert_eq!(foreign.side, Side::Foreign);
    }

    #[tokio::test]
    async fn test_falls_back_to_historical() {
        let acquirer = DataAcquirer::new(
            registry(),
            vec![
                Box::new(failing("web")),
                Box::new(failing("api")),
                Box::new(returning("hv", dec!(19.2), IvQuality::HistoricalVol)),
            ],
            Duration::from_secs(1),
        );

        let (domestic, foreign) = acquirer.acquire("gold").await.unwrap();
        assert_eq!(domestic.quality, IvQuality::HistoricalVol);
        assert_eq!(domestic.source, "hv");
        assert_eq!(foreign.value, Some(dec!(19.2)));
    }

    #[tokio::test]
    async fn test_unusable_value_falls_through() {
        let acquirer = DataAcquirer::new(
            registry(),
            vec![
                Box::new(returning("web", Decimal::ZERO, IvQuality::Web)),
                Box::new(returning("api", dec!(30), IvQuality::Web)),
            ],
            Duration::from_secs(1),
        );

        let (domestic, _) = acquirer.acquire("silver").await.unwrap();
        assert_eq!(domestic.source, "api");
    }

    #[tokio::test]
    async fn test_all_sources_fail_yields_unavailable() {
        let acquirer = DataAcquirer::new(
            registry(),
            vec![Box::new(failing("web")), Box::new(failing("hv"))],
            Duration::from_secs(1),
        );

        let (domestic, foreign) = acquirer.acquire("crude_oil").await.unwrap();
        assert_eq!(domestic.quality, IvQuality::Unavailable);
        assert_eq!(domestic.value, None);
        assert_eq!(foreign.quality, IvQuality::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_treated_as_failure() {
        let acquirer = DataAcquirer::new(
            registry(),
            vec![
                Box::new(SlowSource),
                Box::new(returning("hv", dec!(21), IvQuality::HistoricalVol)),
            ],
            Duration::from_secs(2),
        );

        let (domestic, foreign) = acquirer.acquire("copper").await.unwrap();
        assert_eq!(domestic.source, "hv");
        assert_eq!(foreign.source, "hv");
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_fault() {
        let acquirer = DataAcquirer::new(registry(), vec![], Duration::from_secs(1));
        assert!(matches!(
            acquirer.acquire("platinum").await,
            Err(ConfigError::UnknownInstrument(_))
        ));
    }
}
