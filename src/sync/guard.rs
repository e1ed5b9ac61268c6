//! Circuit breaker on the local record count.
//!
//! A truncated or empty upstream record set would otherwise be diffed into
//! mass deletions. The breaker compares the number of local records with the
//! number of identifiers listed in the production manifest and aborts the
//! run before staging is touched when the drop is too large.

use crate::error::{AppError, Result};
use crate::models::GuardConfig;

/// Thresholds of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Largest tolerated drop, in percent of the live count
    pub max_drop_percent: u8,
    /// Live counts below this only reject an empty record set
    pub min_baseline: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_drop_percent: 20,
            min_baseline: 10,
        }
    }
}

impl From<&GuardConfig> for CircuitBreakerConfig {
    fn from(config: &GuardConfig) -> Self {
        Self {
            max_drop_percent: config.max_drop_percent,
            min_baseline: config.min_baseline,
        }
    }
}

/// Outcome of comparing the local and live counts.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    /// The drop, if any, is within bounds
    Proceed { local: usize, live: usize },
    /// Too few live identifiers to compare against (first sync included)
    BelowBaseline { local: usize, live: usize },
    TooLargeDrop {
        local: usize,
        live: usize,
        drop_percent: f64,
    },
    /// Nothing local while production still holds documents
    EmptyRecordSet { live: usize },
}

impl GuardVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Proceed { .. } | Self::BelowBaseline { .. })
    }
}

/// Drop guard run between `FetchManifest` and `CopyToStaging`.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Compare `local` records against `live` manifest identifiers.
    pub fn check(&self, local: usize, live: usize) -> GuardVerdict {
        match (local, live) {
            (0, 0) => GuardVerdict::BelowBaseline { local, live },
            (0, live) => GuardVerdict::EmptyRecordSet { live },
            (local, live) if live < self.config.min_baseline => {
                GuardVerdict::BelowBaseline { local, live }
            }
            (local, live) => {
                let drop_percent = drop_percent(local, live);
                if drop_percent > f64::from(self.config.max_drop_percent) {
                    GuardVerdict::TooLargeDrop {
                        local,
                        live,
                        drop_percent,
                    }
                } else {
                    GuardVerdict::Proceed { local, live }
                }
            }
        }
    }

    /// Run [`check`](Self::check) and turn an unsafe verdict into an error.
    pub fn validate(&self, local: usize, live: usize) -> Result<()> {
        let verdict = self.check(local, live);
        match verdict {
            GuardVerdict::Proceed { local, live } => {
                log::info!("Drop guard passed: {} local, {} live", local, live);
                Ok(())
            }
            GuardVerdict::BelowBaseline { local, live } => {
                log::info!(
                    "Drop guard skipped: {} live below baseline {} ({} local)",
                    live,
                    self.config.min_baseline,
                    local
                );
                Ok(())
            }
            GuardVerdict::TooLargeDrop {
                local,
                live,
                drop_percent,
            } => {
                log::error!(
                    "Drop guard tripped: {} live -> {} local ({:.1}% drop, limit {}%)",
                    live,
                    local,
                    drop_percent,
                    self.config.max_drop_percent
                );
                Err(AppError::CircuitBreakerTriggered {
                    current_count: local,
                    previous_count: live,
                    drop_percent,
                    threshold_percent: self.config.max_drop_percent,
                })
            }
            GuardVerdict::EmptyRecordSet { live } => {
                log::error!("Drop guard tripped: no local records, {} live", live);
                Err(AppError::EmptyRecordSet {
                    previous_count: live,
                })
            }
        }
    }
}

/// Percentage of `live` missing from `local`; growth counts as zero.
fn drop_percent(local: usize, live: usize) -> f64 {
    if live == 0 || local >= live {
        return 0.0;
    }
    (live - local) as f64 * 100.0 / live as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sync_always_passes() {
        let guard = CircuitBreaker::new();
        assert!(guard.check(0, 0).is_safe());
        assert!(guard.check(5000, 0).is_safe());
    }

    #[test]
    fn test_drop_within_limit() {
        let guard = CircuitBreaker::new();
        assert_eq!(
            guard.check(80, 100),
            GuardVerdict::Proceed {
                local: 80,
                live: 100
            }
        );
    }

    #[test]
    fn test_drop_over_limit() {
        let guard = CircuitBreaker::new();
        match guard.check(79, 100) {
            GuardVerdict::TooLargeDrop { drop_percent, .. } => {
                assert!((drop_percent - 21.0).abs() < f64::EPSILON)
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_growth_passes() {
        let guard = CircuitBreaker::new();
        assert!(guard.check(400, 100).is_safe());
    }

    #[test]
    fn test_small_production_only_rejects_empty_set() {
        let guard = CircuitBreaker::new();
        assert!(guard.check(1, 9).is_safe());
        assert_eq!(guard.check(0, 9), GuardVerdict::EmptyRecordSet { live: 9 });
    }

    #[test]
    fn test_validate_maps_verdicts_to_errors() {
        let guard = CircuitBreaker::with_config(CircuitBreakerConfig {
            max_drop_percent: 50,
            min_baseline: 2,
        });

        assert!(guard.validate(60, 100).is_ok());
        assert!(matches!(
            guard.validate(40, 100),
            Err(AppError::CircuitBreakerTriggered {
                current_count: 40,
                previous_count: 100,
                threshold_percent: 50,
                ..
            })
        ));
        assert!(matches!(
            guard.validate(0, 100),
            Err(AppError::EmptyRecordSet { previous_count: 100 })
        ));
    }

    #[test]
    fn test_config_from_guard_section() {
        let section = GuardConfig {
            enabled: true,
            max_drop_percent: 35,
            min_baseline: 3,
        };
        let config = CircuitBreakerConfig::from(&section);
        assert_eq!(config.max_drop_percent, 35);
        assert_eq!(config.min_baseline, 3);
    }
}
