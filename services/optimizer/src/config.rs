use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use edgealloc_reconcile::{BackoffPolicy, RetryPolicy};

use crate::db::DbConfig;

/// Cluster-management platform access.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:2474".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// MILP solve bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub time_limit: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(60),
        }
    }
}

/// Scaling transport and retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingConfig {
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub accept_invalid_certs: bool,
    /// Load one cluster instance hosts.
    pub load_per_instance: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_attempts: edgealloc_reconcile::DEFAULT_MAX_ATTEMPTS,
            backoff_base: edgealloc_reconcile::DEFAULT_BACKOFF_BASE,
            backoff_max: edgealloc_reconcile::DEFAULT_BACKOFF_MAX,
            accept_invalid_certs: false,
            load_per_instance: 1.0,
        }
    }
}

impl ScalingConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let backoff = BackoffPolicy {
            base: self.backoff_base,
            max: self.backoff_max,
            ..BackoffPolicy::default()
        };
        Ok(RetryPolicy::new(self.max_attempts, backoff)?)
    }
}

/// Objective weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct CostConfig {
    /// Weight of carbon against energy, in `[0, 1]`.
    pub carbon_weight: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self { carbon_weight: 0.5 }
    }
}

/// How cluster capacity is accounted.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityConfig {
    /// Subtract load of committed devices outside the problem from headroom.
    pub include_committed_baseline: bool,
    /// Headroom multiplier for a single retry after an infeasible problem.
    pub infeasible_relaxation: Option<f64>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            include_committed_baseline: true,
            infeasible_relaxation: None,
        }
    }
}

/// Cycle timing and device eligibility.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub interval: Duration,
    pub max_duration: Duration,
    /// Devices not seen for this long are skipped.
    pub stale_after: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_duration: Duration::from_secs(240),
            stale_after: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database: DbConfig,
    pub platform: PlatformConfig,
    pub solver: SolverConfig,
    pub scaling: ScalingConfig,
    pub cost: CostConfig,
    pub capacity: CapacityConfig,
    pub cycle: CycleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            database: DbConfig::default(),
            platform: PlatformConfig::default(),
            solver: SolverConfig::default(),
            scaling: ScalingConfig::default(),
            cost: CostConfig::default(),
            capacity: CapacityConfig::default(),
            cycle: CycleConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let log_level =
            std::env::var("EDGEALLOC_LOG_LEVEL").unwrap_or_else(|_| defaults.log_level.clone());

        let platform = PlatformConfig {
            base_url: std::env::var("EDGEALLOC_PLATFORM_URL")
                .unwrap_or(defaults.platform.base_url),
            timeout: env_secs("EDGEALLOC_PLATFORM_TIMEOUT_SECS", defaults.platform.timeout)?,
        };

        let solver = SolverConfig {
            time_limit: env_secs("EDGEALLOC_SOLVE_TIME_LIMIT_SECS", defaults.solver.time_limit)?,
        };

        let scaling = ScalingConfig {
            request_timeout: env_secs(
                "EDGEALLOC_SCALE_REQUEST_TIMEOUT_SECS",
                defaults.scaling.request_timeout,
            )?,
            max_attempts: env_or("EDGEALLOC_SCALE_MAX_ATTEMPTS", defaults.scaling.max_attempts)?,
            backoff_base: env_millis(
                "EDGEALLOC_SCALE_BACKOFF_BASE_MS",
                defaults.scaling.backoff_base,
            )?,
            backoff_max: env_millis("EDGEALLOC_SCALE_BACKOFF_MAX_MS", defaults.scaling.backoff_max)?,
            accept_invalid_certs: env_flag(
                "EDGEALLOC_SCALE_ACCEPT_INVALID_CERTS",
                defaults.scaling.accept_invalid_certs,
            ),
            load_per_instance: env_or(
                "EDGEALLOC_LOAD_PER_INSTANCE",
                defaults.scaling.load_per_instance,
            )?,
        };

        let cost = CostConfig {
            carbon_weight: env_or("EDGEALLOC_CARBON_WEIGHT", defaults.cost.carbon_weight)?,
        };

        let capacity = CapacityConfig {
            include_committed_baseline: env_flag(
                "EDGEALLOC_INCLUDE_COMMITTED_BASELINE",
                defaults.capacity.include_committed_baseline,
            ),
            infeasible_relaxation: match std::env::var("EDGEALLOC_INFEASIBLE_RELAXATION") {
                Ok(raw) if !raw.trim().is_empty() => Some(
                    raw.trim()
                        .parse()
                        .with_context(|| format!("invalid EDGEALLOC_INFEASIBLE_RELAXATION: {raw}"))?,
                ),
                _ => None,
            },
        };

        let stale_days: u64 = env_or("EDGEALLOC_STALE_DEVICE_DAYS", 30)?;
        let cycle = CycleConfig {
            interval: env_secs("EDGEALLOC_INTERVAL_SECS", defaults.cycle.interval)?,
            max_duration: env_secs("EDGEALLOC_MAX_CYCLE_SECS", defaults.cycle.max_duration)?,
            stale_after: Duration::from_secs(stale_days * 24 * 3600),
        };

        let config = Self {
            log_level,
            database: DbConfig::from_env(),
            platform,
            solver,
            scaling,
            cost,
            capacity,
            cycle,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the optimizer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cost.carbon_weight) {
            bail!(
                "carbon weight must be within [0, 1], got {}",
                self.cost.carbon_weight
            );
        }
        if let Some(factor) = self.capacity.infeasible_relaxation {
            if !factor.is_finite() || factor <= 1.0 {
                bail!("infeasible relaxation factor must be greater than 1, got {factor}");
            }
        }
        if !self.scaling.load_per_instance.is_finite() || self.scaling.load_per_instance <= 0.0 {
            bail!(
                "load per instance must be positive, got {}",
                self.scaling.load_per_instance
            );
        }
        for (name, value) in [
            ("platform timeout", self.platform.timeout),
            ("solve time limit", self.solver.time_limit),
            ("scale request timeout", self.scaling.request_timeout),
            ("cycle interval", self.cycle.interval),
            ("max cycle duration", self.cycle.max_duration),
        ] {
            if value.is_zero() {
                bail!("{name} must be positive");
            }
        }
        self.scaling.retry_policy()?;
        Ok(())
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_millis() as u64).map(Duration::from_millis)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
