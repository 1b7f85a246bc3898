//! Per-trace expiration bookkeeping
//!
//! A trace is created with a base deadline. Every later append runs the
//! reentrant strategies in order; every scan runs the predicate strategies
//! and then checks the deadline. Strategies only touch [`Runtime`] fields.

use tokio::time::Instant;

use crate::core::config::RuntimeConfig;

#[derive(Debug, Clone)]
pub struct Runtime {
    /// When the trace was first seen; never changes
    pub first_expiration: Instant,
    pub expiration: Instant,
    pub last_update_time: Instant,
    pub reentrant_count: u32,
    pub increase_expiration_count: u32,
}

impl Runtime {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiration
    }

    fn expire_now(&mut self, now: Instant) {
        self.expiration = now;
    }
}

/// Applied, in order, each time a span for an existing trace arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReentrantStrategy {
    /// Push the deadline by the increment, capped at first seen + max duration
    ExtendExpiration,
    RecordReentry,
    RefreshUpdateTime,
    /// Force expiry once the trace holds more spans than allowed
    LimitMaxCount,
}

impl ReentrantStrategy {
    pub fn apply(
        &self,
        config: &RuntimeConfig,
        runtime: &mut Runtime,
        span_count: usize,
        now: Instant,
    ) {
        match self {
            ReentrantStrategy::ExtendExpiration => {
                let cap = runtime.first_expiration + config.max_duration;
                let extended = (runtime.expiration + config.expire_increment).min(cap);
                if extended > runtime.expiration {
                    runtime.expiration = extended;
                    runtime.increase_expiration_count += 1;
                }
            }
            ReentrantStrategy::RecordReentry => {
                runtime.reentrant_count += 1;
            }
            ReentrantStrategy::RefreshUpdateTime => {
                runtime.last_update_time = now;
            }
            ReentrantStrategy::LimitMaxCount => {
                if span_count > config.max_span_count {
                    runtime.expire_now(now);
                }
            }
        }
    }
}

/// Applied, in order, on every scan before the deadline check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateStrategy {
    LimitMaxDuration,
    NoDataDuration,
}

impl PredicateStrategy {
    pub fn apply(&self, config: &RuntimeConfig, runtime: &mut Runtime, now: Instant) {
        match self {
            PredicateStrategy::LimitMaxDuration => {
                if now.saturating_duration_since(runtime.first_expiration) > config.max_duration {
                    runtime.expire_now(now);
                }
            }
            PredicateStrategy::NoDataDuration => {
                if now.saturating_duration_since(runtime.last_update_time)
                    > config.no_data_max_duration
                {
                    runtime.expire_now(now);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStrategies {
    config: RuntimeConfig,
    reentrant: Vec<ReentrantStrategy>,
    predicates: Vec<PredicateStrategy>,
}

impl RuntimeStrategies {
    pub fn new(
        config: RuntimeConfig,
        reentrant: Vec<ReentrantStrategy>,
        predicates: Vec<PredicateStrategy>,
    ) -> Self {
        Self {
            config,
            reentrant,
            predicates,
        }
    }

    /// Extend, record, refresh, then limit; predicates max duration then no data
    pub fn standard(config: RuntimeConfig) -> Self {
        Self::new(
            config,
            vec![
                ReentrantStrategy::ExtendExpiration,
                ReentrantStrategy::RecordReentry,
                ReentrantStrategy::RefreshUpdateTime,
                ReentrantStrategy::LimitMaxCount,
            ],
            vec![
                PredicateStrategy::LimitMaxDuration,
                PredicateStrategy::NoDataDuration,
            ],
        )
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn handle_new(&self, now: Instant) -> Runtime {
        Runtime {
            first_expiration: now,
            expiration: now + self.config.expire_interval,
            last_update_time: now,
            reentrant_count: 0,
            increase_expiration_count: 0,
        }
    }

    pub fn handle_exist(&self, runtime: &mut Runtime, span_count: usize, now: Instant) {
        for strategy in &self.reentrant {
            strategy.apply(&self.config, runtime, span_count, now);
        }
    }

    /// Run the predicates and report whether the trace is now expired
    pub fn predicate(&self, runtime: &mut Runtime, now: Instant) -> bool {
        for strategy in &self.predicates {
            strategy.apply(&self.config, runtime, now);
        }
        runtime.is_expired(now)
    }
}
