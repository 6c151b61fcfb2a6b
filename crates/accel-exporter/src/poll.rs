//! Poll loop driving the correlation engine

use crate::engine::{CorrelationEngine, CycleReport};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// Waits between cycles
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs engine cycles back to back with a fixed pause in between
pub struct PollLoop<S = TokioSleeper> {
    engine: CorrelationEngine,
    sleeper: S,
    startup_delay: Duration,
    interval: Duration,
    started: bool,
}

impl PollLoop<TokioSleeper> {
    pub fn new(engine: CorrelationEngine) -> Self {
        Self::with_sleeper(engine, TokioSleeper)
    }
}

impl<S: Sleeper> PollLoop<S> {
    /// Create a loop that waits with the given sleeper
    pub fn with_sleeper(engine: CorrelationEngine, sleeper: S) -> Self {
        Self {
            engine,
            sleeper,
            startup_delay: Duration::from_secs(3),
            interval: Duration::from_secs(1),
            started: false,
        }
    }

    /// Pause before the first cycle
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Pause after every cycle
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CorrelationEngine {
        &mut self.engine
    }

    async fn start(&mut self) {
        if !self.started {
            self.started = true;
            if !self.startup_delay.is_zero() {
                info!("Waiting {:?} for the telemetry source to collect samples", self.startup_delay);
                self.sleeper.sleep(self.startup_delay).await;
            }
        }
    }

    async fn step(&mut self) -> Result<CycleReport> {
        let report = self.engine.run_cycle().await?;
        self.sleeper.sleep(self.interval).await;
        Ok(report)
    }

    /// Run exactly `count` cycles
    pub async fn run_cycles(&mut self, count: usize) -> Result<Vec<CycleReport>> {
        self.start().await;
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            reports.push(self.step().await?);
        }
        Ok(reports)
    }

    /// Run cycles until one fails
    pub async fn run(&mut self) -> Result<()> {
        self.start().await;
        info!("Starting poll loop with a {:?} interval", self.interval);
        loop {
            if let Err(e) = self.step().await {
                error!("Poll loop stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Run cycles until one fails or `shutdown` completes
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Poll loop shutting down");
                Ok(())
            }
        }
    }
}
