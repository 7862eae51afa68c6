//! Virtual-user scheduler.
//!
//! The runner realizes the [`Timeline`]: every scheduler tick it evaluates
//! the target concurrency for the elapsed time and spawns or retires
//! virtual users until the active count matches. The active count therefore
//! tracks the timeline within one tick.
//!
//! Retired users (ramp-down, end of run) finish the request they are in and
//! start nothing new. When the timeline is exhausted every user is stopped
//! and joined before the metrics are frozen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::LoadTestConfig;
use crate::error::Result;
use crate::metrics::{LoadTestMetrics, MetricsSnapshot};
use crate::session::Session;
use crate::target::{CartTarget, HttpCartTarget};
use crate::timeline::Timeline;
use crate::workflow::{CartWorkflow, Iteration};

/// One live virtual user
struct VirtualUser {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

/// The set of spawned virtual users
struct VirtualUserPool {
    workflow: Arc<CartWorkflow>,
    active: Vec<VirtualUser>,
    retired: Vec<JoinHandle<u64>>,
    next_id: u64,
}

impl VirtualUserPool {
    fn new(workflow: Arc<CartWorkflow>) -> Self {
        Self {
            workflow,
            active: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
        }
    }

    fn active(&self) -> usize {
        self.active.len()
    }

    /// Spawn or retire users until `target` are active.
    /// The most recently started users are retired first.
    fn scale_to(&mut self, target: usize) {
        while self.active.len() < target {
            let stop = Arc::new(AtomicBool::new(false));
            let handle = tokio::spawn(virtual_user(
                self.next_id,
                self.workflow.clone(),
                stop.clone(),
            ));
            self.next_id += 1;
            self.active.push(VirtualUser { stop, handle });
        }

        while self.active.len() > target {
            if let Some(user) = self.active.pop() {
                user.stop.store(true, Ordering::Relaxed);
                self.retired.push(user.handle);
            }
        }

        self.retired.retain(|handle| !handle.is_finished());
    }

    /// Stop everyone and wait for in-flight requests to finish.
    /// Returns the number of iterations completed by users still tracked.
    async fn shutdown(mut self) -> u64 {
        for user in &self.active {
            user.stop.store(true, Ordering::Relaxed);
        }

        let handles = self
            .active
            .drain(..)
            .map(|user| user.handle)
            .chain(self.retired.drain(..));

        let mut iterations = 0;
        for result in join_all(handles).await {
            match result {
                Ok(n) => iterations += n,
                Err(e) => warn!("Virtual user task failed: {}", e),
            }
        }
        iterations
    }
}

/// Iteration loop of a single virtual user. The session lives and dies here.
async fn virtual_user(id: u64, workflow: Arc<CartWorkflow>, stop: Arc<AtomicBool>) -> u64 {
    let mut session = Session::new();
    let mut completed = 0;

    while !stop.load(Ordering::Relaxed) {
        match workflow.run_iteration(&mut session, &stop).await {
            Iteration::Completed => completed += 1,
            Iteration::SessionFailed => {}
            Iteration::Stopped => break,
        }
    }

    debug!(
        "Virtual user {} stopped after {} iterations ({} bootstrap attempts)",
        id,
        completed,
        session.attempts()
    );
    completed
}

/// Main load test runner
pub struct LoadTestRunner {
    config: LoadTestConfig,
    timeline: Timeline,
    target: Arc<dyn CartTarget>,
    metrics: Arc<LoadTestMetrics>,
}

impl LoadTestRunner {
    /// Runner against the HTTP service named in the config
    pub fn new(config: LoadTestConfig) -> Result<Self> {
        config.validate()?;
        let target = HttpCartTarget::new(
            &config.target_url,
            &config.session_cookie,
            config.request_timeout(),
            config.max_idle_per_host,
            config.insecure_skip_tls_verify,
        )?;
        Self::with_target(config, Arc::new(target))
    }

    /// Runner against any [`CartTarget`]
    pub fn with_target(config: LoadTestConfig, target: Arc<dyn CartTarget>) -> Result<Self> {
        config.validate()?;
        let timeline = config.timeline()?;
        let metrics = Arc::new(LoadTestMetrics::with_phases(
            config.phases.iter().map(|p| p.name.as_str()),
        ));

        Ok(Self {
            config,
            timeline,
            target,
            metrics,
        })
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Live metrics, e.g. for progress reporting while the run is going
    pub fn metrics(&self) -> Arc<LoadTestMetrics> {
        self.metrics.clone()
    }

    /// Run the whole timeline and return the frozen metrics
    pub async fn run(&self) -> Result<MetricsSnapshot> {
        let total = self.timeline.total_duration();
        info!(
            "Starting '{}' against {} for {:.0}s (peak {} VUs, {} stages, {} phases)",
            self.config.name,
            self.config.target_url,
            total.as_secs_f64(),
            self.timeline.peak(),
            self.timeline.stages().len(),
            self.config.phases.len()
        );

        let started = Instant::now();
        self.metrics.mark_started();
        let workflow = Arc::new(CartWorkflow::new(
            &self.config,
            self.target.clone(),
            self.metrics.clone(),
            started,
        )?);

        let mut pool = VirtualUserPool::new(workflow);
        let mut ticker = interval(self.config.scheduler_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current_stage: Option<String> = None;

        loop {
            ticker.tick().await;
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            let stage = self.timeline.stage_name(elapsed).map(str::to_string);
            if stage.is_some() && stage != current_stage {
                info!(
                    "Stage '{}' at {:.1}s",
                    stage.as_deref().unwrap_or_default(),
                    elapsed.as_secs_f64()
                );
            }
            current_stage = stage;

            pool.scale_to(self.timeline.concurrency(elapsed) as usize);
            self.metrics.observe_vus(pool.active());
        }

        info!(
            "Timeline complete, stopping {} virtual users",
            pool.active()
        );
        let iterations = pool.shutdown().await;
        self.metrics.mark_finished();

        let snapshot = self.metrics.snapshot();
        info!(
            "Run finished: {} requests, {} failed, {} iterations by live users",
            snapshot.total_requests, snapshot.failed_requests, iterations
        );
        Ok(snapshot)
    }
}
