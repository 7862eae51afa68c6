//! The cart workflow each virtual user repeats.
//!
//! One iteration: make sure the session has a token, think, classify the
//! current phase, add a random item to the cart, think, remove the same
//! item, think. Both requests are recorded globally and, inside a phase
//! window, in that phase. Checks never change control flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::LoadTestConfig;
use crate::error::{ConfigError, SessionError, TargetError};
use crate::metrics::{LoadTestMetrics, RequestOutcome};
use crate::phase::PhaseClassifier;
use crate::session::Session;
use crate::target::{CartTarget, Endpoint};

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Both cart requests were issued
    Completed,
    /// No session token; nothing was sent to the cart endpoints
    SessionFailed,
    /// The virtual user was asked to stop between steps
    Stopped,
}

/// Shared, read-only workflow definition
pub struct CartWorkflow {
    target: Arc<dyn CartTarget>,
    metrics: Arc<LoadTestMetrics>,
    classifier: PhaseClassifier,
    item_ids: Vec<u32>,
    cookie_name: String,
    expected_status: u16,
    request_timeout: Duration,
    think_time: Duration,
    add_check: String,
    remove_check: String,
    /// Scenario start; phases are classified against time since this instant
    started: Instant,
}

impl CartWorkflow {
    pub fn new(
        config: &LoadTestConfig,
        target: Arc<dyn CartTarget>,
        metrics: Arc<LoadTestMetrics>,
        started: Instant,
    ) -> Result<Self, ConfigError> {
        if config.item_ids.is_empty() {
            return Err(ConfigError::NoItems);
        }

        Ok(Self {
            target,
            metrics,
            classifier: config.classifier()?,
            item_ids: config.item_ids.clone(),
            cookie_name: config.session_cookie.clone(),
            expected_status: config.expected_status,
            request_timeout: config.request_timeout(),
            think_time: config.think_time(),
            add_check: Endpoint::Add.check_name(config.expected_status),
            remove_check: Endpoint::Remove.check_name(config.expected_status),
            started,
        })
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Run one iteration for the virtual user owning `session`
    pub async fn run_iteration(&self, session: &mut Session, stop: &AtomicBool) -> Iteration {
        let bootstrapping = !session.acquired();
        let ensured = match timeout(
            self.request_timeout,
            session.ensure(self.target.as_ref(), &self.cookie_name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Bootstrap(TargetError::Timeout)),
        };

        let token = match ensured {
            Ok(token) => {
                if bootstrapping {
                    self.metrics.record_bootstrap(true);
                }
                token
            }
            Err(e) => {
                warn!("Failed to get session token: {}", e);
                self.metrics.record_bootstrap(false);
                if let SessionError::Bootstrap(target_error) = &e {
                    self.metrics.record_error(target_error.kind());
                }
                // back off before the next attempt
                sleep(self.think_time).await;
                return Iteration::SessionFailed;
            }
        };

        if !self.think(stop).await {
            return Iteration::Stopped;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let phase = self.classifier.classify(elapsed);
        let item_id = self.pick_item();

        self.send(Endpoint::Add, token, item_id, phase).await;
        if !self.think(stop).await {
            return Iteration::Stopped;
        }

        self.send(Endpoint::Remove, token, item_id, phase).await;
        self.metrics.record_iteration();
        sleep(self.think_time).await;

        Iteration::Completed
    }

    /// Sleep for the think time; `false` if the user should stop
    async fn think(&self, stop: &AtomicBool) -> bool {
        sleep(self.think_time).await;
        !stop.load(Ordering::Relaxed)
    }

    fn pick_item(&self) -> u32 {
        self.item_ids
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }

    async fn send(&self, endpoint: Endpoint, token: &str, item_id: u32, phase: Option<&str>) {
        let start = Instant::now();
        let result = timeout(self.request_timeout, self.target.cart(endpoint, token, item_id)).await;
        let duration = start.elapsed();

        let success = match result {
            Ok(Ok(status)) if status == self.expected_status => true,
            Ok(Ok(status)) => {
                debug!("{} item {} returned status {}", endpoint, item_id, status);
                self.metrics.record_error(&format!("status {}", status));
                false
            }
            Ok(Err(e)) => {
                debug!("{} item {} failed: {}", endpoint, item_id, e);
                self.metrics.record_error(e.kind());
                false
            }
            Err(_) => {
                debug!("{} item {} timed out after {:?}", endpoint, item_id, duration);
                self.metrics.record_error(TargetError::Timeout.kind());
                false
            }
        };

        self.metrics.record(&RequestOutcome {
            endpoint,
            success,
            duration,
            phase,
        });

        let check = match endpoint {
            Endpoint::Add => &self.add_check,
            Endpoint::Remove => &self.remove_check,
        };
        self.metrics.record_check(check, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseWindow;
    use crate::target::BootstrapResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Stub cart with a configurable status and delay
    struct StubCart {
        cookie: Option<&'static str>,
        status: u16,
        delay: Duration,
        bootstraps: AtomicU32,
        calls: Mutex<Vec<(Endpoint, String, u32)>>,
    }

    impl StubCart {
        fn new(status: u16, delay: Duration) -> Self {
            Self {
                cookie: Some("jwt_token=tok-1; Path=/; HttpOnly"),
                status,
                delay,
                bootstraps: AtomicU32::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CartTarget for StubCart {
        async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError> {
            self.bootstraps.fetch_add(1, Ordering::SeqCst);
            Ok(BootstrapResponse {
                status: 200,
                set_cookie: self.cookie.iter().map(|c| c.to_string()).collect(),
            })
        }

        async fn cart(
            &self,
            endpoint: Endpoint,
            token: &str,
            item_id: u32,
        ) -> Result<u16, TargetError> {
            self.calls.lock().push((endpoint, token.to_string(), item_id));
            sleep(self.delay).await;
            Ok(self.status)
        }
    }

    fn config() -> LoadTestConfig {
        LoadTestConfig {
            phases: vec![PhaseWindow::new("plateau", 0.0, 100.0)],
            item_ids: vec![4],
            ..LoadTestConfig::progressive()
        }
    }

    fn workflow(stub: Arc<StubCart>, metrics: Arc<LoadTestMetrics>) -> CartWorkflow {
        CartWorkflow::new(&config(), stub, metrics, Instant::now()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_adds_then_removes_same_item() {
        let stub = Arc::new(StubCart::new(200, Duration::from_millis(5)));
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        let result = workflow.run_iteration(&mut session, &stop).await;
        assert_eq!(result, Iteration::Completed);

        let calls = stub.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                (Endpoint::Add, "tok-1".to_string(), 4),
                (Endpoint::Remove, "tok-1".to_string(), 4),
            ]
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 0);
        assert_eq!(snapshot.phases["plateau"].count, 2);
        assert_eq!(snapshot.checks["add to cart status 200"].passes, 1);
        assert_eq!(snapshot.checks["remove from cart status 200"].passes, 1);
        assert_eq!(snapshot.bootstrap_ok, 1);
        assert_eq!(snapshot.iterations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reused_across_iterations() {
        let stub = Arc::new(StubCart::new(200, Duration::ZERO));
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        for _ in 0..25 {
            workflow.run_iteration(&mut session, &stop).await;
        }

        assert_eq!(stub.bootstraps.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().total_requests, 50);
        assert_eq!(metrics.snapshot().bootstrap_ok, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_aborts_iteration() {
        let stub = Arc::new(StubCart {
            cookie: Some("session=nope; Path=/"),
            ..StubCart::new(200, Duration::ZERO)
        });
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        assert_eq!(
            workflow.run_iteration(&mut session, &stop).await,
            Iteration::SessionFailed
        );
        assert_eq!(
            workflow.run_iteration(&mut session, &stop).await,
            Iteration::SessionFailed
        );

        assert!(stub.calls.lock().is_empty());
        assert_eq!(stub.bootstraps.load(Ordering::SeqCst), 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.bootstrap_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_fails_check_without_aborting() {
        let stub = Arc::new(StubCart::new(500, Duration::ZERO));
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        let result = workflow.run_iteration(&mut session, &stop).await;
        assert_eq!(result, Iteration::Completed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.checks["add to cart status 200"].fails, 1);
        assert_eq!(snapshot.error_counts["status 500"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_request_recorded_as_failure() {
        let stub = Arc::new(StubCart::new(200, Duration::from_secs(120)));
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        let result = workflow.run_iteration(&mut session, &stop).await;
        assert_eq!(result, Iteration::Completed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.error_counts["timeout"], 2);
        // duration is capped by the 30s request timeout
        assert!(snapshot.latency.max() < 31_000_000);
        assert!(snapshot.latency.min() >= 29_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_skips_remaining_steps() {
        let stub = Arc::new(StubCart::new(200, Duration::ZERO));
        let metrics = Arc::new(LoadTestMetrics::new());
        let workflow = workflow(stub.clone(), metrics.clone());
        let mut session = Session::new();
        let stop = AtomicBool::new(true);

        let result = workflow.run_iteration(&mut session, &stop).await;
        assert_eq!(result, Iteration::Stopped);
        assert!(stub.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_outside_windows_are_unphased() {
        let stub = Arc::new(StubCart::new(200, Duration::ZERO));
        let metrics = Arc::new(LoadTestMetrics::with_phases(["late"]));
        let config = LoadTestConfig {
            phases: vec![PhaseWindow::new("late", 50.0, 60.0)],
            ..LoadTestConfig::progressive()
        };
        let workflow = CartWorkflow::new(&config, stub, metrics.clone(), Instant::now()).unwrap();
        let mut session = Session::new();
        let stop = AtomicBool::new(false);

        workflow.run_iteration(&mut session, &stop).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.unphased_requests, 2);
        assert_eq!(snapshot.phases["late"].count, 0);
    }
}
