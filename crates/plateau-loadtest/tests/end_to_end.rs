//! Full runs against an in-process cart stub on a paused clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use plateau_loadtest::{
    BootstrapResponse, CartTarget, Endpoint, LoadTestConfig, LoadTestRunner, PhaseWindow,
    RunReport, StageSpec, TargetError, ThresholdCheckResult, Thresholds,
};

/// Always answers 200 and counts what it sees
#[derive(Default)]
struct OkCart {
    bootstraps: AtomicU64,
    adds: AtomicU64,
    removes: AtomicU64,
}

#[async_trait]
impl CartTarget for OkCart {
    async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError> {
        let n = self.bootstraps.fetch_add(1, Ordering::Relaxed);
        Ok(BootstrapResponse {
            status: 200,
            set_cookie: vec![format!("jwt_token=user-{}; Path=/; HttpOnly", n)],
        })
    }

    async fn cart(&self, endpoint: Endpoint, token: &str, _: u32) -> Result<u16, TargetError> {
        assert!(token.starts_with("user-"));
        match endpoint {
            Endpoint::Add => self.adds.fetch_add(1, Ordering::Relaxed),
            Endpoint::Remove => self.removes.fetch_add(1, Ordering::Relaxed),
        };
        Ok(200)
    }
}

fn plateau_config() -> LoadTestConfig {
    LoadTestConfig {
        name: "plateau smoke".to_string(),
        stages: vec![
            StageSpec::ramp(10.0, 2_000).named("ramp up"),
            StageSpec::ramp(30.0, 2_000).named("plateau"),
        ],
        phases: vec![PhaseWindow::new("plateau", 10.0, 40.0)],
        thresholds: Thresholds {
            p95_ms: Some(100.0),
            max_failure_rate: Some(0.0),
        },
        ..LoadTestConfig::progressive()
    }
}

#[tokio::test(start_paused = true)]
async fn test_plateau_run_against_stub() {
    let cart = Arc::new(OkCart::default());
    let runner = LoadTestRunner::with_target(plateau_config(), cart.clone()).unwrap();

    let snapshot = runner.run().await.unwrap();
    let config = runner.config();
    let report = RunReport::from_snapshot(&snapshot, &config.name, &config.phases, runner.timeline());

    assert_eq!(report.failed_requests, 0);
    assert_eq!(report.failure_rate, Some(0.0));
    assert_eq!(report.peak_vus, 2_000);
    assert_eq!(
        snapshot.phase_total() + snapshot.unphased_requests,
        snapshot.total_requests
    );
    assert_eq!(
        snapshot.total_requests,
        cart.adds.load(Ordering::Relaxed) + cart.removes.load(Ordering::Relaxed)
    );

    // one session per virtual user
    assert_eq!(snapshot.bootstrap_ok, cart.bootstraps.load(Ordering::Relaxed));
    assert_eq!(snapshot.bootstrap_failed, 0);

    // 2000 users, 2 requests every 0.3s
    let plateau = report.phase("plateau").unwrap();
    assert!(plateau.requests > 0);
    let expected = 2_000.0 * 2.0 / 0.3;
    let actual = plateau.requests_per_sec.unwrap();
    assert!(
        (actual - expected).abs() / expected < 0.2,
        "plateau throughput {} not near {}",
        actual,
        expected
    );

    let verdict = ThresholdCheckResult::evaluate(&report, &config.thresholds);
    assert!(verdict.passes, "{}", verdict.render());
}

/// Fails every remove with a 500
struct BrokenRemove;

#[async_trait]
impl CartTarget for BrokenRemove {
    async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError> {
        Ok(BootstrapResponse {
            status: 200,
            set_cookie: vec!["jwt_token=abc123; Path=/; HttpOnly".to_string()],
        })
    }

    async fn cart(&self, endpoint: Endpoint, _: &str, _: u32) -> Result<u16, TargetError> {
        Ok(match endpoint {
            Endpoint::Add => 200,
            Endpoint::Remove => 500,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_checks_fail_thresholds() {
    let config = LoadTestConfig {
        stages: vec![StageSpec::step(3.0, 5)],
        phases: vec![PhaseWindow::new("all", 0.0, 3.0)],
        ..plateau_config()
    };
    let runner = LoadTestRunner::with_target(config, Arc::new(BrokenRemove)).unwrap();

    let snapshot = runner.run().await.unwrap();
    let config = runner.config();
    let report = RunReport::from_snapshot(&snapshot, &config.name, &config.phases, runner.timeline());

    let failure_rate = report.failure_rate.unwrap();
    assert!(failure_rate > 0.4 && failure_rate < 0.6);
    assert!(report.errors.contains_key("status 500"));

    let remove = report
        .checks
        .iter()
        .find(|c| c.name == "remove from cart status 200")
        .unwrap();
    assert_eq!(remove.passes, 0);

    let add = report
        .checks
        .iter()
        .find(|c| c.name == "add to cart status 200")
        .unwrap();
    assert_eq!(add.fails, 0);

    let verdict = ThresholdCheckResult::evaluate(&report, &config.thresholds);
    assert!(!verdict.passes);
}

/// Never hands out a session cookie
struct NoCookie;

#[async_trait]
impl CartTarget for NoCookie {
    async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError> {
        Ok(BootstrapResponse {
            status: 200,
            set_cookie: vec!["theme=dark; Path=/".to_string()],
        })
    }

    async fn cart(&self, _: Endpoint, _: &str, _: u32) -> Result<u16, TargetError> {
        panic!("cart endpoint hit without a session");
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_session_sends_no_cart_requests() {
    let config = LoadTestConfig {
        stages: vec![StageSpec::step(2.0, 3)],
        phases: vec![],
        ..plateau_config()
    };
    let runner = LoadTestRunner::with_target(config, Arc::new(NoCookie)).unwrap();

    let snapshot = runner.run().await.unwrap();
    assert_eq!(snapshot.total_requests, 0);
    assert_eq!(snapshot.bootstrap_ok, 0);
    assert!(snapshot.bootstrap_failed > 3);

    let config = runner.config();
    let report = RunReport::from_snapshot(&snapshot, &config.name, &config.phases, runner.timeline());
    assert!(report.latency.is_none());
    assert!(report.render().contains("no data"));
}
