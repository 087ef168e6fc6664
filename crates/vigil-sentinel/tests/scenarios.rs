//! End-to-end scheduler scenarios on virtual time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use vigil_core::{MetricKind, Result, SentinelConf, Subscriber, SubscriberKind};
use vigil_export::{BreakerStatus, CircuitBreaker, ExporterRegistry, MockOutcome, MockTransport};
use vigil_metrics::{
    CpuTicks, DiskCounters, DiskInfo, FileStore, LoadAverage, MetricSampler, MetricsProvider,
    MockProvider, NetCounters, PortState, ProcessInfo, RuntimeMemory, SystemMemory, ThreadInfo,
};
use vigil_sentinel::{SchedulerContext, TaskScheduler};

struct Harness {
    scheduler: TaskScheduler,
    transport: Arc<MockTransport>,
    provider: Arc<MockProvider>,
    breaker: Arc<CircuitBreaker>,
}

fn harness(transport: MockTransport, advance_on_failure: bool) -> Harness {
    harness_with(transport, MockProvider::new(), advance_on_failure)
}

fn harness_with(
    transport: MockTransport,
    provider: MockProvider,
    advance_on_failure: bool,
) -> Harness {
    let transport = Arc::new(transport);
    let provider = Arc::new(provider);
    let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
    let registry = Arc::new(ExporterRegistry::new(transport.clone(), breaker.clone()));
    let sampler = MetricSampler::new(provider.clone());

    let context = SchedulerContext::new("node-e2e", sampler, registry)
        .with_advance_on_failure(advance_on_failure);

    Harness {
        scheduler: TaskScheduler::new(context),
        transport,
        provider,
        breaker,
    }
}

fn http(url: &str) -> Subscriber {
    Subscriber::new(url, SubscriberKind::Http)
}

#[tokio::test(start_paused = true)]
async fn bounded_cpu_job_posts_exactly_twice() {
    let url = "http://collector/monitor";
    let h = harness(MockTransport::new(), false);

    let conf = SentinelConf::new(vec![MetricKind::Cpu], vec![http(url)])
        .with_count(2)
        .with_interval(10);
    h.scheduler.start(&[conf]).unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.requests_to(url).len(), 1);
    assert_eq!(h.scheduler.active_jobs()[0].runs, 1);

    sleep(Duration::from_secs(60)).await;
    let requests = h.transport.requests_to(url);
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.header("Authorization"), None);
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["node"], "node-e2e");
        assert!(body["cpu"]["idle"].is_number());
    }
    assert!(h.scheduler.active_jobs().is_empty());
    assert!(h.scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn job_with_count_three_runs_three_times() {
    let url = "http://collector/monitor";
    let h = harness(MockTransport::new(), false);

    let conf = SentinelConf::new(vec![MetricKind::Process], vec![http(url)])
        .with_count(3)
        .with_interval(5);
    h.scheduler.start(&[conf]).unwrap();

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.requests_to(url).len(), 3);
    assert!(h.scheduler.active_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unbounded_job_never_retires() {
    let url = "http://collector/monitor";
    let h = harness(MockTransport::new(), false);

    let conf = SentinelConf::new(vec![MetricKind::Sys], vec![http(url)]).with_interval(5);
    h.scheduler.start(&[conf]).unwrap();

    sleep(Duration::from_secs(101)).await;
    let jobs = h.scheduler.active_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].max_count, None);
    assert!(jobs[0].runs >= 10);
    assert!(h.transport.requests_to(url).len() >= 10);

    h.scheduler.stop("test finished").await;
    assert!(h.scheduler.active_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shared_failing_destination_is_isolated_per_url() {
    let shared = "http://shared/monitor";
    let only_a = "http://a/monitor";
    let only_b = "http://b/monitor";
    let h = harness(
        MockTransport::new().with_outcome(shared, MockOutcome::Refused),
        false,
    );

    let job_a = SentinelConf::new(vec![MetricKind::Process], vec![http(shared), http(only_a)])
        .with_interval(10);
    let job_b = SentinelConf::new(vec![MetricKind::Process], vec![http(shared), http(only_b)])
        .with_interval(10);
    h.scheduler.start(&[job_a, job_b]).unwrap();

    // Ticks at 0, 10 and 20 bring the combined failure count to the threshold.
    sleep(Duration::from_secs(25)).await;
    assert_eq!(h.breaker.state(shared), BreakerStatus::Open);
    let attempts_when_opened = h.transport.requests_to(shared).len();
    assert!((5..=6).contains(&attempts_when_opened));

    sleep(Duration::from_secs(50)).await;
    assert_eq!(h.transport.requests_to(shared).len(), attempts_when_opened);
    assert_eq!(h.transport.requests_to(only_a).len(), 8);
    assert_eq!(h.transport.requests_to(only_b).len(), 8);

    // Backend recovers; deliveries resume once the cooldown has passed.
    h.transport.set_outcome(shared, MockOutcome::Status(200));
    sleep(Duration::from_secs(30)).await;
    assert!(h.transport.requests_to(shared).len() > attempts_when_opened);
    assert_eq!(h.breaker.failure_count(shared), 0);
    assert_eq!(h.breaker.state(shared), BreakerStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn failed_collection_is_retried_on_next_tick() {
    let fast = "http://fast/monitor";
    let slow = "http://slow/monitor";
    let h = harness(MockTransport::new(), false);
    h.provider.fail(MetricKind::Process);

    let ticker = SentinelConf::new(vec![MetricKind::Sys], vec![http(fast)]).with_interval(2);
    let flaky = SentinelConf::new(vec![MetricKind::Process], vec![http(slow)]).with_interval(10);
    h.scheduler.start(&[ticker, flaky]).unwrap();

    sleep(Duration::from_secs(1)).await;
    assert!(h.transport.requests_to(slow).is_empty());
    h.provider.recover();

    sleep(Duration::from_secs(4)).await;
    assert_eq!(h.transport.requests_to(slow).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_collection_waits_full_interval_when_advancing() {
    let fast = "http://fast/monitor";
    let slow = "http://slow/monitor";
    let h = harness(MockTransport::new(), true);
    h.provider.fail(MetricKind::Process);

    let ticker = SentinelConf::new(vec![MetricKind::Sys], vec![http(fast)]).with_interval(2);
    let flaky = SentinelConf::new(vec![MetricKind::Process], vec![http(slow)]).with_interval(10);
    h.scheduler.start(&[ticker, flaky]).unwrap();

    sleep(Duration::from_secs(1)).await;
    h.provider.recover();

    sleep(Duration::from_secs(4)).await;
    assert!(h.transport.requests_to(slow).is_empty());

    sleep(Duration::from_secs(6)).await;
    assert_eq!(h.transport.requests_to(slow).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn export_in_flight_at_stop_runs_to_completion() {
    let url = "http://slow/monitor";
    let h = harness(
        MockTransport::new().with_outcome(url, MockOutcome::Delayed(Duration::from_secs(10), 503)),
        false,
    );

    let conf = SentinelConf::new(vec![MetricKind::Sys], vec![http(url)]).with_interval(30);
    h.scheduler.start(&[conf]).unwrap();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport.requests_to(url).len(), 1);
    assert_eq!(h.breaker.failure_count(url), 0);

    h.scheduler.stop("test finished").await;
    assert_eq!(h.breaker.failure_count(url), 0);

    // The 503 arrives after the stop and is still recorded
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.breaker.failure_count(url), 1);
    assert_eq!(h.transport.requests_to(url).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn listened_ports_reach_subscribers() {
    let url = "http://collector/monitor";
    let h = harness_with(
        MockTransport::new(),
        MockProvider::new().with_listening(vec![3306, 8080]),
        false,
    );

    let conf = SentinelConf::new(vec![MetricKind::Port], vec![http(url)])
        .with_count(1)
        .with_listened_ports(vec![3306, 6379, 8080]);
    h.scheduler.start(&[conf]).unwrap();
    sleep(Duration::from_secs(1)).await;

    let requests = h.transport.requests_to(url);
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let ports = body["port"].as_array().unwrap();
    assert_eq!(ports.len(), 3);
    assert_eq!(ports[0]["port"], 3306);
    assert_eq!(ports[0]["listening"], true);
    assert_eq!(ports[1]["listening"], false);
    assert_eq!(ports[2]["listening"], true);
}

/// Delegates to a [`MockProvider`] but panics on the first process read
struct PanicsOnce {
    inner: MockProvider,
    panicked: AtomicBool,
}

impl MetricsProvider for PanicsOnce {
    fn cpu_ticks(&self) -> Result<CpuTicks> {
        self.inner.cpu_ticks()
    }
    fn cpu_count(&self) -> Result<usize> {
        self.inner.cpu_count()
    }
    fn disk_counters(&self) -> Result<Vec<DiskCounters>> {
        self.inner.disk_counters()
    }
    fn net_counters(&self) -> Result<Vec<NetCounters>> {
        self.inner.net_counters()
    }
    fn load_average(&self) -> Result<LoadAverage> {
        self.inner.load_average()
    }
    fn system_memory(&self) -> Result<SystemMemory> {
        self.inner.system_memory()
    }
    fn disks(&self) -> Result<Vec<DiskInfo>> {
        self.inner.disks()
    }
    fn file_stores(&self) -> Result<Vec<FileStore>> {
        self.inner.file_stores()
    }
    fn process(&self) -> Result<ProcessInfo> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("process table unreadable");
        }
        self.inner.process()
    }
    fn runtime_memory(&self) -> Result<RuntimeMemory> {
        self.inner.runtime_memory()
    }
    fn threads(&self) -> Result<ThreadInfo> {
        self.inner.threads()
    }
    fn port_states(&self, ports: &[u16]) -> Result<Vec<PortState>> {
        self.inner.port_states(ports)
    }
}

#[tokio::test(start_paused = true)]
async fn job_recovers_after_collection_panics() {
    let url = "http://collector/monitor";
    let transport = Arc::new(MockTransport::new());
    let provider = Arc::new(PanicsOnce {
        inner: MockProvider::new(),
        panicked: AtomicBool::new(false),
    });
    let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
    let registry = Arc::new(ExporterRegistry::new(transport.clone(), breaker));
    let context = SchedulerContext::new("node-e2e", MetricSampler::new(provider), registry);
    let scheduler = TaskScheduler::new(context);

    let conf = SentinelConf::new(vec![MetricKind::Process], vec![http(url)]).with_interval(1);
    scheduler.start(&[conf]).unwrap();

    sleep(Duration::from_millis(500)).await;
    assert!(transport.requests_to(url).is_empty());
    assert!(!scheduler.active_jobs()[0].in_flight);

    sleep(Duration::from_secs(10)).await;
    assert!(transport.requests_to(url).len() >= 9);
    let status = &scheduler.active_jobs()[0];
    assert!(status.runs >= 10);
    assert!(!status.in_flight);
}
