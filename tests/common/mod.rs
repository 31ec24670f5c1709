// We include this module in multiple integration test crates - so some code
// may not be used in some cases
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latent_worker::dispatcher::{Build, DispatcherEvent, DispatcherHandle};
use latent_worker::shutdown::Shutdown;
use latent_worker::transport::Connection;
use latent_worker::worker::{Driver, LatentWorker, SubstantiationError};
use latent_worker::WorkerConfig;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Start(Build),
    Stop { fast: bool },
}

/// Scriptable in-memory driver. Each call is announced on the event channel
/// before it (optionally) blocks on its gate, so tests can synchronize on
/// the exact moment the controller reached the backend.
pub struct MockDriver {
    start_gate: Option<Arc<Semaphore>>,
    stop_gate: Option<Arc<Semaphore>>,
    start_results: Mutex<VecDeque<anyhow::Result<bool>>>,
    stop_results: Mutex<VecDeque<anyhow::Result<()>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub started_builds: Mutex<Vec<Build>>,
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl MockDriver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DriverEvent>) {
        Self::with_gates(false, false)
    }

    pub fn with_gates(
        gate_start: bool,
        gate_stop: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DriverEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            start_gate: gate_start.then(|| Arc::new(Semaphore::new(0))),
            stop_gate: gate_stop.then(|| Arc::new(Semaphore::new(0))),
            start_results: Mutex::new(VecDeque::new()),
            stop_results: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            started_builds: Mutex::new(Vec::new()),
            events,
        });
        (driver, receiver)
    }

    /// Queue the outcome of the next `start_instance` call. Unqueued calls
    /// succeed with `Ok(true)`.
    pub fn push_start_result(&self, result: anyhow::Result<bool>) {
        self.start_results.lock().push_back(result);
    }

    /// Queue the outcome of the next `stop_instance` call. Unqueued calls
    /// succeed.
    pub fn push_stop_result(&self, result: anyhow::Result<()>) {
        self.stop_results.lock().push_back(result);
    }

    pub fn release_start(&self) {
        self.start_gate
            .as_ref()
            .expect("driver start is not gated")
            .add_permits(1);
    }

    pub fn release_stop(&self) {
        self.stop_gate
            .as_ref()
            .expect("driver stop is not gated")
            .add_permits(1);
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn start_instance(&self, build: &Build) -> anyhow::Result<bool> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.started_builds.lock().push(build.clone());
        let _ = self.events.send(DriverEvent::Start(build.clone()));

        if let Some(gate) = &self.start_gate {
            gate.acquire().await?.forget();
        }
        self.start_results.lock().pop_front().unwrap_or(Ok(true))
    }

    async fn stop_instance(&self, fast: bool) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(DriverEvent::Stop { fast });

        if let Some(gate) = &self.stop_gate {
            gate.acquire().await?.forget();
        }
        self.stop_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// Transport connection that reports its own disconnect back to the worker,
/// the way a real transport delivers a detach after dropping the link.
pub struct MockConnection {
    worker: Mutex<Option<LatentWorker>>,
    pub accepts: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reject_handshake: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            worker: Mutex::new(None),
            accepts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            reject_handshake: AtomicBool::new(false),
        })
    }

    pub fn bind(&self, worker: &LatentWorker) {
        *self.worker.lock() = Some(worker.clone());
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn accept(&self) -> anyhow::Result<()> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        if self.reject_handshake.load(Ordering::SeqCst) {
            anyhow::bail!("handshake rejected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        let worker = self.worker.lock().clone();
        if let Some(worker) = worker {
            worker.detached();
        }
        Ok(())
    }
}

pub struct Harness {
    pub worker: LatentWorker,
    pub driver: Arc<MockDriver>,
    pub driver_events: mpsc::UnboundedReceiver<DriverEvent>,
    pub dispatcher_events: mpsc::UnboundedReceiver<DispatcherEvent>,
    pub shutdown: Shutdown,
}

impl Harness {
    pub fn new(config: WorkerConfig) -> Self {
        let (driver, events) = MockDriver::new();
        Self::with_driver(config, driver, events)
    }

    pub fn gated(config: WorkerConfig, gate_start: bool, gate_stop: bool) -> Self {
        let (driver, events) = MockDriver::with_gates(gate_start, gate_stop);
        Self::with_driver(config, driver, events)
    }

    pub fn with_driver(
        config: WorkerConfig,
        driver: Arc<MockDriver>,
        driver_events: mpsc::UnboundedReceiver<DriverEvent>,
    ) -> Self {
        let (dispatcher, dispatcher_events) = DispatcherHandle::new();
        let shutdown = Shutdown::new();
        let worker = LatentWorker::new(config, driver.clone(), dispatcher, shutdown.clone());
        Self {
            worker,
            driver,
            driver_events,
            dispatcher_events,
            shutdown,
        }
    }

    /// Attach a fresh connection with a clean handshake.
    pub async fn attach(&self) -> Arc<MockConnection> {
        let conn = MockConnection::new();
        conn.bind(&self.worker);
        self.worker
            .attached(conn.clone())
            .await
            .expect("attach failed");
        conn
    }

    pub async fn expect_start(&mut self) -> Build {
        match self.driver_events.recv().await.expect("driver events closed") {
            DriverEvent::Start(build) => build,
            other => panic!("expected start_instance, got {other:?}"),
        }
    }

    pub async fn expect_stop(&mut self) -> bool {
        match self.driver_events.recv().await.expect("driver events closed") {
            DriverEvent::Stop { fast } => fast,
            other => panic!("expected stop_instance, got {other:?}"),
        }
    }

    pub async fn expect_dispatch(&mut self) -> DispatcherEvent {
        self.dispatcher_events
            .recv()
            .await
            .expect("dispatcher events closed")
    }

    /// Receive dispatcher events until the next `MaybeStartBuilds`, returning
    /// everything that arrived before it.
    pub async fn drain_until_maybe_start_builds(&mut self) -> Vec<DispatcherEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.expect_dispatch().await;
            if matches!(event, DispatcherEvent::MaybeStartBuilds { .. }) {
                return seen;
            }
            seen.push(event);
        }
    }
}

pub fn worker_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_owned(),
        password: None,
        build_wait_timeout: 600,
        missing_timeout: Duration::from_secs(3600),
        notify_on_missing: Vec::new(),
    }
}

pub fn build(id: u64) -> Build {
    Build {
        id,
        builder: "builder-a".to_owned(),
    }
}

pub fn spawn_substantiate(
    worker: &LatentWorker,
    build: Build,
) -> JoinHandle<Result<bool, SubstantiationError>> {
    let worker = worker.clone();
    tokio::spawn(async move { worker.substantiate(build).await })
}

/// Drive a full successful substantiation: request, instance start, attach.
pub async fn substantiate_ok(harness: &mut Harness, build: Build) -> Arc<MockConnection> {
    let task = spawn_substantiate(&harness.worker, build.clone());
    let started = harness.expect_start().await;
    assert_eq!(started, build);
    let conn = harness.attach().await;
    assert_eq!(task.await.unwrap(), Ok(true));
    conn
}
