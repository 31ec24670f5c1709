use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::{register_counter, register_gauge, Counter, Gauge};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{generate_password, WorkerConfig};
use crate::dispatcher::{Build, DispatcherHandle};
use crate::shutdown::Shutdown;
use crate::transport::Connection;
use crate::utils::spawn_log_err;
use crate::worker::driver::Driver;
use crate::worker::error::{AttachError, SubstantiationError};
use crate::worker::notifier::{Notifier, Waiter};
use crate::worker::timer::OneshotTimer;

static SUBSTANTIATIONS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "latent_worker_substantiations",
        "Substantiation attempts initiated"
    )
    .unwrap()
});

static SUBSTANTIATION_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "latent_worker_substantiation_failures",
        "Substantiation attempts that failed"
    )
    .unwrap()
});

static SUBSTANTIATED_WORKERS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "latent_worker_substantiated",
        "Workers currently substantiated"
    )
    .unwrap()
});

/// Lifecycle state of a latent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No remote instance exists.
    NotSubstantiated,

    /// `start_instance` was initiated. The substantiation notifier is fired
    /// immediately after the transition out of this state.
    Substantiating,

    /// The instance is available for dispatch. The connection may still be
    /// absent for a short while if the link dropped silently.
    Substantiated,

    /// `stop_instance` is running; the insubstantiation notifier may be
    /// waited on.
    Insubstantiating,

    /// Tear-down is in progress with a substantiation queued behind it; the
    /// queued substantiation starts as soon as the tear-down completes. The
    /// opposite ordering is not queued: an insubstantiation arriving during
    /// a substantiation cancels it instead.
    InsubstantiatingSubstantiating,
}

/// Point-in-time diagnostic snapshot of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: State,
    pub connected: bool,
    pub pending_build: Option<Build>,
    pub registered_builders: usize,
    pub busy_builders: usize,
    pub build_wait_timer_armed: bool,
    pub missing_timer_armed: bool,
}

type SubstantiationResult = Result<bool, SubstantiationError>;

struct Inner {
    state: State,
    conn: Option<Arc<dyn Connection>>,
    pending_build: Option<Build>,
    subst_notifier: Notifier<SubstantiationResult>,
    insubst_notifier: Notifier<()>,
    build_wait_timer: Option<OneshotTimer>,
    missing_timer: Option<OneshotTimer>,
    busy_builders: HashSet<String>,
    builders: HashSet<String>,
    registered: bool,
    timer_seq: u64,
}

impl Inner {
    fn clear_build_wait_timer(&mut self) {
        if let Some(timer) = self.build_wait_timer.take() {
            timer.cancel();
        }
    }

    fn clear_missing_timer(&mut self) {
        if let Some(timer) = self.missing_timer.take() {
            timer.cancel();
        }
    }

    fn next_timer_id(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }
}

struct Shared {
    config: WorkerConfig,
    password: String,
    driver: Arc<dyn Driver>,
    dispatcher: DispatcherHandle,
    shutdown: Shutdown,
    inner: Mutex<Inner>,
}

/// Per-worker lifecycle controller for an on-demand (latent) worker.
///
/// On a build request it asks the [`Driver`] to provision a remote instance,
/// waits for the instance to connect back through the transport, keeps it
/// alive across successive builds and tears it down when idle or when the
/// enclosing service stops.
///
/// The handling is more involved than it may look. At minimum the controller
/// has to stay consistent under:
///
///   - non-silent disconnects that produce a `detached` call at any time,
///   - silent link failures where no `detached` ever arrives and the stored
///     connection is stale,
///   - workers with a negative `build_wait_timeout` that stay connected
///     across the controller's own tear-down/start cycles.
///
/// Hence the connection handle is tracked separately from the intended
/// lifecycle state.
///
/// Every method mutates state only while holding the internal lock and
/// releases it across each suspension point (`start_instance`,
/// `stop_instance`, the attach handshake, notifier waits, timer sleeps),
/// re-checking the state after every resumption.
#[derive(Clone)]
pub struct LatentWorker {
    shared: Arc<Shared>,
}

impl LatentWorker {
    pub fn new(
        config: WorkerConfig,
        driver: Arc<dyn Driver>,
        dispatcher: DispatcherHandle,
        shutdown: Shutdown,
    ) -> Self {
        let password = config.password.clone().unwrap_or_else(generate_password);
        Self {
            shared: Arc::new(Shared {
                config,
                password,
                driver,
                dispatcher,
                shutdown,
                inner: Mutex::new(Inner {
                    state: State::NotSubstantiated,
                    conn: None,
                    pending_build: None,
                    subst_notifier: Notifier::new(),
                    insubst_notifier: Notifier::new(),
                    build_wait_timer: None,
                    missing_timer: None,
                    busy_builders: HashSet::new(),
                    builders: HashSet::new(),
                    registered: true,
                    timer_seq: 0,
                }),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The auth shared secret, generated at construction when not configured.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.shared.password
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    #[must_use]
    pub fn substantiated(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == State::Substantiated && inner.conn.is_some()
    }

    /// False while the worker is disconnected but its builds are not yet
    /// cleaned up.
    #[must_use]
    pub fn can_start_build(&self) -> bool {
        let inner = self.shared.inner.lock();
        !(inner.conn.is_none() && !inner.busy_builders.is_empty())
    }

    /// Register a builder binding for this worker.
    pub fn attach_builder(&self, builder: &str) {
        self.shared.inner.lock().builders.insert(builder.to_owned());
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        let inner = self.shared.inner.lock();
        WorkerStatus {
            state: inner.state,
            connected: inner.conn.is_some(),
            pending_build: inner.pending_build.clone(),
            registered_builders: inner.builders.len(),
            busy_builders: inner.busy_builders.len(),
            build_wait_timer_armed: inner.build_wait_timer.is_some(),
            missing_timer_armed: inner.missing_timer.is_some(),
        }
    }

    /// Make the worker available for `build`, provisioning an instance if
    /// necessary.
    ///
    /// Resolves with `Ok(true)` once the worker is substantiated. All callers
    /// of a single substantiation attempt receive the same outcome. An
    /// insubstantiation arriving in the meantime cancels the attempt and
    /// resolves every caller with [`SubstantiationError::Cancelled`].
    #[instrument(level = "debug", skip_all, fields(worker = %self.shared.config.name, build = build.id))]
    pub async fn substantiate(&self, build: Build) -> SubstantiationResult {
        let waiter = {
            let mut inner = self.shared.inner.lock();

            if inner.state == State::Substantiated && inner.conn.is_some() {
                self.set_build_wait_timer(&mut inner);
                return Ok(true);
            }

            if matches!(
                inner.state,
                State::Substantiating | State::InsubstantiatingSubstantiating
            ) {
                inner.subst_notifier.wait()
            } else {
                info!(worker = self.name(), build = build.id, "substantiating");
                SUBSTANTIATIONS.inc();
                inner.pending_build = Some(build.clone());

                // register the waiter before anything below can fail or fire
                let waiter = inner.subst_notifier.wait();

                if inner.state == State::Substantiated && inner.conn.is_none() {
                    // The connection dropped silently while substantiated.
                    // Tear down to clean up, then substantiate normally.
                    if let Some(notify_cancel) =
                        self.enter_insubstantiation(&mut inner, true)
                    {
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.finish_insubstantiation(false, notify_cancel).await;
                        });
                    }
                } else {
                    debug_assert!(matches!(
                        inner.state,
                        State::NotSubstantiated | State::Insubstantiating
                    ));
                    if inner.state == State::NotSubstantiated {
                        self.transition(&mut inner, State::Substantiating);
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.run_substantiation(build).await;
                        });
                    } else {
                        self.transition(&mut inner, State::InsubstantiatingSubstantiating);
                    }
                }

                // armed last: entering a forced tear-down above clears stale
                // deadlines and must not disarm this attempt's one
                self.start_missing_timer(&mut inner);
                waiter
            }
        };

        match waiter.recv().await {
            Some(result) => result,
            None => Err(SubstantiationError::Cancelled {
                worker: self.name().to_owned(),
            }),
        }
    }

    async fn run_substantiation(&self, build: Build) {
        // If build_wait_timeout is negative we never disconnect the worker
        // ourselves, so an already-attached connection counts as proof and we
        // don't need to wait for a fresh attach to declare substantiation.
        let dont_wait_to_attach = {
            let inner = self.shared.inner.lock();
            self.shared.config.build_wait_timeout < 0 && inner.conn.is_some()
        };

        match self.shared.driver.start_instance(&build).await {
            Ok(true) => {
                let mut inner = self.shared.inner.lock();
                if dont_wait_to_attach
                    && inner.state == State::Substantiating
                    && inner.conn.is_some()
                {
                    info!(worker = self.name(), "substantiated (already attached)");
                    inner.clear_missing_timer();
                    self.transition(&mut inner, State::Substantiated);
                    self.fire_substantiation(&mut inner, Ok(true));
                }
            }
            Ok(false) => {
                self.shared.inner.lock().clear_missing_timer();
                self.substantiation_failed(SubstantiationError::FailedToSubstantiate {
                    worker: self.name().to_owned(),
                    reason: "worker does not want to substantiate at this time".to_owned(),
                })
                .await;
            }
            Err(err) => {
                self.shared.inner.lock().clear_missing_timer();
                self.substantiation_failed(SubstantiationError::FailedToSubstantiate {
                    worker: self.name().to_owned(),
                    reason: err.to_string(),
                })
                .await;
            }
        }
    }

    fn fire_substantiation(&self, inner: &mut Inner, result: SubstantiationResult) {
        if !inner.subst_notifier.has_waiters() {
            debug!(worker = self.name(), "no substantiation waiters");
            return;
        }

        match &result {
            Ok(_) => debug!(worker = self.name(), "delivering substantiation success"),
            Err(error) => debug!(worker = self.name(), %error, "delivering substantiation failure"),
        }

        inner.pending_build = None;
        inner.subst_notifier.fire(result);
    }

    async fn substantiation_failed(&self, error: SubstantiationError) {
        SUBSTANTIATION_FAILURES.inc();
        warn!(worker = self.name(), %error, "substantiation failed");

        let (registered, teardown) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == State::Substantiating {
                inner.pending_build = None;
                self.fire_substantiation(&mut inner, Err(error));
            }
            // begin the tear-down before releasing the lock so later events
            // observe the transition
            (
                inner.registered,
                self.enter_insubstantiation(&mut inner, false),
            )
        };

        if let Some(notify_cancel) = teardown {
            let this = self.clone();
            tokio::spawn(async move {
                this.finish_insubstantiation(false, notify_cancel).await;
            });
        }

        // notify people, but only while still registered with the service
        if registered && !self.shared.config.notify_on_missing.is_empty() {
            self.shared.dispatcher.worker_missing(
                self.name(),
                "latent worker never connected",
                self.shared.config.notify_on_missing.clone(),
            );
        }
    }

    /// Accept a connection from the remote worker.
    ///
    /// An unsolicited connection (one arriving while the controller is not
    /// substantiating and `build_wait_timeout` is non-negative) is rejected
    /// and the transport disconnected.
    pub async fn attached(&self, conn: Arc<dyn Connection>) -> Result<(), AttachError> {
        let unsolicited = {
            let inner = self.shared.inner.lock();
            inner.state != State::Substantiating && self.shared.config.build_wait_timeout >= 0
        };
        if unsolicited {
            warn!(
                worker = self.name(),
                "received connection while not substantiating, disconnecting"
            );
            if let Err(error) = conn.disconnect().await {
                warn!(worker = self.name(), ?error, "rejecting the connection failed");
            }
            return Err(AttachError::UnsolicitedConnection {
                worker: self.name().to_owned(),
            });
        }

        if let Err(err) = conn.accept().await {
            let reason = format!("attach handshake failed: {err}");
            self.substantiation_failed(SubstantiationError::FailedToSubstantiate {
                worker: self.name().to_owned(),
                reason,
            })
            .await;
            return Err(AttachError::Handshake {
                worker: self.name().to_owned(),
                source: err,
            });
        }

        let mut inner = self.shared.inner.lock();
        inner.conn = Some(conn);
        inner.clear_missing_timer();
        info!(worker = self.name(), "substantiated");

        // Only change state when actually substantiating. With a negative
        // build_wait_timeout the worker may legitimately attach in other
        // states; with a non-negative one that was rejected above.
        if inner.state == State::Substantiating {
            self.transition(&mut inner, State::Substantiated);
        }
        self.fire_substantiation(&mut inner, Ok(true));
        Ok(())
    }

    /// The transport lost the link to the worker. No state transition; the
    /// next operation or timer reconciles.
    pub fn detached(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.conn.take().is_some() {
            info!(worker = self.name(), "worker connection lost");
        }
    }

    /// A builder binding started running a build on this worker.
    pub fn build_started(&self, builder: &str) {
        let mut inner = self.shared.inner.lock();
        inner.busy_builders.insert(builder.to_owned());
        inner.clear_build_wait_timer();
    }

    /// A builder binding finished its build on this worker.
    pub fn build_finished(&self, builder: &str) {
        {
            let mut inner = self.shared.inner.lock();
            inner.busy_builders.remove(builder);

            if inner.busy_builders.is_empty() {
                match self.shared.config.build_wait_timeout {
                    0 => {
                        // tear down on the next scheduler turn so the current
                        // event finishes first
                        let this = self.clone();
                        spawn_log_err("while insubstantiating after build", async move {
                            this.soft_disconnect(false, false).await
                        });
                    }
                    timeout if timeout > 0 => self.set_build_wait_timer(&mut inner),
                    _ => {}
                }
            }
        }

        // the freed slot may let the dispatcher start the next build
        self.shared.dispatcher.maybe_start_builds(self.name());
    }

    /// Decommission the remote instance.
    ///
    /// An insubstantiation during a substantiation cancels it; callers of the
    /// cancelled attempt get [`SubstantiationError::Cancelled`]. The reverse
    /// is queued: a substantiation requested during a tear-down starts as
    /// soon as the tear-down completes.
    pub async fn insubstantiate(&self, fast: bool) {
        self.insubstantiate_inner(fast, false).await;
    }

    async fn insubstantiate_inner(&self, fast: bool, force_substantiation: bool) {
        enum Entry {
            Wait(Waiter<()>),
            Proceed { notify_cancel: bool },
        }

        let entry = {
            let mut inner = self.shared.inner.lock();
            if inner.state == State::NotSubstantiated {
                return;
            }
            info!(worker = self.name(), "insubstantiating");
            match self.enter_insubstantiation(&mut inner, force_substantiation) {
                Some(notify_cancel) => Entry::Proceed { notify_cancel },
                None => Entry::Wait(inner.insubst_notifier.wait()),
            }
        };

        match entry {
            Entry::Wait(waiter) => {
                let _ = waiter.recv().await;
            }
            Entry::Proceed { notify_cancel } => {
                self.finish_insubstantiation(fast, notify_cancel).await;
            }
        }
    }

    /// Entry phase of a tear-down, performed atomically with the caller's
    /// state inspection. Returns `Some(notify_cancel)` when this call now
    /// owns the `stop_instance` that must follow, `None` when a tear-down is
    /// already running (or nothing is up).
    fn enter_insubstantiation(&self, inner: &mut Inner, force_substantiation: bool) -> Option<bool> {
        match inner.state {
            State::NotSubstantiated | State::Insubstantiating => None,
            State::InsubstantiatingSubstantiating => {
                // cancel the queued substantiation, keep the tear-down going
                self.transition(inner, State::Insubstantiating);
                inner.clear_missing_timer();
                self.fire_substantiation(
                    inner,
                    Err(SubstantiationError::Cancelled {
                        worker: self.name().to_owned(),
                    }),
                );
                None
            }
            State::Substantiating | State::Substantiated => {
                let notify_cancel = inner.state == State::Substantiating;
                if force_substantiation {
                    self.transition(inner, State::InsubstantiatingSubstantiating);
                } else {
                    self.transition(inner, State::Insubstantiating);
                }
                inner.clear_build_wait_timer();
                // a deadline left over from the cancelled attempt must not
                // fire against the tear-down or a later queued attempt
                inner.clear_missing_timer();
                Some(notify_cancel)
            }
        }
    }

    fn finish_insubstantiation(
        &self,
        fast: bool,
        notify_cancel: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Err(error) = self.shared.driver.stop_instance(fast).await {
                // A failed stop leaves a possibly-costing resource behind and
                // there is nothing generic to do about it here; tear-down
                // reliability is the driver's problem.
                error!(worker = self.name(), ?error, "stop_instance failed while insubstantiating");
            }

            let chained_build = {
                let mut inner = self.shared.inner.lock();
                debug_assert!(matches!(
                    inner.state,
                    State::Insubstantiating | State::InsubstantiatingSubstantiating
                ));

                // If the worker already attached in the meantime the notifier was
                // fired there and has no waiters left.
                if notify_cancel && inner.subst_notifier.has_waiters() {
                    self.fire_substantiation(
                        &mut inner,
                        Err(SubstantiationError::Cancelled {
                            worker: self.name().to_owned(),
                        }),
                    );
                }

                match inner.state {
                    State::InsubstantiatingSubstantiating => match inner.pending_build.clone() {
                        Some(build) => {
                            self.transition(&mut inner, State::Substantiating);
                            inner.insubst_notifier.fire(());
                            Some(build)
                        }
                        None => {
                            // the queued request was cancelled while we stopped
                            warn!(worker = self.name(), "no pending build after tear-down");
                            self.settle_not_substantiated(&mut inner);
                            None
                        }
                    },
                    State::Insubstantiating => {
                        self.settle_not_substantiated(&mut inner);
                        None
                    }
                    _ => None,
                }
            };

            if let Some(build) = chained_build {
                let this = self.clone();
                tokio::spawn(async move {
                    this.run_substantiation(build).await;
                });
            }

            self.shared.dispatcher.maybe_start_builds(self.name());
        })
    }

    /// Final transition of a completed tear-down. A missing timer armed by a
    /// substantiation that was cancelled mid-flight would otherwise fire
    /// against a torn-down worker.
    fn settle_not_substantiated(&self, inner: &mut Inner) {
        self.transition(inner, State::NotSubstantiated);
        inner.pending_build = None;
        inner.clear_missing_timer();
        inner.clear_build_wait_timer();
        inner.insubst_notifier.fire(());
    }

    /// Gracefully wind the worker down: wait for running builds, let an
    /// in-flight substantiation settle, then disconnect and insubstantiate.
    async fn soft_disconnect(&self, fast: bool, stopping_service: bool) -> anyhow::Result<()> {
        enum Plan {
            Busy,
            DisconnectOnly(Option<Arc<dyn Connection>>),
            TearDown(Option<Waiter<SubstantiationResult>>),
        }

        let plan = {
            let mut inner = self.shared.inner.lock();
            if !inner.busy_builders.is_empty() {
                // wait until the builds finish; build_finished reconciles
                Plan::Busy
            } else if !stopping_service && self.shared.config.build_wait_timeout < 0 {
                // a negative build_wait_timeout means the worker is never
                // shut down by us, so just drop the link
                Plan::DisconnectOnly(inner.conn.clone())
            } else {
                inner.clear_missing_timer();

                // If the service is stopping the worker manager won't accept
                // new connections and a pending substantiation can never
                // settle cleanly, so only wait for it while still running.
                let waiter = if inner.subst_notifier.has_waiters()
                    && !self.shared.shutdown.is_shutting_down()
                {
                    info!(
                        worker = self.name(),
                        "substantiation in flight, letting it settle before tear-down"
                    );
                    Some(inner.subst_notifier.wait())
                } else {
                    None
                };
                Plan::TearDown(waiter)
            }
        };

        match plan {
            Plan::Busy => Ok(()),
            Plan::DisconnectOnly(conn) => {
                if let Some(conn) = conn {
                    conn.disconnect().await?;
                }
                Ok(())
            }
            Plan::TearDown(waiter) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.recv().await;
                    debug!(worker = self.name(), "substantiation settled, tearing down");
                }

                let conn = self.shared.inner.lock().conn.clone();
                let disconnect = async {
                    match conn {
                        Some(conn) => conn.disconnect().await,
                        None => Ok(()),
                    }
                };
                let insubstantiate = async {
                    self.insubstantiate_inner(fast, false).await;
                    Ok::<_, anyhow::Error>(())
                };
                tokio::try_join!(disconnect, insubstantiate)?;
                Ok(())
            }
        }
    }

    /// Quiesce the worker, then report it gone to the dispatcher. The worker
    /// will not come back without a reconfiguration.
    ///
    /// The worker-gone notification is emitted only after the soft disconnect
    /// has fully completed.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.soft_disconnect(false, false).await?;
        self.shared.dispatcher.worker_gone(self.name());
        Ok(())
    }

    /// Tear the controller down because the enclosing service stops.
    ///
    /// Waits out an in-flight tear-down, soft-disconnects anything still up
    /// and clears all timers. Afterwards the controller no longer emits
    /// worker-missing notifications.
    #[instrument(level = "debug", skip_all, fields(worker = %self.shared.config.name))]
    pub async fn stop_service(&self) -> anyhow::Result<()> {
        // the worker might be insubstantiating because of a build-wait timeout
        let waiter = {
            let mut inner = self.shared.inner.lock();
            matches!(
                inner.state,
                State::Insubstantiating | State::InsubstantiatingSubstantiating
            )
            .then(|| inner.insubst_notifier.wait())
        };
        if let Some(waiter) = waiter {
            let _ = waiter.recv().await;
        }

        let needs_soft_disconnect = {
            let inner = self.shared.inner.lock();
            inner.conn.is_some()
                || matches!(inner.state, State::Substantiating | State::Substantiated)
        };
        if needs_soft_disconnect {
            self.soft_disconnect(false, true).await?;
        }

        let mut inner = self.shared.inner.lock();
        inner.clear_build_wait_timer();
        inner.registered = false;
        Ok(())
    }

    fn transition(&self, inner: &mut Inner, new: State) {
        let old = inner.state;
        if old == new {
            return;
        }
        debug!(worker = self.name(), from = ?old, to = ?new, "state transition");
        if old == State::Substantiated {
            SUBSTANTIATED_WORKERS.dec();
        }
        if new == State::Substantiated {
            SUBSTANTIATED_WORKERS.inc();
        }
        inner.state = new;
    }

    fn set_build_wait_timer(&self, inner: &mut Inner) {
        inner.clear_build_wait_timer();
        let timeout = self.shared.config.build_wait_timeout;
        if timeout <= 0 {
            return;
        }

        let id = inner.next_timer_id();
        let this = self.clone();
        inner.build_wait_timer = Some(OneshotTimer::spawn(
            id,
            Duration::from_secs(timeout.unsigned_abs()),
            async move {
                this.build_wait_timer_fired(id).await;
            },
        ));
    }

    async fn build_wait_timer_fired(&self, id: u64) {
        {
            let mut inner = self.shared.inner.lock();
            let armed = inner.build_wait_timer.as_ref().map(OneshotTimer::id);
            if armed != Some(id) {
                // a stale firing that lost the race against cancel
                return;
            }
            inner.build_wait_timer = None;
        }

        debug!(worker = self.name(), "idle for too long, shutting the instance down");
        if let Err(error) = self.soft_disconnect(false, false).await {
            error!(worker = self.name(), ?error, "idle tear-down failed");
        }
    }

    fn start_missing_timer(&self, inner: &mut Inner) {
        inner.clear_missing_timer();
        let timeout = self.shared.config.missing_timeout;
        if timeout.is_zero() {
            return;
        }

        let id = inner.next_timer_id();
        let this = self.clone();
        inner.missing_timer = Some(OneshotTimer::spawn(id, timeout, async move {
            this.missing_timer_fired(id).await;
        }));
    }

    async fn missing_timer_fired(&self, id: u64) {
        {
            let mut inner = self.shared.inner.lock();
            let armed = inner.missing_timer.as_ref().map(OneshotTimer::id);
            if armed != Some(id) {
                return;
            }
            inner.missing_timer = None;
        }

        let timeout = humantime::format_duration(self.shared.config.missing_timeout);
        self.substantiation_failed(SubstantiationError::FailedToSubstantiate {
            worker: self.name().to_owned(),
            reason: format!("worker did not attach within {timeout}"),
        })
        .await;
    }
}
