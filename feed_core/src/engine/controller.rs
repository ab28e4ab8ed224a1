//! # Feed Controller
//!
//! One tokio task owns the store, the coalescer, the connection manager and the
//! cover gate; nothing else touches them, so none of them needs a lock. The
//! [`FeedController`] handle talks to that task over a command channel and
//! exposes its state through `watch` receivers.
//!
//! ```text
//!  Connector ──> ConnectionManager ──Detection──> UpdateCoalescer ──release──> FeedStore ──> feed()
//!                       │
//!                       └──Connected/Disconnected──> LifecycleGate ──> gate()
//! ```
//!
//! Teardown (`stop`, `shutdown`, or dropping the handle) drops the pending
//! coalescer payload, cancels the reconnect timer, closes the link and halts
//! the gate, in that order. Running it twice is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::configs::controller_config::ControllerConfig;
use crate::engine::coalescer::UpdateCoalescer;
use crate::engine::feed_store::{FeedSnapshot, FeedStore};
use crate::engine::lifecycle_gate::{GateState, LifecycleGate};
use crate::error::{ConfigError, CorrectionError};
use crate::ingestors::connection::{ConnectionManager, ConnectionSignal, ConnectionState};
use crate::ingestors::link::Connector;
use crate::model::detection::{Detection, PlateCorrection};
use crate::retrieve::vehicles_api::VehiclesApi;

enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Apply(Detection, oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running feed controller.
///
/// Dropping the handle tears the controller down in the background; use
/// [`FeedController::shutdown`] to wait for it.
pub struct FeedController {
    commands: mpsc::UnboundedSender<Command>,
    feed: watch::Receiver<FeedSnapshot>,
    gate: watch::Receiver<GateState>,
    connection: watch::Receiver<ConnectionState>,
    api: Option<Arc<VehiclesApi>>,
    task: JoinHandle<()>,
}

impl FeedController {
    /// Validates `config` and spawns the controller task on the current tokio
    /// runtime. Nothing is dialled until [`FeedController::start`].
    pub fn spawn(config: ControllerConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        config.validate()?;

        let api = match &config.api_url {
            Some(url) => {
                let api = VehiclesApi::new(url, &config.http).map_err(|e| ConfigError::Invalid {
                    field: "api_url",
                    reason: format!("{e:#}"),
                })?;
                Some(Arc::new(api))
            }
            None => None,
        };

        let store = FeedStore::new(config.capacity);
        let coalescer = UpdateCoalescer::new(Duration::from_millis(config.coalesce_window_ms));
        let connection = ConnectionManager::new(connector, config.feed_url.clone(), config.reconnect);
        let gate = LifecycleGate::new(config.cover_policy, config.gate);

        let feed = store.subscribe();
        let gate_rx = gate.subscribe();
        let connection_rx = connection.subscribe();

        let actor = FeedActor {
            store,
            coalescer,
            connection,
            gate,
            api: api.clone(),
            seeded: false,
            running: false,
        };
        let (commands, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(actor.run(inbox));

        log::info!(
            "Feed controller ready (feed: {}, capacity: {}, window: {}ms)",
            config.feed_url,
            config.capacity,
            config.coalesce_window_ms
        );

        Ok(Self {
            commands,
            feed,
            gate: gate_rx,
            connection: connection_rx,
            api,
            task,
        })
    }

    /// Spawns a controller that reads the feed over WebSocket.
    #[cfg(feature = "wss")]
    pub fn with_websocket(config: ControllerConfig) -> Result<Self, ConfigError> {
        Self::spawn(config, Arc::new(crate::ingestors::feed_wss::WsConnector::new()))
    }

    /// Seeds the store on the very first call (when an API is configured),
    /// arms the gate and dials the feed. Calling it while running does nothing.
    pub async fn start(&self) {
        self.request(Command::Start).await;
    }

    /// Tears the controller down. It can be started again later.
    pub async fn stop(&self) {
        self.request(Command::Stop).await;
    }

    /// Tears the controller down and waits for its task to finish.
    pub async fn shutdown(self) {
        self.request(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            if e.is_panic() {
                log::error!("Feed controller task panicked: {}", e);
            }
        }
    }

    pub fn feed(&self) -> watch::Receiver<FeedSnapshot> {
        self.feed.clone()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.feed.borrow().clone()
    }

    pub fn gate(&self) -> watch::Receiver<GateState> {
        self.gate.clone()
    }

    pub fn gate_state(&self) -> GateState {
        *self.gate.borrow()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Sends an operator's plate correction to the backend and, once it is
    /// accepted, updates the detection in place (or puts it back at the head
    /// if it was evicted meanwhile). On any error the store is left as it was.
    pub async fn correct_plate(&self, id: &str, raw: &str) -> Result<Detection, CorrectionError> {
        let correction = PlateCorrection::new(raw)?;
        let api = self.api.as_ref().ok_or(CorrectionError::NotConfigured)?;

        // A detection evicted since the operator picked it is still sent; the
        // backend decides whether the id exists.
        let unchanged = self
            .feed
            .borrow()
            .get(id)
            .is_some_and(|current| !correction.changes(current));
        if unchanged {
            return Err(CorrectionError::Unchanged);
        }
        if !correction.matches_plate_format() {
            log::warn!(
                "Plate {} does not match the regional format; submitting anyway",
                correction.plate_text()
            );
        }

        let updated = api.correct_plate(id, &correction).await?;
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Apply(updated.clone(), ack))
            .map_err(|_| CorrectionError::ControllerGone)?;
        done.await.map_err(|_| CorrectionError::ControllerGone)?;
        Ok(updated)
    }

    async fn request(&self, command: fn(oneshot::Sender<()>) -> Command) -> bool {
        let (ack, done) = oneshot::channel();
        if self.commands.send(command(ack)).is_err() {
            log::warn!("Feed controller is no longer running");
            return false;
        }
        done.await.is_ok()
    }
}

struct FeedActor {
    store: FeedStore,
    coalescer: UpdateCoalescer,
    connection: ConnectionManager,
    gate: LifecycleGate,
    api: Option<Arc<VehiclesApi>>,
    seeded: bool,
    running: bool,
}

impl FeedActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        loop {
            let release_at = self.coalescer.deadline();
            let gate_at = self.gate.deadline();

            tokio::select! {
                command = inbox.recv() => match command {
                    Some(Command::Start(ack)) => {
                        self.start().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        self.teardown().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Apply(detection, ack)) => {
                        self.store.insert_or_update(detection);
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(ack)) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                signal = self.connection.next_signal() => self.on_signal(signal),
                _ = sleep_until(release_at.unwrap_or_else(Instant::now)), if release_at.is_some() => {
                    if let Some(detection) = self.coalescer.take_due(Instant::now()) {
                        log::debug!("Releasing detection {}", detection.id);
                        self.store.release(detection);
                    }
                }
                _ = sleep_until(gate_at.unwrap_or_else(Instant::now)), if gate_at.is_some() => {
                    self.gate.on_timer(Instant::now());
                }
            }
        }
        log::debug!("Feed controller task finished");
    }

    async fn start(&mut self) {
        // A connection that gave up is restartable without a stop.
        if self.running && self.connection.is_started() {
            return;
        }
        self.running = true;

        if !self.seeded {
            self.seeded = true;
            if let Some(api) = &self.api {
                match api.recent(self.store.capacity()).await {
                    Ok(batch) => {
                        let kept = self.store.load(batch);
                        log::info!("Seeded feed with {} detections from {}", kept, api.base_url());
                    }
                    Err(e) => log::warn!("Starting with an empty feed: {}", e),
                }
            }
        }

        self.gate.arm(Instant::now());
        self.connection.start();
        log::info!("Feed controller started ({})", self.connection.url());
    }

    async fn teardown(&mut self) {
        if let Some(dropped) = self.coalescer.cancel() {
            log::debug!("Discarded pending detection {} on teardown", dropped.id);
        }
        self.connection.stop().await;
        self.gate.halt();
        if self.running {
            self.running = false;
            log::info!("Feed controller stopped");
        }
    }

    fn on_signal(&mut self, signal: ConnectionSignal) {
        let now = Instant::now();
        match signal {
            ConnectionSignal::Connected => self.gate.on_connected(now),
            ConnectionSignal::Disconnected(_) => self.gate.on_disconnected(now),
            ConnectionSignal::Detection(detection) => {
                self.coalescer.submit(detection, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::controller_config::HttpOptions;
    use crate::engine::lifecycle_gate::GateTimeline;
    use crate::ingestors::backoff::ReconnectPolicy;
    use crate::ingestors::link::ChannelConnector;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn config(capacity: usize) -> ControllerConfig {
        ControllerConfig {
            capacity,
            reconnect: ReconnectPolicy {
                jitter_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn connected(controller: &FeedController) {
        controller
            .connection()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_arrivals_fill_the_store_up_to_capacity() {
        let connector = ChannelConnector::new();
        let peer = connector.accept();
        let controller = FeedController::spawn(config(3), Arc::new(connector.clone())).unwrap();
        controller.start().await;
        connected(&controller).await;

        for id in ["1", "2", "3", "4"] {
            peer.send_detection(&Detection::new(id));
            tokio::time::sleep(ms(600)).await;
        }

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.ids(), vec!["4", "3", "2"]);
        assert_eq!(snapshot.most_recent.unwrap().id, "4");
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_burst_only_stores_its_last_detection() {
        let connector = ChannelConnector::new();
        let peer = connector.accept();
        let controller = FeedController::spawn(config(100), Arc::new(connector.clone())).unwrap();
        controller.start().await;
        connected(&controller).await;

        peer.send_detection(&Detection::new("1"));
        tokio::time::sleep(ms(100)).await;
        peer.send_detection(&Detection::new("2"));
        tokio::time::sleep(ms(1000)).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.ids(), vec!["2"]);
        assert_eq!(snapshot.most_recent.unwrap().id, "2");
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gate_reveals_after_connecting_and_re_covers_on_drop() {
        let connector = ChannelConnector::new();
        let first = connector.accept();
        let _second = connector.accept();
        let controller = FeedController::spawn(config(10), Arc::new(connector.clone())).unwrap();
        assert_eq!(controller.gate_state(), GateState::AwaitingFirstConnection);

        controller.start().await;
        connected(&controller).await;
        assert_eq!(controller.gate_state(), GateState::Revealing);
        tokio::time::sleep(ms(2100)).await;
        assert_eq!(controller.gate_state(), GateState::Ready);

        first.close(None);
        controller
            .gate()
            .wait_for(|s| *s == GateState::Covered)
            .await
            .unwrap();

        // Reconnects after the 2 s base delay and reveals again.
        tokio::time::sleep(ms(2100)).await;
        assert_eq!(controller.connection_state(), ConnectionState::Connected);
        assert_eq!(controller.gate_state(), GateState::Revealing);
        assert_eq!(connector.dial_count(), 2);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn intro_holds_the_cover_even_when_connected() {
        let connector = ChannelConnector::new();
        let _peer = connector.accept();
        let controller = FeedController::spawn(
            ControllerConfig {
                gate: GateTimeline {
                    intro_ms: 4500,
                    reveal_ms: 500,
                },
                ..config(10)
            },
            Arc::new(connector.clone()),
        )
        .unwrap();
        controller.start().await;
        connected(&controller).await;
        assert_eq!(controller.gate_state(), GateState::AwaitingFirstConnection);

        tokio::time::sleep(ms(4600)).await;
        assert_eq!(controller.gate_state(), GateState::Revealing);
        tokio::time::sleep(ms(500)).await;
        assert_eq!(controller.gate_state(), GateState::Ready);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_leaves_nothing_running() {
        let connector = ChannelConnector::new();
        let peer = connector.accept();
        let controller = FeedController::spawn(config(10), Arc::new(connector.clone())).unwrap();
        controller.start().await;
        connected(&controller).await;

        peer.send_detection(&Detection::new("late"));
        tokio::time::sleep(ms(100)).await;
        controller.stop().await;
        controller.stop().await;

        assert!(!peer.is_open());
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(controller.gate_state(), GateState::Covered);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(controller.snapshot().is_empty());
        assert_eq!(connector.dial_count(), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_dials_again() {
        let connector = ChannelConnector::new();
        let _first = connector.accept();
        let _second = connector.accept();
        let controller = FeedController::spawn(config(10), Arc::new(connector.clone())).unwrap();

        controller.start().await;
        connected(&controller).await;
        controller.stop().await;
        controller.start().await;
        connected(&controller).await;
        assert_eq!(connector.dial_count(), 2);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_tears_the_controller_down() {
        let connector = ChannelConnector::new();
        let peer = connector.accept();
        let controller = FeedController::spawn(config(10), Arc::new(connector.clone())).unwrap();
        controller.start().await;
        connected(&controller).await;

        drop(controller);
        tokio::time::sleep(ms(10)).await;
        assert!(!peer.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn corrections_are_checked_before_any_request() {
        let connector = ChannelConnector::new();
        let without_api = FeedController::spawn(config(10), Arc::new(connector.clone())).unwrap();
        assert_eq!(without_api.correct_plate("1", "   ").await, Err(CorrectionError::EmptyPlate));
        assert_eq!(
            without_api.correct_plate("1", "kl11bm2325").await,
            Err(CorrectionError::NotConfigured)
        );

        let peer = connector.accept();
        let with_api = FeedController::spawn(
            ControllerConfig {
                api_url: Some("http://127.0.0.1:9".into()),
                http: HttpOptions {
                    retries: 0,
                    ..Default::default()
                },
                ..config(10)
            },
            Arc::new(connector.clone()),
        )
        .unwrap();
        // Ids outside the feed still go to the backend, which is unreachable here.
        assert!(matches!(
            with_api.correct_plate("missing", "KL11BM2325").await,
            Err(CorrectionError::Request(_))
        ));
        assert!(with_api.snapshot().is_empty());

        // Seeding fails against the closed port; the controller carries on empty.
        with_api.start().await;
        connected(&with_api).await;
        let mut detection = Detection::new("7");
        detection.plate_text = Some("KL11BM2325".into());
        peer.send_detection(&detection);
        tokio::time::sleep(ms(600)).await;
        assert_eq!(
            with_api.correct_plate("7", " kl11bm2325 ").await,
            Err(CorrectionError::Unchanged)
        );

        without_api.shutdown().await;
        with_api.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_recovers_a_connection_that_gave_up() {
        let connector = ChannelConnector::new();
        connector.refuse("down");
        let controller = FeedController::spawn(
            ControllerConfig {
                reconnect: ReconnectPolicy {
                    max_attempts: Some(0),
                    jitter_ms: 0,
                    ..Default::default()
                },
                ..config(10)
            },
            Arc::new(connector.clone()),
        )
        .unwrap();

        controller.start().await;
        tokio::time::sleep(ms(100)).await;
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connector.dial_count(), 1);

        let _peer = connector.accept();
        controller.start().await;
        connected(&controller).await;
        assert_eq!(connector.dial_count(), 2);
        controller.shutdown().await;
    }

    #[test]
    fn spawn_rejects_invalid_configuration() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = runtime.enter();
        let result = FeedController::spawn(config(0), Arc::new(ChannelConnector::new()));
        assert!(matches!(result, Err(ConfigError::Invalid { field: "capacity", .. })));
    }
}
