//! In-process loopback engine
//!
//! Peer connections created by a [`LoopbackEngine`] are paired with
//! [`LoopbackEngine::connect`]. A channel created on one side is announced
//! to the other through [`PeerConnectionObserver::on_data_channel`], then
//! both ends open. Everything a channel or connection reports to its
//! observer is delivered from one serial signaling task on the engine's
//! runtime, so notifications for a handle arrive in order; messages
//! between paired channels travel through the same task after the
//! configured latency.
//!
//! Notifications raised before a channel's first observer registers are
//! kept and flushed to it, in order, once it does.
//!
//! [`LoopbackDataChannel::standalone`] builds an unpaired channel whose
//! state changes and messages a test injects from any thread.

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::LoopbackConfig;
use crate::engine::{
    DataBuffer, DataChannelInit, DataChannelInterface, DataChannelObserver, DataState, Engine,
    EngineError, EngineResult, LegacyStats, LegacyStatsCallback, PeerConnectionInterface,
    PeerConnectionObserver, PeerConnectionState, RtcStats, StatsCallback, StatsReport,
};

type Job = Box<dyn FnOnce() + Send>;

struct Signal {
    at: Instant,
    job: Job,
}

/// Sending side of the signaling task
#[derive(Clone)]
struct Network {
    signaling: mpsc::UnboundedSender<Signal>,
    latency: Duration,
}

impl Network {
    /// Run `job` on the signaling task, after everything queued before it
    fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        self.send(Duration::ZERO, Box::new(job));
    }

    /// Like [`Network::schedule`], after the one-way latency
    fn deliver(&self, job: impl FnOnce() + Send + 'static) {
        self.send(self.latency, Box::new(job));
    }

    fn send(&self, delay: Duration, job: Job) {
        let signal = Signal {
            at: Instant::now() + delay,
            job,
        };
        if self.signaling.send(signal).is_err() {
            trace!(target: "rtcbridge::loopback", "engine stopped, dropping signal");
        }
    }
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

// ============================================================================
// Engine
// ============================================================================

pub struct LoopbackEngine {
    runtime: Option<Runtime>,
    network: Network,
    peers: Mutex<Vec<Arc<LoopbackPeerConnection>>>,
}

impl LoopbackEngine {
    pub fn new(config: &LoopbackConfig) -> rtcbridge_core::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("rtcbridge-loopback")
            .enable_time()
            .build()?;

        let (signaling, mut signals) = mpsc::unbounded_channel::<Signal>();
        runtime.spawn(async move {
            while let Some(signal) = signals.recv().await {
                tokio::time::sleep_until(signal.at).await;
                (signal.job)();
            }
        });

        debug!(
            target: "rtcbridge::loopback",
            worker_threads = config.worker_threads.max(1),
            latency_ms = config.latency_ms,
            "loopback engine started"
        );
        Ok(Self {
            runtime: Some(runtime),
            network: Network {
                signaling,
                latency: config.latency(),
            },
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Connection `index`, in creation order
    pub fn peer_connection(&self, index: usize) -> Option<Arc<LoopbackPeerConnection>> {
        self.peers.lock().get(index).cloned()
    }

    pub fn peer_connections(&self) -> Vec<Arc<LoopbackPeerConnection>> {
        self.peers.lock().clone()
    }

    /// Pair `a` with `b`
    ///
    /// Both move to `connecting` then `connected`; channels created before
    /// the pairing are announced afterwards. `a` assigns even stream ids,
    /// `b` odd ones.
    pub fn connect(&self, a: &Arc<LoopbackPeerConnection>, b: &Arc<LoopbackPeerConnection>) {
        *a.remote.lock() = Arc::downgrade(b);
        *b.remote.lock() = Arc::downgrade(a);
        a.next_id.store(0, Ordering::Release);
        b.next_id.store(1, Ordering::Release);

        let (a, b) = (a.clone(), b.clone());
        self.network.deliver(move || {
            for state in [PeerConnectionState::Connecting, PeerConnectionState::Connected] {
                a.set_state(state);
                b.set_state(state);
            }
            a.link_pending(&b);
            b.link_pending(&a);
        });
    }
}

impl Engine for LoopbackEngine {
    fn create_peer_connection(
        &self,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> EngineResult<Arc<dyn PeerConnectionInterface>> {
        let connection = Arc::new_cyclic(|this| LoopbackPeerConnection {
            network: self.network.clone(),
            observer,
            this: this.clone(),
            state: Mutex::new(PeerConnectionState::New),
            remote: Mutex::new(Weak::new()),
            channels: Mutex::new(Vec::new()),
            next_id: AtomicU16::new(0),
        });
        self.peers.lock().push(connection.clone());
        Ok(connection)
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

// ============================================================================
// Peer connection
// ============================================================================

pub struct LoopbackPeerConnection {
    network: Network,
    observer: Arc<dyn PeerConnectionObserver>,
    this: Weak<LoopbackPeerConnection>,
    state: Mutex<PeerConnectionState>,
    remote: Mutex<Weak<LoopbackPeerConnection>>,
    channels: Mutex<Vec<Arc<LoopbackDataChannel>>>,
    next_id: AtomicU16,
}

impl LoopbackPeerConnection {
    /// Channels on this side, in creation order
    pub fn channels(&self) -> Vec<Arc<LoopbackDataChannel>> {
        self.channels.lock().clone()
    }

    fn set_state(&self, state: PeerConnectionState) {
        {
            let mut current = self.state.lock();
            if *current == state || *current == PeerConnectionState::Closed {
                return;
            }
            *current = state;
        }
        self.observer.on_connection_state_change(state);
    }

    fn connected_remote(&self) -> Option<Arc<LoopbackPeerConnection>> {
        if *self.state.lock() != PeerConnectionState::Connected {
            return None;
        }
        self.remote.lock().upgrade()
    }

    /// Link every still-pending channel with `remote`
    fn link_pending(&self, remote: &Arc<LoopbackPeerConnection>) {
        for channel in self.channels() {
            if channel.is_pending() {
                self.link(remote, &channel);
            }
        }
    }

    fn link(&self, remote: &Arc<LoopbackPeerConnection>, channel: &Arc<LoopbackDataChannel>) {
        if channel.negotiated() {
            pair_negotiated(remote, channel);
        } else {
            self.announce(remote, channel);
        }
    }

    /// Create the remote end of `local` and open both
    fn announce(&self, remote: &Arc<LoopbackPeerConnection>, local: &Arc<LoopbackDataChannel>) {
        if !local.claim() {
            return;
        }
        let id = local.assign_id(|| self.next_id.fetch_add(2, Ordering::AcqRel));
        let peer = LoopbackDataChannel::new(
            self.network.clone(),
            &local.label,
            DataChannelInit {
                id: Some(id),
                ..local.init.clone()
            },
            Peer::Paired(Arc::downgrade(local)),
        );
        local.pair_with(&peer);
        remote.channels.lock().push(peer.clone());
        trace!(target: "rtcbridge::loopback", label = %local.label, id, "announcing channel");

        remote.observer.on_data_channel(peer.clone());
        local.open();
        peer.open();
    }

    fn collect_stats(&self) -> StatsReport {
        let timestamp = now_millis();
        let channels = self.channels();
        let opened = channels.iter().filter(|c| c.opened.load(Ordering::Acquire)).count();
        let closed = channels.iter().filter(|c| c.state() == DataState::Closed).count();

        let mut stats = vec![RtcStats {
            id: "P".to_string(),
            kind: "peer-connection".to_string(),
            timestamp,
            members: BTreeMap::from([
                ("dataChannelsOpened".to_string(), json!(opened)),
                ("dataChannelsClosed".to_string(), json!(closed)),
            ]),
        }];
        for (index, channel) in channels.iter().enumerate() {
            let counters = &channel.counters;
            stats.push(RtcStats {
                id: format!("D{}", index),
                kind: "data-channel".to_string(),
                timestamp,
                members: BTreeMap::from([
                    ("label".to_string(), json!(channel.label)),
                    ("protocol".to_string(), json!(channel.init.protocol)),
                    ("dataChannelIdentifier".to_string(), json!(channel.id())),
                    ("state".to_string(), json!(channel.state().as_str())),
                    ("messagesSent".to_string(), json!(counters.messages_sent.load(Ordering::Relaxed))),
                    ("bytesSent".to_string(), json!(counters.bytes_sent.load(Ordering::Relaxed))),
                    (
                        "messagesReceived".to_string(),
                        json!(counters.messages_received.load(Ordering::Relaxed)),
                    ),
                    (
                        "bytesReceived".to_string(),
                        json!(counters.bytes_received.load(Ordering::Relaxed)),
                    ),
                ]),
            });
        }
        StatsReport { stats }
    }

    fn collect_legacy_stats(&self) -> Vec<LegacyStats> {
        let timestamp = now_millis();
        self.channels()
            .iter()
            .enumerate()
            .map(|(index, channel)| LegacyStats {
                id: format!("datachannel_{}", index),
                kind: "datachannel".to_string(),
                timestamp,
                values: BTreeMap::from([
                    ("label".to_string(), channel.label.clone()),
                    ("protocol".to_string(), channel.init.protocol.clone()),
                    (
                        "datachannelid".to_string(),
                        channel.id().map(|id| id.to_string()).unwrap_or_else(|| "-1".to_string()),
                    ),
                    ("state".to_string(), channel.state().as_str().to_string()),
                ]),
            })
            .collect()
    }

    fn on_remote_closed(&self) {
        *self.remote.lock() = Weak::new();
        self.set_state(PeerConnectionState::Disconnected);
    }
}

/// Open `local` with the pending negotiated channel of the same id on `remote`, if any
fn pair_negotiated(remote: &Arc<LoopbackPeerConnection>, local: &Arc<LoopbackDataChannel>) {
    let candidate = remote
        .channels()
        .into_iter()
        .find(|c| c.negotiated() && c.id() == local.id() && c.is_pending());
    let Some(peer) = candidate else {
        return;
    };
    if !local.claim() {
        return;
    }
    if !peer.claim() {
        *local.peer.lock() = Peer::Pending;
        return;
    }
    local.pair_with(&peer);
    peer.pair_with(local);
    local.open();
    peer.open();
}

impl PeerConnectionInterface for LoopbackPeerConnection {
    fn create_data_channel(
        &self,
        label: &str,
        init: &DataChannelInit,
    ) -> EngineResult<Arc<dyn DataChannelInterface>> {
        if *self.state.lock() == PeerConnectionState::Closed {
            return Err(EngineError::Closed);
        }
        if init.negotiated && init.id.is_none() {
            return Err(EngineError::InvalidParameter(
                "negotiated channels need an id".to_string(),
            ));
        }
        if init.max_packet_life_time.is_some() && init.max_retransmits.is_some() {
            return Err(EngineError::InvalidParameter(
                "maxPacketLifeTime and maxRetransmits are exclusive".to_string(),
            ));
        }

        let init = DataChannelInit {
            id: if init.negotiated { init.id } else { None },
            ..init.clone()
        };
        let channel = LoopbackDataChannel::new(self.network.clone(), label, init, Peer::Pending);
        self.channels.lock().push(channel.clone());

        if let (Some(this), Some(remote)) = (self.this.upgrade(), self.connected_remote()) {
            let local = channel.clone();
            self.network.deliver(move || this.link(&remote, &local));
        }
        Ok(channel)
    }

    fn get_stats(&self, callback: StatsCallback) {
        let Some(this) = self.this.upgrade() else {
            return callback(Err(EngineError::Closed));
        };
        self.network.schedule(move || callback(Ok(this.collect_stats())));
    }

    fn get_legacy_stats(&self, callback: LegacyStatsCallback) {
        let Some(this) = self.this.upgrade() else {
            return callback(Err(EngineError::Closed));
        };
        self.network.schedule(move || callback(Ok(this.collect_legacy_stats())));
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == PeerConnectionState::Closed {
                return;
            }
            *state = PeerConnectionState::Closed;
        }
        for channel in self.channels() {
            channel.close();
        }
        let remote = mem::take(&mut *self.remote.lock());
        if let Some(remote) = remote.upgrade() {
            self.network.deliver(move || remote.on_remote_closed());
        }
        debug!(target: "rtcbridge::loopback", "peer connection closed");
    }
}

// ============================================================================
// Data channel
// ============================================================================

enum Peer {
    /// Not paired; sends are recorded
    Standalone,
    /// Waiting for the connection to be paired
    Pending,
    /// Remote end being created
    Linking,
    Paired(Weak<LoopbackDataChannel>),
}

enum Notice {
    State(DataState),
    Message(DataBuffer),
    BufferedAmount(u64),
}

#[derive(Default)]
struct Observed {
    observer: Option<Arc<dyn DataChannelObserver>>,
    registered_once: bool,
    backlog: Vec<Notice>,
    flushing: bool,
}

#[derive(Default)]
struct Counters {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
}

pub struct LoopbackDataChannel {
    network: Network,
    this: Weak<LoopbackDataChannel>,
    label: String,
    init: DataChannelInit,
    id: Mutex<Option<u16>>,
    state: Mutex<DataState>,
    opened: AtomicBool,
    peer: Mutex<Peer>,
    observed: Mutex<Observed>,
    buffered: AtomicU64,
    counters: Counters,
    sent: Mutex<Vec<DataBuffer>>,
}

impl LoopbackDataChannel {
    fn new(network: Network, label: &str, init: DataChannelInit, peer: Peer) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            network,
            this: this.clone(),
            label: label.to_string(),
            id: Mutex::new(init.id),
            init,
            state: Mutex::new(DataState::Connecting),
            opened: AtomicBool::new(false),
            peer: Mutex::new(peer),
            observed: Mutex::new(Observed::default()),
            buffered: AtomicU64::new(0),
            counters: Counters::default(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Unpaired channel driven by [`simulate_state`](Self::simulate_state)
    /// and [`simulate_message`](Self::simulate_message)
    pub fn standalone(engine: &LoopbackEngine, label: &str, init: DataChannelInit) -> Arc<Self> {
        Self::new(engine.network.clone(), label, init, Peer::Standalone)
    }

    /// Move to `state` and notify the observer from the calling thread
    pub fn simulate_state(&self, state: DataState) {
        if self.transition(state) {
            self.notify(Notice::State(state));
        }
    }

    /// Deliver `buffer` as if received, from the calling thread
    pub fn simulate_message(&self, buffer: DataBuffer) {
        self.receive(buffer);
    }

    /// Messages sent on a standalone channel, oldest first
    pub fn take_sent(&self) -> Vec<DataBuffer> {
        mem::take(&mut *self.sent.lock())
    }

    pub fn has_observer(&self) -> bool {
        self.observed.lock().observer.is_some()
    }

    fn is_pending(&self) -> bool {
        matches!(*self.peer.lock(), Peer::Pending)
    }

    /// Take a pending channel for linking; false if someone else did
    fn claim(&self) -> bool {
        let mut peer = self.peer.lock();
        if matches!(*peer, Peer::Pending) {
            *peer = Peer::Linking;
            true
        } else {
            false
        }
    }

    fn pair_with(&self, remote: &Arc<LoopbackDataChannel>) {
        *self.peer.lock() = Peer::Paired(Arc::downgrade(remote));
    }

    fn assign_id(&self, next: impl FnOnce() -> u16) -> u16 {
        *self.id.lock().get_or_insert_with(next)
    }

    fn open(&self) {
        if self.transition(DataState::Open) {
            self.opened.store(true, Ordering::Release);
            self.notify(Notice::State(DataState::Open));
        }
    }

    /// Set the state; false when unchanged or already closed
    fn transition(&self, state: DataState) -> bool {
        let mut current = self.state.lock();
        if *current == state || *current == DataState::Closed {
            return false;
        }
        *current = state;
        true
    }

    fn receive(&self, buffer: DataBuffer) {
        if self.state() != DataState::Open {
            return;
        }
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);
        self.notify(Notice::Message(buffer));
    }

    fn notify(&self, notice: Notice) {
        let observer = {
            let mut observed = self.observed.lock();
            match observed.observer.clone() {
                Some(observer) if observed.backlog.is_empty() && !observed.flushing => observer,
                Some(_) => {
                    observed.backlog.push(notice);
                    return;
                }
                None if observed.registered_once => return,
                None => {
                    observed.backlog.push(notice);
                    return;
                }
            }
        };
        deliver(observer.as_ref(), notice);
    }

    /// Deliver the backlog until it stays empty
    fn flush(&self) {
        loop {
            let (observer, batch) = {
                let mut observed = self.observed.lock();
                let observer = match observed.observer.clone() {
                    Some(observer) if !observed.backlog.is_empty() => observer,
                    _ => {
                        observed.flushing = false;
                        return;
                    }
                };
                (observer, mem::take(&mut observed.backlog))
            };
            for notice in batch {
                deliver(observer.as_ref(), notice);
            }
        }
    }

    fn close_now(&self, remote: Option<Arc<LoopbackDataChannel>>) {
        if self.state() == DataState::Closing {
            self.notify(Notice::State(DataState::Closing));
        }
        if self.transition(DataState::Closed) {
            self.notify(Notice::State(DataState::Closed));
        }
        if let Some(remote) = remote {
            *remote.peer.lock() = Peer::Standalone;
            if remote.transition(DataState::Closed) {
                remote.notify(Notice::State(DataState::Closed));
            }
        }
    }
}

fn deliver(observer: &dyn DataChannelObserver, notice: Notice) {
    match notice {
        Notice::State(state) => observer.on_state_change(state),
        Notice::Message(buffer) => observer.on_message(buffer),
        Notice::BufferedAmount(sent) => observer.on_buffered_amount_change(sent),
    }
}

impl DataChannelInterface for LoopbackDataChannel {
    fn register_observer(&self, observer: Arc<dyn DataChannelObserver>) {
        let mut observed = self.observed.lock();
        observed.observer = Some(observer);
        observed.registered_once = true;
        if !observed.backlog.is_empty() && !observed.flushing {
            observed.flushing = true;
            if let Some(this) = self.this.upgrade() {
                self.network.schedule(move || this.flush());
            }
        }
    }

    fn unregister_observer(&self) {
        let mut observed = self.observed.lock();
        observed.observer = None;
        observed.backlog.clear();
        observed.flushing = false;
    }

    fn id(&self) -> Option<u16> {
        *self.id.lock()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn max_packet_life_time(&self) -> Option<u16> {
        self.init.max_packet_life_time
    }

    fn max_retransmits(&self) -> Option<u16> {
        self.init.max_retransmits
    }

    fn negotiated(&self) -> bool {
        self.init.negotiated
    }

    fn ordered(&self) -> bool {
        self.init.ordered
    }

    fn protocol(&self) -> String {
        self.init.protocol.clone()
    }

    fn buffered_amount(&self) -> u64 {
        self.buffered.load(Ordering::Acquire)
    }

    fn state(&self) -> DataState {
        *self.state.lock()
    }

    fn send(&self, buffer: &DataBuffer) -> bool {
        if self.state() != DataState::Open {
            return false;
        }
        let remote = match &*self.peer.lock() {
            Peer::Standalone => None,
            Peer::Paired(remote) => match remote.upgrade() {
                Some(remote) => Some(remote),
                None => return false,
            },
            Peer::Pending | Peer::Linking => return false,
        };

        let size = buffer.len() as u64;
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(size, Ordering::Relaxed);
        let Some(remote) = remote else {
            self.sent.lock().push(buffer.clone());
            return true;
        };

        self.buffered.fetch_add(size, Ordering::AcqRel);
        let this = self.this.clone();
        let buffer = buffer.clone();
        self.network.deliver(move || {
            remote.receive(buffer);
            if let Some(this) = this.upgrade() {
                this.buffered.fetch_sub(size, Ordering::AcqRel);
                this.notify(Notice::BufferedAmount(size));
            }
        });
        true
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, DataState::Closing | DataState::Closed) {
                return;
            }
            *state = DataState::Closing;
        }
        let remote = match mem::replace(&mut *self.peer.lock(), Peer::Standalone) {
            Peer::Paired(remote) => remote.upgrade(),
            _ => None,
        };
        if let Some(this) = self.this.upgrade() {
            self.network.schedule(move || this.close_now(remote));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[derive(Debug, PartialEq)]
    enum Seen {
        State(DataState),
        Message(String),
    }

    struct Recorder(Mutex<std_mpsc::Sender<Seen>>);

    impl DataChannelObserver for Recorder {
        fn on_state_change(&self, state: DataState) {
            let _ = self.0.lock().send(Seen::State(state));
        }

        fn on_message(&self, buffer: DataBuffer) {
            let text = String::from_utf8_lossy(&buffer.data).into_owned();
            let _ = self.0.lock().send(Seen::Message(text));
        }
    }

    fn recorder() -> (Arc<Recorder>, std_mpsc::Receiver<Seen>) {
        let (tx, rx) = std_mpsc::channel();
        (Arc::new(Recorder(Mutex::new(tx))), rx)
    }

    struct Announced(Mutex<std_mpsc::Sender<Arc<dyn DataChannelInterface>>>);

    impl PeerConnectionObserver for Announced {
        fn on_data_channel(&self, channel: Arc<dyn DataChannelInterface>) {
            let _ = self.0.lock().send(channel);
        }

        fn on_connection_state_change(&self, _state: PeerConnectionState) {}
    }

    fn engine() -> LoopbackEngine {
        LoopbackEngine::new(&LoopbackConfig::default()).unwrap()
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_standalone_backlog_flushes_in_order_on_register() {
        let engine = engine();
        let channel = LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        channel.simulate_state(DataState::Open);
        channel.simulate_message(DataBuffer::text("early"));

        let (observer, seen) = recorder();
        channel.register_observer(observer);
        channel.simulate_message(DataBuffer::text("late"));

        assert_eq!(seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Open));
        assert_eq!(seen.recv_timeout(WAIT).unwrap(), Seen::Message("early".into()));
        assert_eq!(seen.recv_timeout(WAIT).unwrap(), Seen::Message("late".into()));
    }

    #[test]
    fn test_standalone_send_records_and_requires_open() {
        let engine = engine();
        let channel = LoopbackDataChannel::standalone(&engine, "chat", DataChannelInit::default());
        assert!(!channel.send(&DataBuffer::text("too soon")));
        channel.simulate_state(DataState::Open);
        assert!(channel.send(&DataBuffer::binary(vec![1u8, 2])));
        assert_eq!(channel.take_sent(), [DataBuffer::binary(vec![1u8, 2])]);
    }

    #[test]
    fn test_paired_channels_announce_open_and_exchange() {
        let engine = engine();
        let (tx_a, _rx_a) = std_mpsc::channel();
        let (tx_b, rx_b) = std_mpsc::channel();
        let a = engine
            .create_peer_connection(Arc::new(Announced(Mutex::new(tx_a))))
            .unwrap();
        engine
            .create_peer_connection(Arc::new(Announced(Mutex::new(tx_b))))
            .unwrap();
        let peers = engine.peer_connections();
        engine.connect(&peers[0], &peers[1]);

        let local = a.create_data_channel("chat", &DataChannelInit::default()).unwrap();
        let (local_observer, local_seen) = recorder();
        local.register_observer(local_observer);

        let remote = rx_b.recv_timeout(WAIT).unwrap();
        let (remote_observer, remote_seen) = recorder();
        remote.register_observer(remote_observer);
        assert_eq!(remote.label(), "chat");

        assert_eq!(local_seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Open));
        assert_eq!(remote_seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Open));
        assert_eq!(local.id(), Some(0));
        assert_eq!(remote.id(), Some(0));

        assert!(local.send(&DataBuffer::text("ping")));
        assert_eq!(remote_seen.recv_timeout(WAIT).unwrap(), Seen::Message("ping".into()));

        local.close();
        assert_eq!(local_seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Closing));
        assert_eq!(local_seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Closed));
        assert_eq!(remote_seen.recv_timeout(WAIT).unwrap(), Seen::State(DataState::Closed));
        assert!(!local.send(&DataBuffer::text("after close")));
    }

    #[test]
    fn test_closed_connection_refuses_channels() {
        let engine = engine();
        let (tx, _rx) = std_mpsc::channel();
        let pc = engine
            .create_peer_connection(Arc::new(Announced(Mutex::new(tx))))
            .unwrap();
        pc.close();
        assert_eq!(pc.connection_state(), PeerConnectionState::Closed);
        assert_eq!(
            pc.create_data_channel("x", &DataChannelInit::default()).err(),
            Some(EngineError::Closed)
        );
    }
}
