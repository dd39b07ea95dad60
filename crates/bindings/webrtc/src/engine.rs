//! Native engine interfaces
//!
//! The bindings drive a real-time communication engine through these
//! traits. Every method may be called from any thread, and every observer
//! callback may arrive on any engine thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use rtcbridge_core::script::ScriptError;
use rtcbridge_core::string_enum;

/// Engine-side failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The peer connection or channel is closed
    #[error("Connection is closed")]
    Closed,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// The error as scripts see it
    pub fn to_script_error(&self) -> ScriptError {
        match self {
            EngineError::Closed => ScriptError::invalid_state(self.to_string()),
            EngineError::InvalidParameter(_) | EngineError::Unsupported(_) => {
                ScriptError::operation_error(self.to_string())
            }
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ============================================================================
// Data channels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataState {
    Connecting,
    Open,
    Closing,
    Closed,
}

string_enum!(DataState, "a data channel state" {
    DataState::Connecting => "connecting",
    DataState::Open => "open",
    DataState::Closing => "closing",
    DataState::Closed => "closed",
});

/// One message, text or binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBuffer {
    pub data: Bytes,
    pub binary: bool,
}

impl DataBuffer {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(text.into()),
            binary: false,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            binary: true,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Channel parameters fixed at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: bool,
    /// Milliseconds a message may be retransmitted for
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    /// Negotiated out of band: both sides create the channel with the same `id`
    pub negotiated: bool,
    pub id: Option<u16>,
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self {
            ordered: true,
            max_packet_life_time: None,
            max_retransmits: None,
            protocol: String::new(),
            negotiated: false,
            id: None,
        }
    }
}

pub trait DataChannelObserver: Send + Sync {
    fn on_state_change(&self, state: DataState);

    fn on_message(&self, buffer: DataBuffer);

    fn on_buffered_amount_change(&self, _sent_data_size: u64) {}
}

/// Engine-owned data channel handle
pub trait DataChannelInterface: Send + Sync {
    /// Replace the registered observer
    fn register_observer(&self, observer: Arc<dyn DataChannelObserver>);

    fn unregister_observer(&self);

    /// Stream id, once assigned
    fn id(&self) -> Option<u16>;

    fn label(&self) -> String;

    fn max_packet_life_time(&self) -> Option<u16>;

    fn max_retransmits(&self) -> Option<u16>;

    fn negotiated(&self) -> bool;

    fn ordered(&self) -> bool;

    fn protocol(&self) -> String;

    /// Bytes queued for sending
    fn buffered_amount(&self) -> u64;

    fn state(&self) -> DataState;

    /// Queue `buffer`; false when the engine refused it
    fn send(&self, buffer: &DataBuffer) -> bool;

    fn close(&self);
}

// ============================================================================
// Statistics
// ============================================================================

/// One stats object of a standard report
#[derive(Debug, Clone, PartialEq)]
pub struct RtcStats {
    pub id: String,
    pub kind: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: f64,
    pub members: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub stats: Vec<RtcStats>,
}

/// One report of the callback-style legacy stats API
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyStats {
    pub id: String,
    pub kind: String,
    pub timestamp: f64,
    pub values: BTreeMap<String, String>,
}

/// Delivered once, on an engine thread
pub type StatsCallback = Box<dyn FnOnce(EngineResult<StatsReport>) + Send>;

pub type LegacyStatsCallback = Box<dyn FnOnce(EngineResult<Vec<LegacyStats>>) + Send>;

// ============================================================================
// Peer connections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

string_enum!(PeerConnectionState, "a peer connection state" {
    PeerConnectionState::New => "new",
    PeerConnectionState::Connecting => "connecting",
    PeerConnectionState::Connected => "connected",
    PeerConnectionState::Disconnected => "disconnected",
    PeerConnectionState::Failed => "failed",
    PeerConnectionState::Closed => "closed",
});

pub trait PeerConnectionObserver: Send + Sync {
    /// The remote side opened a channel
    fn on_data_channel(&self, channel: Arc<dyn DataChannelInterface>);

    fn on_connection_state_change(&self, state: PeerConnectionState);
}

pub trait PeerConnectionInterface: Send + Sync {
    fn create_data_channel(
        &self,
        label: &str,
        init: &DataChannelInit,
    ) -> EngineResult<Arc<dyn DataChannelInterface>>;

    fn get_stats(&self, callback: StatsCallback);

    fn get_legacy_stats(&self, callback: LegacyStatsCallback);

    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection and every channel on it
    fn close(&self);
}

pub trait Engine: Send + Sync {
    fn create_peer_connection(
        &self,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> EngineResult<Arc<dyn PeerConnectionInterface>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtcbridge_core::script::{Env, ErrorKind, Value};
    use rtcbridge_core::{from_script, to_script};

    #[test]
    fn test_state_names() {
        let env = Env::default();
        assert_eq!(to_script(&env, &DataState::Open).ok(), Some(Value::from("open")));
        assert_eq!(PeerConnectionState::Disconnected.as_str(), "disconnected");
        let invalid = from_script::<DataState>(&env, &Value::from("half-open"));
        assert_eq!(
            invalid.errors().unwrap().first(),
            "Expected a data channel state ('connecting', 'open', 'closing', 'closed'), got 'half-open'"
        );
    }

    #[test]
    fn test_engine_errors_map_to_script_kinds() {
        assert_eq!(EngineError::Closed.to_script_error().kind, ErrorKind::InvalidStateError);
        assert_eq!(
            EngineError::InvalidParameter("id".into()).to_script_error().kind,
            ErrorKind::OperationError
        );
    }

    #[test]
    fn test_default_init_is_ordered_and_reliable() {
        let init = DataChannelInit::default();
        assert!(init.ordered);
        assert_eq!((init.max_packet_life_time, init.max_retransmits), (None, None));
        assert!(!init.negotiated);
    }
}
