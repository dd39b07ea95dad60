//! Shared engine factory

use std::sync::Arc;

use tracing::debug;

use crate::config::FactoryConfig;
use crate::engine::{Engine, EngineResult, PeerConnectionInterface, PeerConnectionObserver};

/// The engine plus factory-wide limits, shared by every wrapper
pub struct PeerConnectionFactory {
    engine: Arc<dyn Engine>,
    config: FactoryConfig,
}

impl PeerConnectionFactory {
    pub fn new(engine: Arc<dyn Engine>, config: FactoryConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }

    pub fn create_peer_connection(
        &self,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> EngineResult<Arc<dyn PeerConnectionInterface>> {
        let connection = self.engine.create_peer_connection(observer)?;
        debug!(target: "rtcbridge::webrtc", "created peer connection");
        Ok(connection)
    }
}
