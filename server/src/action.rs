//! Inbound action handlers
//!
//! One handler per data-carrying message type. Handlers own nothing but
//! their counters; the connection context is lent to them per call by the
//! dispatcher, which already holds the connection's lock.

use crate::connection::ConnectionState;
use crate::error::{ActionError, FatalFault, ProtocolFault};
use crate::game::Session;
use crate::stats::{HandlerStats, Stats};
use log::{debug, error, warn};
use shared::DataBlock;
use std::sync::Arc;

/// Handles `GameData`: records the block and forwards it into the session.
#[derive(Debug)]
pub struct GameDataAction {
    stats: Arc<HandlerStats>,
}

impl GameDataAction {
    pub const NAME: &'static str = "GameDataAction";

    pub fn new(stats: &Stats) -> Self {
        Self {
            stats: stats.handler(Self::NAME),
        }
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    pub async fn perform<S: Session>(
        &self,
        block: DataBlock,
        state: &mut ConnectionState,
        session: &S,
    ) -> Result<(), FatalFault> {
        self.stats.record_performed();

        // History only; the inbound path never looks blocks up here
        state.inbound_cache_mut().add(block.clone());

        let result = session.ingest(state.id(), block).await;
        recover(&self.stats, state, result)
    }
}

/// Handles `CachedGameData`: resolves the key against the client's inbound
/// cache and forwards the stored block into the session.
#[derive(Debug)]
pub struct CachedGameDataAction {
    stats: Arc<HandlerStats>,
}

impl CachedGameDataAction {
    pub const NAME: &'static str = "CachedGameDataAction";

    pub fn new(stats: &Stats) -> Self {
        Self {
            stats: stats.handler(Self::NAME),
        }
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    pub async fn perform<S: Session>(
        &self,
        key: u8,
        state: &mut ConnectionState,
        session: &S,
    ) -> Result<(), FatalFault> {
        self.stats.record_performed();

        let result = match state.inbound_cache().get(key as usize).cloned() {
            Some(block) => session.ingest(state.id(), block).await,
            None => {
                warn!("Client {} referenced empty cache slot {}", state.id(), key);
                Err(ProtocolFault::new(format!("cache slot {} is empty", key)).into())
            }
        };

        recover(&self.stats, state, result)
    }
}

/// Contains protocol faults at the handler boundary and lets fatal ones through.
fn recover(
    stats: &HandlerStats,
    state: &mut ConnectionState,
    result: Result<(), ActionError>,
) -> Result<(), FatalFault> {
    match result {
        Ok(()) => Ok(()),
        Err(ActionError::Protocol(fault)) => {
            stats.record_error();
            debug!("Game data error from client {}: {}", state.id(), fault);

            if let Some(response) = fault.into_response() {
                if let Err(e) = state.send_game_data(response) {
                    error!(
                        "Failed to construct GameData reply for client {}: {}",
                        state.id(),
                        e
                    );
                }
            }
            Ok(())
        }
        Err(ActionError::Fatal(fault)) => {
            stats.record_error();
            Err(fault)
        }
    }
}
