//! Outbound session event handlers

use crate::connection::{ConnectionState, RESEND_HISTORY_LEN};
use crate::stats::{HandlerStats, Stats};
use log::{debug, error};
use shared::{cache_key, DataBlock, MessageBody};
use std::sync::Arc;

/// Turns a game data event into either a `GameData` message carrying the
/// block, or a `CachedGameData` reference when the client already has it.
#[derive(Debug)]
pub struct GameDataEventHandler {
    stats: Arc<HandlerStats>,
}

impl GameDataEventHandler {
    pub const NAME: &'static str = "GameDataEventHandler";

    pub fn new(stats: &Stats) -> Self {
        Self {
            stats: stats.handler(Self::NAME),
        }
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    /// Encoding failures are logged and the event is dropped for this
    /// connection only.
    pub fn handle(&self, block: DataBlock, state: &mut ConnectionState) {
        self.stats.record_handled();

        match state.outbound_cache().index_of(&block) {
            None => {
                if let Err(e) = state.send_game_data(block) {
                    self.stats.record_error();
                    error!(
                        "Failed to construct GameData message for client {}: {}",
                        state.id(),
                        e
                    );
                }
            }
            Some(index) => {
                let sent = cache_key(index)
                    .and_then(|key| state.send(MessageBody::CachedGameData { key }));
                if let Err(e) = sent {
                    self.stats.record_error();
                    error!(
                        "Failed to construct CachedGameData message for client {}: {}",
                        state.id(),
                        e
                    );
                }
            }
        }
    }
}

/// Retransmits recent messages to a client the session reports as stalled.
///
/// Each consecutive timeout widens the window by three messages, up to the
/// connection's history.
#[derive(Debug)]
pub struct GameTimeoutEventHandler {
    stats: Arc<HandlerStats>,
}

impl GameTimeoutEventHandler {
    pub const NAME: &'static str = "GameTimeoutEventHandler";

    pub fn new(stats: &Stats) -> Self {
        Self {
            stats: stats.handler(Self::NAME),
        }
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    pub fn handle(&self, timeout_number: u32, state: &mut ConnectionState) {
        self.stats.record_handled();

        let count = (timeout_number as usize)
            .saturating_mul(3)
            .min(RESEND_HISTORY_LEN);
        let resent = state.resend(count);
        debug!(
            "Timeout {} for client {}: resent {} messages",
            timeout_number,
            state.id(),
            resent
        );
    }
}
