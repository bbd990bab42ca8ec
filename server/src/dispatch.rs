//! Routes inbound messages to actions and session events to event handlers
//!
//! The dispatcher owns exactly one instance of every handler and shares it
//! across connections. Each dispatch enters the target connection's
//! exclusion scope for the whole call, so the faulted check, the handler's
//! cache and numbering work, and the send happen as one unit.

use crate::action::{CachedGameDataAction, GameDataAction};
use crate::connection::Connection;
use crate::error::FatalFault;
use crate::event::{GameDataEventHandler, GameTimeoutEventHandler};
use crate::game::{Session, SessionEvent};
use crate::stats::Stats;
use log::{debug, error, trace};
use shared::{MessageBody, ProtocolMessage};
use std::sync::Arc;

pub struct Dispatcher<S> {
    session: Arc<S>,
    stats: Arc<Stats>,
    game_data: GameDataAction,
    cached_game_data: CachedGameDataAction,
    game_data_event: GameDataEventHandler,
    game_timeout_event: GameTimeoutEventHandler,
}

impl<S: Session> Dispatcher<S> {
    pub fn new(session: Arc<S>, stats: Arc<Stats>) -> Self {
        Self {
            game_data: GameDataAction::new(&stats),
            cached_game_data: CachedGameDataAction::new(&stats),
            game_data_event: GameDataEventHandler::new(&stats),
            game_timeout_event: GameTimeoutEventHandler::new(&stats),
            session,
            stats,
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Runs the action for one inbound message.
    ///
    /// Once any action has failed fatally, every later call for the same
    /// connection fails with [`FatalFault::ConnectionFaulted`] without
    /// invoking a handler.
    pub async fn dispatch_action(
        &self,
        connection: &Connection,
        message: ProtocolMessage,
    ) -> Result<(), FatalFault> {
        let mut state = connection.lock().await;

        if state.is_faulted() {
            return Err(FatalFault::ConnectionFaulted {
                connection_id: connection.id(),
            });
        }

        trace!(
            "Client {} sent {} #{}",
            connection.id(),
            message.body.kind(),
            message.number
        );
        state.record_inbound(message.number);

        let result = match message.body {
            MessageBody::GameData(block) => {
                self.game_data
                    .perform(block, &mut state, self.session.as_ref())
                    .await
            }
            MessageBody::CachedGameData { key } => {
                self.cached_game_data
                    .perform(key, &mut state, self.session.as_ref())
                    .await
            }
        };

        if let Err(fault) = &result {
            error!("Fatal fault on client {}: {}", connection.id(), fault);
            state.mark_faulted();
        }

        result
    }

    /// Encodes one session event for `connection`.
    ///
    /// Events for a faulted connection are discarded.
    pub async fn dispatch_event(&self, connection: &Connection, event: SessionEvent) {
        let mut state = connection.lock().await;

        if state.is_faulted() {
            debug!(
                "Discarding event for faulted client {}",
                connection.id()
            );
            return;
        }

        match event {
            SessionEvent::GameData(block) => self.game_data_event.handle(block, &mut state),
            SessionEvent::GameTimeout { timeout_number } => {
                self.game_timeout_event.handle(timeout_number, &mut state)
            }
        }
    }
}
