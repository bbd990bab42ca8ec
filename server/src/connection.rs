//! Per-connection relay context
//!
//! Everything a handler may mutate for one connection lives in
//! [`ConnectionState`]: the two game data caches, the outbound message
//! numbering, the recent send history, the faulted flag and the outbound
//! queue. The state sits behind
//! a single async mutex so the inbound action path and the session event
//! path never interleave an index assignment, a number assignment and a send.

use crate::network::Outgoing;
use log::{debug, error, warn};
use shared::{
    encode, is_newer, DataBlock, EncodeError, GameDataCache, MessageBody, MessageSequence, Packet,
    ProtocolMessage, CACHE_CAPACITY,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::sync::{mpsc, Mutex, MutexGuard};

/// Encoded messages kept per connection for retransmission.
pub const RESEND_HISTORY_LEN: usize = 9;

#[derive(Debug)]
pub struct ConnectionState {
    id: u32,
    addr: SocketAddr,
    /// Blocks received from the client
    inbound_cache: GameDataCache,
    /// Blocks already sent to the client
    outbound_cache: GameDataCache,
    sequence: MessageSequence,
    /// Most recent encoded messages, oldest first
    history: VecDeque<(u16, Vec<u8>)>,
    last_inbound: Option<u16>,
    faulted: bool,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionState {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn inbound_cache(&self) -> &GameDataCache {
        &self.inbound_cache
    }

    pub fn inbound_cache_mut(&mut self) -> &mut GameDataCache {
        &mut self.inbound_cache
    }

    pub fn outbound_cache(&self) -> &GameDataCache {
        &self.outbound_cache
    }

    pub fn outbound_cache_mut(&mut self) -> &mut GameDataCache {
        &mut self.outbound_cache
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn mark_faulted(&mut self) {
        self.faulted = true;
    }

    /// Number the next outbound message will carry.
    pub fn next_message_number(&self) -> u16 {
        self.sequence.peek() as u16
    }

    /// Notes the number of an inbound message and logs gaps or repeats.
    pub fn record_inbound(&mut self, number: u16) {
        if let Some(last) = self.last_inbound {
            if !is_newer(number, last) {
                debug!("Client {} repeated message {} (last {})", self.id, number, last);
            } else if number != last.wrapping_add(1) {
                debug!(
                    "Client {} skipped from message {} to {}",
                    self.id, last, number
                );
            }
        }
        self.last_inbound = Some(number);
    }

    /// Numbers, encodes and queues a protocol message for this connection.
    ///
    /// The message number is only consumed when encoding succeeds.
    pub fn send(&mut self, body: MessageBody) -> Result<u16, EncodeError> {
        let number = self.next_message_number();
        let bytes = encode(&Packet::Message(ProtocolMessage { number, body }))?;
        self.sequence.next();

        if self.history.len() == RESEND_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back((number, bytes.clone()));
        self.queue(number, bytes);

        Ok(number)
    }

    /// Sends `block` as raw `GameData` and takes its outbound cache slot.
    ///
    /// The client mirrors every `GameData` it receives, so every raw send
    /// must also be recorded here or later cache keys would drift.
    pub fn send_game_data(&mut self, block: DataBlock) -> Result<u16, EncodeError> {
        let number = self.send(MessageBody::GameData(block.clone()))?;
        self.outbound_cache.add(block);
        Ok(number)
    }

    /// Queues the last `count` messages again, oldest first, with their
    /// original numbers. Returns how many were queued.
    pub fn resend(&self, count: usize) -> usize {
        let skip = self.history.len().saturating_sub(count);
        for (number, bytes) in self.history.iter().skip(skip) {
            self.queue(*number, bytes.clone());
        }
        self.history.len() - skip
    }

    fn queue(&self, number: u16, bytes: Vec<u8>) {
        if let Err(e) = self.outbound.send(Outgoing::Datagram {
            bytes,
            addr: self.addr,
        }) {
            error!("Failed to queue message {} for client {}: {}", number, self.id, e);
        }
    }
}

/// Shared handle to one connection's context.
#[derive(Debug)]
pub struct Connection {
    id: u32,
    addr: SocketAddr,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// `cache_capacity` is capped at [`CACHE_CAPACITY`] so every slot can be
    /// named by a one-byte key.
    pub fn new(
        id: u32,
        addr: SocketAddr,
        cache_capacity: usize,
        outbound: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        if cache_capacity > CACHE_CAPACITY {
            warn!(
                "Cache capacity {} exceeds the key range, using {}",
                cache_capacity, CACHE_CAPACITY
            );
        }
        let cache_capacity = cache_capacity.min(CACHE_CAPACITY);

        Self {
            id,
            addr,
            state: Mutex::new(ConnectionState {
                id,
                addr,
                inbound_cache: GameDataCache::new(cache_capacity),
                outbound_cache: GameDataCache::new(cache_capacity),
                sequence: MessageSequence::new(),
                history: VecDeque::with_capacity(RESEND_HISTORY_LEN),
                last_inbound: None,
                faulted: false,
                outbound,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enters the connection's exclusion scope.
    pub async fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode, DataBlock, MAX_GAME_DATA_LEN};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:27888".parse().unwrap()
    }

    fn sent_message(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> ProtocolMessage {
        match rx.try_recv().expect("nothing queued") {
            Outgoing::Datagram { bytes, addr } => {
                assert_eq!(addr, test_addr());
                match decode(&bytes).unwrap() {
                    Packet::Message(message) => message,
                    other => panic!("Unexpected packet {:?}", other),
                }
            }
            other => panic!("Unexpected outgoing {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_connection_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(7, test_addr(), 16, tx);
        let state = connection.lock().await;

        assert_eq!(connection.id(), 7);
        assert_eq!(state.id(), 7);
        assert_eq!(state.addr(), test_addr());
        assert!(state.inbound_cache().is_empty());
        assert!(state.outbound_cache().is_empty());
        assert_eq!(state.inbound_cache().capacity(), 16);
        assert_eq!(state.next_message_number(), 0);
        assert!(!state.is_faulted());
    }

    #[tokio::test]
    async fn test_send_numbers_messages_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        for expected in 0..3u16 {
            let number = state
                .send(MessageBody::CachedGameData { key: expected as u8 })
                .unwrap();
            assert_eq!(number, expected);
        }

        for expected in 0..3u16 {
            let message = sent_message(&mut rx);
            assert_eq!(message.number, expected);
            assert_eq!(
                message.body,
                MessageBody::CachedGameData { key: expected as u8 }
            );
        }
    }

    #[tokio::test]
    async fn test_failed_encoding_keeps_message_number() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        let oversized = DataBlock::zeroed(MAX_GAME_DATA_LEN + 1);
        assert!(state.send(MessageBody::GameData(oversized)).is_err());
        assert_eq!(state.next_message_number(), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(
            state
                .send(MessageBody::GameData(DataBlock::new(vec![1])))
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_send_after_transport_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        tokio_test::assert_ok!(state.send(MessageBody::CachedGameData { key: 0 }));
        assert_eq!(state.next_message_number(), 1);
    }

    #[tokio::test]
    async fn test_cache_capacity_is_capped_to_key_range() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 512, tx);
        let state = connection.lock().await;

        assert_eq!(state.inbound_cache().capacity(), CACHE_CAPACITY);
        assert_eq!(state.outbound_cache().capacity(), CACHE_CAPACITY);
    }

    #[tokio::test]
    async fn test_send_game_data_takes_cache_slot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        let block = DataBlock::new(vec![3, 4]);
        assert_eq!(state.send_game_data(block.clone()).unwrap(), 0);
        assert_eq!(state.outbound_cache().index_of(&block), Some(0));
        assert_eq!(sent_message(&mut rx).body, MessageBody::GameData(block));

        assert!(state
            .send_game_data(DataBlock::zeroed(MAX_GAME_DATA_LEN + 1))
            .is_err());
        assert_eq!(state.outbound_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_resend_repeats_latest_messages_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        for key in 0..4u8 {
            state.send(MessageBody::CachedGameData { key }).unwrap();
        }
        for _ in 0..4 {
            sent_message(&mut rx);
        }

        assert_eq!(state.resend(2), 2);
        let first = sent_message(&mut rx);
        let second = sent_message(&mut rx);
        assert_eq!(first.number, 2);
        assert_eq!(first.body, MessageBody::CachedGameData { key: 2 });
        assert_eq!(second.number, 3);
        assert!(rx.try_recv().is_err());

        // Retransmission never consumes numbers
        assert_eq!(state.next_message_number(), 4);
    }

    #[tokio::test]
    async fn test_resend_history_is_bounded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        assert_eq!(state.resend(3), 0);

        for key in 0..(RESEND_HISTORY_LEN as u8 + 5) {
            state.send(MessageBody::CachedGameData { key }).unwrap();
        }
        while rx.try_recv().is_ok() {}

        assert_eq!(state.resend(100), RESEND_HISTORY_LEN);
        assert_eq!(sent_message(&mut rx).number, 5);
    }

    #[tokio::test]
    async fn test_mark_faulted() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        state.mark_faulted();
        assert!(state.is_faulted());
    }

    #[tokio::test]
    async fn test_record_inbound_tracks_last_number() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), 16, tx);
        let mut state = connection.lock().await;

        state.record_inbound(65535);
        state.record_inbound(0);
        state.record_inbound(5);
        assert_eq!(state.last_inbound, Some(5));
    }
}
