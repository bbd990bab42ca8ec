//! Session state that game data is forwarded into
//!
//! The relay only depends on the [`Session`] trait. [`GameSession`] is the
//! in-memory implementation used by the server: every ingested block is
//! relayed to all other members of the session as a [`SessionEvent`].
//! Connecting to the server does not make a client a member; it has to join.

use crate::error::{ActionError, ProtocolFault};
use crate::stats::LagSpikes;
use log::{debug, info};
use shared::DataBlock;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// One frame at 60 fps
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_micros(16_667);

/// Notification that something must be relayed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    GameData(DataBlock),
    /// The member has sent nothing for a while; `timeout_number` counts
    /// consecutive timeouts starting at 1.
    GameTimeout { timeout_number: u32 },
}

/// Events for one member; ends when the member leaves the session.
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

pub trait Session: Send + Sync + 'static {
    /// Accepts a block of game data from `connection_id`.
    fn ingest(
        &self,
        connection_id: u32,
        block: DataBlock,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;

    /// Registers `connection_id` and returns its event stream.
    ///
    /// Subscribing again replaces the previous stream, which then ends.
    fn subscribe(&self, connection_id: u32) -> impl Future<Output = EventStream> + Send;

    fn leave(&self, connection_id: u32) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
struct Member {
    sender: mpsc::UnboundedSender<SessionEvent>,
    last_update: Instant,
    last_timeout: Option<Instant>,
    timeouts: u32,
    lag: LagSpikes,
}

impl Member {
    fn new(sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            sender,
            last_update: Instant::now(),
            last_timeout: None,
            timeouts: 0,
            lag: LagSpikes::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Members {
    active: HashMap<u32, Member>,
    /// When each non-member's current run of game data errors started
    failing_since: HashMap<u32, Instant>,
}

#[derive(Debug)]
pub struct GameSession {
    members: RwLock<Members>,
    drop_timeout: Duration,
    frame_duration: Duration,
}

impl GameSession {
    /// `drop_timeout` bounds how long a client outside the game keeps
    /// getting its game data reflected back.
    pub fn new(drop_timeout: Duration) -> Self {
        Self {
            members: RwLock::new(Members::default()),
            drop_timeout,
            frame_duration: DEFAULT_FRAME_DURATION,
        }
    }

    /// Frame length that lag spikes are measured against.
    pub fn with_frame_duration(mut self, frame_duration: Duration) -> Self {
        self.frame_duration = frame_duration;
        self
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.active.len()
    }

    pub async fn is_member(&self, connection_id: u32) -> bool {
        self.members.read().await.active.contains_key(&connection_id)
    }

    /// Lag spikes per member, ordered by connection id.
    pub async fn lag_report(&self) -> Vec<(u32, LagSpikes)> {
        let members = self.members.read().await;
        let mut report: Vec<(u32, LagSpikes)> = members
            .active
            .iter()
            .map(|(id, member)| (*id, member.lag))
            .collect();
        report.sort_unstable_by_key(|(id, _)| *id);
        report
    }

    /// Sends a [`SessionEvent::GameTimeout`] to every member that has not
    /// sent game data for longer than `after`, at most once per `after`.
    /// Returns how many timeouts were delivered.
    pub async fn check_stalled(&self, after: Duration) -> usize {
        let mut members = self.members.write().await;
        let now = Instant::now();
        let mut delivered = 0;

        for (id, member) in members.active.iter_mut() {
            let since = member.last_timeout.unwrap_or(member.last_update);
            if now.duration_since(since) <= after {
                continue;
            }

            member.timeouts += 1;
            member.last_timeout = Some(now);
            debug!("Client {} stalled, timeout {}", id, member.timeouts);

            let event = SessionEvent::GameTimeout {
                timeout_number: member.timeouts,
            };
            if member.sender.send(event).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }
}

impl Session for GameSession {
    async fn ingest(&self, connection_id: u32, block: DataBlock) -> Result<(), ActionError> {
        if block.is_empty() {
            return Err(ProtocolFault::new("empty game data").into());
        }

        let mut members = self.members.write().await;
        let now = Instant::now();

        if !members.active.contains_key(&connection_id) {
            let since = *members.failing_since.entry(connection_id).or_insert(now);
            let message = format!("client {} is not in a game", connection_id);

            if now.duration_since(since) > self.drop_timeout {
                debug!(
                    "Client {} error game data exceeds drop timeout, no longer reflecting",
                    connection_id
                );
                return Err(ProtocolFault::new(message).into());
            }

            // Reflect a blank frame so the client's emulator does not stall
            return Err(
                ProtocolFault::with_response(message, DataBlock::zeroed(block.len())).into(),
            );
        }

        members.failing_since.remove(&connection_id);

        let frame_duration = self.frame_duration;
        if let Some(member) = members.active.get_mut(&connection_id) {
            member
                .lag
                .record(now.duration_since(member.last_update), frame_duration);
            member.last_update = now;
            member.last_timeout = None;
            member.timeouts = 0;
        }

        let mut closed = Vec::new();
        for (member_id, member) in &members.active {
            if *member_id == connection_id {
                continue;
            }
            if member
                .sender
                .send(SessionEvent::GameData(block.clone()))
                .is_err()
            {
                closed.push(*member_id);
            }
        }

        for member_id in closed {
            debug!("Event stream for client {} closed, removing", member_id);
            members.active.remove(&member_id);
        }

        Ok(())
    }

    async fn subscribe(&self, connection_id: u32) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut members = self.members.write().await;

        if members
            .active
            .insert(connection_id, Member::new(tx))
            .is_some()
        {
            debug!("Client {} resubscribed, previous stream closed", connection_id);
        }
        members.failing_since.remove(&connection_id);
        info!(
            "Client {} joined session ({} members)",
            connection_id,
            members.active.len()
        );

        rx
    }

    async fn leave(&self, connection_id: u32) {
        let mut members = self.members.write().await;
        members.failing_since.remove(&connection_id);
        if let Some(member) = members.active.remove(&connection_id) {
            info!(
                "Client {} left session, lag spikes caused: {}",
                connection_id, member.lag
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(bytes: &[u8]) -> DataBlock {
        DataBlock::from(bytes)
    }

    #[tokio::test]
    async fn test_ingest_relays_to_other_members() {
        let session = GameSession::new(Duration::from_secs(30));
        let mut stream1 = session.subscribe(1).await;
        let mut stream2 = session.subscribe(2).await;
        let mut stream3 = session.subscribe(3).await;

        session.ingest(1, block(&[1, 2])).await.unwrap();

        assert_eq!(
            stream2.try_recv().unwrap(),
            SessionEvent::GameData(block(&[1, 2]))
        );
        assert_eq!(
            stream3.try_recv().unwrap(),
            SessionEvent::GameData(block(&[1, 2]))
        );
        assert!(stream1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_block_is_protocol_fault_without_response() {
        let session = GameSession::new(Duration::from_secs(30));
        let _stream = session.subscribe(1).await;

        match session.ingest(1, DataBlock::new(Vec::new())).await {
            Err(ActionError::Protocol(fault)) => assert!(fault.response().is_none()),
            other => panic!("Expected protocol fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_member_gets_zeroed_reflection() {
        let session = GameSession::new(Duration::from_secs(30));

        match session.ingest(9, block(&[5, 6, 7])).await {
            Err(ActionError::Protocol(fault)) => {
                assert_eq!(fault.response(), Some(&DataBlock::zeroed(3)));
            }
            other => panic!("Expected protocol fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reflection_stops_after_drop_timeout() {
        let session = GameSession::new(Duration::ZERO);

        match session.ingest(4, block(&[1])).await {
            Err(ActionError::Protocol(fault)) => assert!(fault.response().is_some()),
            other => panic!("Expected protocol fault, got {:?}", other),
        }

        std::thread::sleep(Duration::from_millis(2));

        // Still recoverable, just no longer answered
        for _ in 0..2 {
            match session.ingest(4, block(&[1])).await {
                Err(ActionError::Protocol(fault)) => assert!(fault.response().is_none()),
                other => panic!("Expected protocol fault, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_joining_clears_error_window() {
        let session = GameSession::new(Duration::ZERO);

        assert!(session.ingest(4, block(&[1])).await.is_err());
        std::thread::sleep(Duration::from_millis(2));

        let _stream = session.subscribe(4).await;
        tokio_test::assert_ok!(session.ingest(4, block(&[1])).await);

        session.leave(4).await;
        match session.ingest(4, block(&[1])).await {
            Err(ActionError::Protocol(fault)) => assert!(fault.response().is_some()),
            other => panic!("Expected protocol fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_ends_stream() {
        let session = GameSession::new(Duration::from_secs(30));
        let mut stream = session.subscribe(1).await;
        assert!(session.is_member(1).await);

        session.leave(1).await;

        assert!(!session.is_member(1).await);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_stream() {
        let session = GameSession::new(Duration::from_secs(30));
        let mut first = session.subscribe(1).await;
        let mut second = session.subscribe(1).await;
        let _other = session.subscribe(2).await;

        session.ingest(2, block(&[3])).await.unwrap();

        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(SessionEvent::GameData(block(&[3]))));
        assert_eq!(session.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_closed_streams_are_pruned() {
        let session = GameSession::new(Duration::from_secs(30));
        let _stream1 = session.subscribe(1).await;
        let stream2 = session.subscribe(2).await;
        drop(stream2);

        session.ingest(1, block(&[1])).await.unwrap();

        assert_eq!(session.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_stalled_members_get_numbered_timeouts() {
        let session = GameSession::new(Duration::from_secs(30));
        let mut stream1 = session.subscribe(1).await;
        let mut stream2 = session.subscribe(2).await;

        assert_eq!(session.check_stalled(Duration::from_secs(60)).await, 0);

        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(session.check_stalled(Duration::ZERO).await, 2);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(session.check_stalled(Duration::ZERO).await, 2);

        for stream in [&mut stream1, &mut stream2] {
            assert_eq!(
                stream.try_recv().unwrap(),
                SessionEvent::GameTimeout { timeout_number: 1 }
            );
            assert_eq!(
                stream.try_recv().unwrap(),
                SessionEvent::GameTimeout { timeout_number: 2 }
            );
        }

        // Sending game data resets the count
        session.ingest(1, block(&[7])).await.unwrap();
        assert_eq!(
            stream2.try_recv().unwrap(),
            SessionEvent::GameData(block(&[7]))
        );
        std::thread::sleep(Duration::from_millis(2));
        session.check_stalled(Duration::ZERO).await;

        assert_eq!(
            stream1.try_recv().unwrap(),
            SessionEvent::GameTimeout { timeout_number: 1 }
        );
        assert_eq!(
            stream2.try_recv().unwrap(),
            SessionEvent::GameTimeout { timeout_number: 3 }
        );
    }

    #[tokio::test]
    async fn test_late_game_data_counts_lag_spikes() {
        let session = GameSession::new(Duration::from_secs(30))
            .with_frame_duration(Duration::from_nanos(1));
        let _stream = session.subscribe(1).await;

        std::thread::sleep(Duration::from_millis(1));
        session.ingest(1, block(&[1])).await.unwrap();

        assert_eq!(
            session.lag_report().await,
            vec![(1, LagSpikes { small: 0, big: 1 })]
        );

        let patient = GameSession::new(Duration::from_secs(30))
            .with_frame_duration(Duration::from_secs(3600));
        let _stream = patient.subscribe(1).await;
        patient.ingest(1, block(&[1])).await.unwrap();
        assert_eq!(patient.lag_report().await[0].1, LagSpikes::default());
    }
}
