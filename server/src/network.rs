//! Server network layer handling UDP communications and relay coordination

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::game::{EventStream, GameSession, Session};
use crate::stats::Stats;
use log::{debug, error, info, warn};
use shared::{decode, encode, Packet, DATAGRAM_BUFFER_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Datagrams waiting for the sender task
#[derive(Debug)]
pub enum Outgoing {
    /// Unnumbered control packet, encoded by the sender task
    SendPacket { packet: Packet, addr: SocketAddr },
    /// Protocol message already numbered and encoded by its connection
    Datagram { bytes: Vec<u8>, addr: SocketAddr },
}

/// Main server coordinating networking and the relay dispatcher
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    clients: Arc<RwLock<ClientManager>>,
    dispatcher: Arc<Dispatcher<GameSession>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr()).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let session = Arc::new(
            GameSession::new(config.drop_timeout).with_frame_duration(config.frame_duration),
        );
        let dispatcher = Arc::new(Dispatcher::new(session, Arc::new(Stats::new())));

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.cache_capacity,
            ))),
            dispatcher,
            config,
            server_tx,
            server_rx,
            outgoing_tx,
            outgoing_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(self.dispatcher.stats())
    }

    /// Sender that stops [`Server::run`] when given [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; DATAGRAM_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing datagram queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut outgoing_rx =
            std::mem::replace(&mut self.outgoing_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(outgoing) = outgoing_rx.recv().await {
                let (bytes, addr) = match outgoing {
                    Outgoing::Datagram { bytes, addr } => (bytes, addr),
                    Outgoing::SendPacket { packet, addr } => match encode(&packet) {
                        Ok(bytes) => (bytes, addr),
                        Err(e) => {
                            error!("Failed to encode packet for {}: {}", addr, e);
                            continue;
                        }
                    },
                };

                if let Err(e) = socket.send_to(&bytes, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if server_tx
                        .send(ServerMessage::ClientTimeout { client_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    /// Relays session events for one connection until its stream ends
    fn spawn_event_pump(&self, connection: Arc<Connection>, mut events: EventStream) {
        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.dispatch_event(&connection, event).await;
            }
            debug!("Event stream for client {} ended", connection.id());
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outgoing_tx.send(Outgoing::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Removes a client and its session membership, optionally telling it why
    async fn disconnect(&self, client_id: u32, addr: SocketAddr, reason: Option<String>) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }
        self.dispatcher.session().leave(client_id).await;

        if let Some(reason) = reason {
            self.send_packet(Packet::Disconnected { reason }, addr);
        }
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.disconnect(existing_id, addr, None).await;
                }

                let connection = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, self.outgoing_tx.clone())
                };

                match connection {
                    Some(connection) => {
                        self.send_packet(
                            Packet::Connected {
                                client_id: connection.id(),
                            },
                            addr,
                        );
                    }
                    None => self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    ),
                }
            }

            Packet::JoinGame => {
                let Some(connection) = self.active_connection(addr).await else {
                    debug!("Join from unknown address {}", addr);
                    return;
                };

                let session = self.dispatcher.session();
                let events = session.subscribe(connection.id()).await;
                let members = session.member_count().await as u32;
                self.spawn_event_pump(connection, events);
                self.send_packet(Packet::GameJoined { members }, addr);
            }

            Packet::QuitGame => {
                if let Some(connection) = self.active_connection(addr).await {
                    self.dispatcher.session().leave(connection.id()).await;
                }
            }

            Packet::Message(message) => {
                let Some(connection) = self.active_connection(addr).await else {
                    debug!("Message from unknown address {}", addr);
                    return;
                };

                if let Err(fault) = self
                    .dispatcher
                    .dispatch_action(&connection, message)
                    .await
                {
                    self.disconnect(connection.id(), addr, Some(fault.to_string()))
                        .await;
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.disconnect(client_id, addr, None).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Looks up the connection for `addr` and marks it as active
    async fn active_connection(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        let mut clients = self.clients.write().await;
        clients.find_client_by_addr(addr).and_then(|client_id| {
            clients.refresh(client_id);
            clients.connection(client_id)
        })
    }

    async fn log_stats(&self) {
        for handler in self.dispatcher.stats().snapshot() {
            debug!(
                "{}: {} performed, {} handled, {} errors",
                handler.name, handler.performed, handler.handled, handler.errors
            );
        }
        for (client_id, lag) in self.dispatcher.session().lag_report().await {
            debug!("Client {} lag spikes: {}", client_id, lag);
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut stats_interval = interval(self.config.stats_interval);
        let mut stall_interval = interval(self.config.game_timeout.max(Duration::from_millis(1)));

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.dispatcher.session().leave(client_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let client_count = self.clients.read().await.len();
                    if client_count > 0 {
                        debug!("{} clients connected", client_count);
                        self.log_stats().await;
                    }
                },

                _ = stall_interval.tick() => {
                    let stalled = self
                        .dispatcher
                        .session()
                        .check_stalled(self.config.game_timeout)
                        .await;
                    if stalled > 0 {
                        debug!("{} stalled clients sent game timeouts", stalled);
                    }
                },
            }
        }

        Ok(())
    }
}
