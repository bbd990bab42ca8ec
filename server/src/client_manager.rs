//! Connection bookkeeping for the relay server
//!
//! Tracks which address belongs to which connection, enforces the client
//! limit and detects clients that went silent. The relay state of each
//! connection lives in its [`Connection`]; this module only decides which
//! connections exist.

use crate::connection::Connection;
use crate::network::Outgoing;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A connected client
#[derive(Debug)]
pub struct Client {
    pub id: u32,
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    pub connection: Arc<Connection>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, connection: Arc<Connection>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            connection,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    cache_capacity: usize,
}

impl ClientManager {
    /// Client IDs start from 1 and are never reused.
    pub fn new(max_clients: usize, cache_capacity: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            cache_capacity,
        }
    }

    /// Registers a client and creates its connection context.
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Outgoing>,
    ) -> Option<Arc<Connection>> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let connection = Arc::new(Connection::new(
            client_id,
            addr,
            self.cache_capacity,
            outbound,
        ));
        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, Arc::clone(&connection)));

        Some(connection)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn connection(&self, client_id: u32) -> Option<Arc<Connection>> {
        self.clients
            .get(&client_id)
            .map(|client| Arc::clone(&client.connection))
    }

    /// Marks the client as active. Returns false for unknown IDs.
    pub fn refresh(&mut self, client_id: u32) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes clients silent for longer than `timeout` and returns their IDs.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
