use rand::seq::SliceRandom;
use shared::{
    decode, encode, is_newer, DataBlock, GameDataCache, MessageBody, MessageSequence, Packet,
    ProtocolMessage, DATAGRAM_BUFFER_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:27888".to_string())
        .parse()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let connect = encode(&Packet::Connect {
        client_version: PROTOCOL_VERSION,
    })?;
    println!("Sending connection request to {}", server_addr);
    socket.send_to(&connect, server_addr).await?;

    let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];
    let (len, _) = socket.recv_from(&mut buf).await?;
    let client_id = match decode(&buf[..len])? {
        Packet::Connected { client_id } => client_id,
        other => {
            println!("Expected Connected but got: {:?}", other);
            return Ok(());
        }
    };
    println!("Connection accepted with client ID: {}", client_id);

    socket
        .send_to(&encode(&Packet::JoinGame)?, server_addr)
        .await?;
    let (len, _) = socket.recv_from(&mut buf).await?;
    match decode(&buf[..len])? {
        Packet::GameJoined { members } => println!("Joined game with {} players", members),
        other => {
            println!("Expected GameJoined but got: {:?}", other);
            return Ok(());
        }
    }

    // Held buttons repeat the same few frames, which the relay deduplicates
    let frames: Vec<DataBlock> = vec![
        DataBlock::new(vec![0x00, 0x00]),
        DataBlock::new(vec![0x01, 0x00]),
        DataBlock::new(vec![0x00, 0x10]),
    ];

    let mut sequence = MessageSequence::new();
    let mut sent_cache = GameDataCache::default();
    let mut received_cache = GameDataCache::default();
    let mut last_received: Option<u16> = None;

    for _ in 0..20 {
        let frame = frames
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DataBlock::zeroed(2));

        let body = match sent_cache.index_of(&frame) {
            Some(index) => MessageBody::CachedGameData { key: index as u8 },
            None => {
                sent_cache.add(frame.clone());
                MessageBody::GameData(frame)
            }
        };
        let message = Packet::Message(ProtocolMessage {
            number: sequence.next() as u16,
            body,
        });
        socket.send_to(&encode(&message)?, server_addr).await?;

        // Drain whatever the other players sent us
        while let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(50), socket.recv_from(&mut buf)).await
        {
            match decode(&buf[..len]) {
                Ok(Packet::Message(ProtocolMessage { number, body })) => {
                    // Resent messages must not be mirrored twice
                    if last_received.is_some_and(|last| !is_newer(number, last)) {
                        println!("Message {}: already seen", number);
                        continue;
                    }
                    last_received = Some(number);

                    let data = match body {
                        MessageBody::GameData(block) => {
                            received_cache.add(block.clone());
                            Some(block)
                        }
                        MessageBody::CachedGameData { key } => {
                            received_cache.get(key as usize).cloned()
                        }
                    };
                    println!("Message {}: {:?}", number, data);
                }
                Ok(Packet::Disconnected { reason }) => {
                    println!("Disconnected by server: {}", reason);
                    return Ok(());
                }
                Ok(other) => println!("Unexpected packet: {:?}", other),
                Err(e) => println!("Failed to decode packet: {}", e),
            }
        }

        sleep(Duration::from_millis(100)).await;
    }

    socket
        .send_to(&encode(&Packet::Disconnect)?, server_addr)
        .await?;
    println!("Test client finished");

    Ok(())
}
