use crate::core::SessionEvent;
use crate::BroadcastMessage;
use chatsync_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use chatsync_proto::state::SnapshotStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    store: SnapshotStore,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    let count = connected.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("Client {} connected from {} ({} connected)", id, peer, count);

                    let store = store.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let connected = connected.clone();

                    tokio::spawn(async move {
                        handle_client(stream, store, id, evt_tx, bcast_rx).await;
                        let count = connected.fetch_sub(1, Ordering::Relaxed) - 1;
                        info!("Client {} disconnected ({} connected)", id, count);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    store: SnapshotStore,
    client_id: usize,
    event_tx: mpsc::Sender<SessionEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello carries the full snapshot, window included
    if let Ok(encoded) = encode_hello(&store).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while read_buf.len() >= 4 {
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);
                                    // the core publishes a fresh State once it has applied it
                                    if event_tx.send(SessionEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("SessionEvent channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&store).await,
                    Ok(BroadcastMessage::Window { events, replaced }) => {
                        Message::Broadcast(Broadcast::Window { events, replaced }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // the State snapshot carries the whole window, so a
                        // lagging client resynchronises from it
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&store).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        snapshot: store.get().await,
    })
    .encode()
}

async fn encode_state(store: &SnapshotStore) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::State {
        data: store.get().await,
    })
    .encode()
}
