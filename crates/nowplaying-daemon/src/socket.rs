use crate::core::HubEvent;
use nowplaying_proto::protocol::{
    FrameReader, HubState, Message, PlayerCommand, Reply, Request, SourceId, PROTOCOL_VERSION,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Queue depth for commands routed to one reporter.
const COMMAND_QUEUE: usize = 16;

/// Accept connections forever.  Every connection becomes a potential
/// reporter with its own `SourceId`.
pub fn start_server(
    listener: TcpListener,
    event_tx: mpsc::Sender<HubEvent>,
    state_rx: watch::Receiver<HubState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!("TCP server listening at {}", addr);
        }

        let mut next_id = 0u64;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let source_id = SourceId(next_id);
                    info!("Client {} connected from {}", source_id, peer);

                    let evt_tx = event_tx.clone();
                    let state = state_rx.clone();
                    tokio::spawn(async move {
                        handle_client(stream, source_id, evt_tx.clone(), state).await;
                        info!("Client {} disconnected", source_id);
                        let _ = evt_tx
                            .send(HubEvent::ReporterDisconnected(source_id))
                            .await;
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
    source_id: SourceId,
    event_tx: mpsc::Sender<HubEvent>,
    mut state_rx: watch::Receiver<HubState>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut frames = FrameReader::new();
    let (command_tx, mut command_rx) = mpsc::channel::<PlayerCommand>(COMMAND_QUEUE);
    let mut watching = false;

    if event_tx
        .send(HubEvent::ReporterConnected {
            source_id,
            commands: command_tx,
        })
        .await
        .is_err()
    {
        warn!("HubEvent channel closed");
        return;
    }

    // Send Hello with current state snapshot on connect
    let state = state_rx.borrow_and_update().clone();
    let hello = Reply::Hello {
        protocol_version: PROTOCOL_VERSION,
        source_id,
        state,
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = frames.next(&mut read_half) => {
                let request = match result {
                    Ok(Some(Message::Request(request))) => request,
                    Ok(Some(Message::Reply(_))) => {
                        debug!("Client {} sent a reply frame, ignoring", source_id);
                        continue;
                    }
                    Ok(None) => {
                        info!("Client {} closed connection", source_id);
                        break;
                    }
                    Err(e) if !e.is_fatal() => {
                        warn!("Client {} sent {}", source_id, e);
                        let reply = Reply::Error { message: e.to_string() };
                        if send(&mut write_half, reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", source_id, e);
                        break;
                    }
                };

                let reply = match request {
                    Request::UpdateInfo { info } => {
                        if event_tx.send(HubEvent::Update { source_id, report: info }).await.is_err() {
                            warn!("HubEvent channel closed");
                            return;
                        }
                        Some(Reply::Ack { status: "ok".to_string() })
                    }
                    Request::GetInfo => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        if event_tx.send(HubEvent::GetInfo(reply_tx)).await.is_err() {
                            warn!("HubEvent channel closed");
                            return;
                        }
                        match reply_rx.await {
                            Ok(media) => Some(Reply::Info { media }),
                            Err(_) => return,
                        }
                    }
                    Request::SendCommand { command } => {
                        info!("Client {} sent command {}", source_id, command);
                        if event_tx.send(HubEvent::SendCommand(command)).await.is_err() {
                            warn!("HubEvent channel closed");
                            return;
                        }
                        None
                    }
                    Request::Watch => {
                        watching = true;
                        let data = state_rx.borrow_and_update().clone();
                        Some(Reply::State { data })
                    }
                };

                if let Some(reply) = reply {
                    if send(&mut write_half, reply).await.is_err() {
                        break;
                    }
                }
            }

            Some(command) = command_rx.recv() => {
                if send(&mut write_half, Reply::Command { command }).await.is_err() {
                    break;
                }
            }

            changed = state_rx.changed(), if watching => {
                if changed.is_err() {
                    break;
                }
                let data = state_rx.borrow_and_update().clone();
                if send(&mut write_half, Reply::State { data }).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send(write_half: &mut OwnedWriteHalf, reply: Reply) -> anyhow::Result<()> {
    let encoded = Message::Reply(reply).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}
