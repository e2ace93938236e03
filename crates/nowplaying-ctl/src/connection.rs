use anyhow::Context;
use nowplaying_proto::protocol::{
    FrameReader, Message, Reply, Request, SourceId, PROTOCOL_VERSION,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// What the hub told us in its hello.
#[derive(Debug, Clone)]
pub struct Session {
    pub source_id: SourceId,
}

pub struct HubReader {
    read_half: OwnedReadHalf,
    frames: FrameReader,
}

pub struct HubWriter {
    write_half: OwnedWriteHalf,
}

/// Connect and wait for the hub's hello.
pub async fn connect(address: &str) -> anyhow::Result<(Session, HubReader, HubWriter)> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("connecting to hub at {}", address))?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = HubReader {
        read_half,
        frames: FrameReader::new(),
    };

    match reader.recv().await? {
        Some(Reply::Hello {
            protocol_version,
            source_id,
            ..
        }) => {
            if protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "hub speaks protocol {}, this client speaks {}",
                    protocol_version,
                    PROTOCOL_VERSION
                );
            }
            debug!("connected as source {}", source_id);
            Ok((
                Session { source_id },
                reader,
                HubWriter { write_half },
            ))
        }
        Some(other) => anyhow::bail!("expected hello from hub, got {:?}", other),
        None => anyhow::bail!("hub closed the connection before saying hello"),
    }
}

impl HubReader {
    /// Next reply, or `None` once the hub hung up.  Undecodable frames are
    /// logged and skipped.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Reply>> {
        loop {
            match self.frames.next(&mut self.read_half).await {
                Ok(Some(Message::Reply(reply))) => return Ok(Some(reply)),
                Ok(Some(Message::Request(request))) => {
                    debug!("hub sent a request frame, ignoring: {:?}", request);
                }
                Ok(None) => return Ok(None),
                Err(e) if !e.is_fatal() => warn!("skipping frame from hub: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl HubWriter {
    pub async fn send(&mut self, request: Request) -> anyhow::Result<()> {
        let encoded = Message::Request(request).encode()?;
        self.write_half.write_all(&encoded).await?;
        Ok(())
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.write_half.shutdown().await?;
        Ok(())
    }
}
