//! Hardware link server: one authenticated byte stream per train.
//!
//! A connection starts with the access-key frame. After that the reader
//! turns event frames into interlocking calls, while a writer task drains
//! the train's command queue onto the stream. Any protocol error closes that
//! connection alone and takes the train offline.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::codec::{decode_access_key, read_frame, write_frame, TrainCommand, TrainEvent};
use crate::error::LinkError;
use crate::interlocking::Interlocking;
use crate::traits::TrainLink;

/// [`TrainLink`] feeding a connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<TrainCommand>,
}

impl ChannelLink {
    /// Link plus the receiving end its writer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrainCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TrainLink for ChannelLink {
    fn send(&self, command: TrainCommand) -> Result<(), LinkError> {
        self.tx.send(command).map_err(|_| LinkError::Closed)
    }
}

/// Accept train connections on `addr` forever.
pub async fn run_link_server(
    interlocking: Arc<Interlocking>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Hardware link listening on {addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{peer}: could not disable Nagle: {e}");
        }
        let interlocking = Arc::clone(&interlocking);
        tokio::spawn(async move {
            match serve_train(interlocking, stream).await {
                Ok(()) => debug!("{peer}: connection closed"),
                Err(e) => warn!("{peer}: {e}"),
            }
        });
    }
}

/// Run one train connection to completion.
///
/// Returns `Ok` when the peer closes the stream, including before it
/// authenticated.
pub async fn serve_train<S>(interlocking: Arc<Interlocking>, stream: S) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let Some(auth) = read_frame(&mut reader).await? else {
        return Ok(());
    };
    let access_key = decode_access_key(&auth)?;

    let (link, mut commands) = ChannelLink::new();
    let train = interlocking.connect(access_key, Arc::new(link))?;
    let train_id = train.id();

    let writer_task = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if let Err(e) = write_frame(&mut writer, &command.encode()).await {
                warn!("train {train_id}: write failed: {e}");
                break;
            }
        }
    });

    let result = read_events(&interlocking, train_id, &mut reader).await;

    interlocking.disconnect(train_id);
    writer_task.abort();
    result
}

async fn read_events<R>(
    interlocking: &Interlocking,
    train_id: u8,
    reader: &mut R,
) -> Result<(), LinkError>
where
    R: AsyncRead + Unpin,
{
    while let Some(payload) = read_frame(reader).await? {
        if payload.is_empty() {
            continue;
        }
        match TrainEvent::decode(&payload)? {
            TrainEvent::ReedSwitchTriggered => interlocking.reed_switch_triggered(train_id),
            TrainEvent::SwitchSucceeded => interlocking.switch_result(train_id, true),
            TrainEvent::SwitchFailed => interlocking.switch_result(train_id, false),
        }
    }
    Ok(())
}
