//! Serial-to-network relay for trains whose onboard unit speaks over a
//! serial device (typically a Bluetooth RFCOMM port).
//!
//! The port is opened non-blocking, so a read waiting on a silent unit
//! never holds up commands written to it.
//!
//! The unit only reveals its access token when asked: the bridge writes
//! [`TOKEN_REQUEST`], reads four raw bytes, and sends them to the server as
//! the authentication frame. After that frames pass through untouched in
//! both directions until either side closes.

use log::info;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialStream};

use super::codec::{read_frame, write_frame};
use crate::error::LinkError;

/// Byte that asks the onboard unit for its access token.
pub const TOKEN_REQUEST: u8 = 255;

/// Open a serial port at `baud`, 8 data bits. Must run inside the runtime.
pub fn open_device(path: &str, baud: u32) -> std::io::Result<SerialStream> {
    let port = tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .open_native_async()?;
    Ok(port)
}

/// Authenticate `device` against `network`, then relay until one side closes.
pub async fn run_bridge<D, N>(device: D, network: N) -> Result<(), LinkError>
where
    D: AsyncRead + AsyncWrite,
    N: AsyncRead + AsyncWrite,
{
    let (mut device_rx, mut device_tx) = tokio::io::split(device);
    let (network_rx, mut network_tx) = tokio::io::split(network);

    device_tx.write_all(&[TOKEN_REQUEST]).await?;
    device_tx.flush().await?;
    let mut token = [0u8; 4];
    device_rx.read_exact(&mut token).await?;
    write_frame(&mut network_tx, &token).await?;
    info!("bridge authenticated, relaying");

    // Each direction runs whole; only the finished one ends the other.
    tokio::select! {
        result = relay(device_rx, network_tx) => result,
        result = relay(network_rx, device_tx) => result,
    }
}

async fn relay<R, W>(mut from: R, mut to: W) -> Result<(), LinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = read_frame(&mut from).await? {
        write_frame(&mut to, &frame).await?;
    }
    Ok(())
}
