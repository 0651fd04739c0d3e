//! Wire format of the hardware link.
//!
//! Every frame is one length byte followed by that many payload bytes:
//!
//! ```text
//! +--------+---------------------+
//! | len u8 | payload (len bytes) |
//! +--------+---------------------+
//! ```
//!
//! | Direction | Payload | Meaning |
//! |-----------|---------|---------|
//! | train → controller | `k0 k1 k2 k3` | access key (first frame, little-endian) |
//! | train → controller | `1` | reed switch triggered |
//! | train → controller | `2` | points switched |
//! | train → controller | `3` | points failed to switch |
//! | controller → train | `1 speed` | forward at `speed` |
//! | controller → train | `2` | backward |
//! | controller → train | `3` | fast stop |
//! | controller → train | `4` | set points to passthrough |
//! | controller → train | `5` | set points to detour |

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::LinkError;

/// Largest payload the length prefix can describe.
pub const MAX_FRAME: usize = u8::MAX as usize;

/// Frame payload buffer.
pub type Payload = heapless::Vec<u8, MAX_FRAME>;

/// Event reported by a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainEvent {
    /// The train crossed a block boundary.
    ReedSwitchTriggered,
    /// The points the train actuated have moved.
    SwitchSucceeded,
    /// The points the train actuated did not move.
    SwitchFailed,
}

impl TrainEvent {
    /// Wire code.
    pub fn code(&self) -> u8 {
        match self {
            Self::ReedSwitchTriggered => 1,
            Self::SwitchSucceeded => 2,
            Self::SwitchFailed => 3,
        }
    }

    /// Parse an event payload.
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        match payload.first() {
            None => Err(LinkError::EmptyFrame),
            Some(1) => Ok(Self::ReedSwitchTriggered),
            Some(2) => Ok(Self::SwitchSucceeded),
            Some(3) => Ok(Self::SwitchFailed),
            Some(&other) => Err(LinkError::UnknownEvent(other)),
        }
    }
}

/// Command sent to a train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainCommand {
    /// Run forward at the given absolute speed.
    Forward(u8),
    /// Run backward.
    Backward,
    /// Stop immediately.
    FastStop,
    /// Move the points under the train to the through route.
    SwitchPassthrough,
    /// Move the points under the train to the detour.
    SwitchDetour,
}

impl TrainCommand {
    /// Wire payload.
    pub fn encode(&self) -> Payload {
        let bytes: &[u8] = match self {
            Self::Forward(speed) => &[1, *speed],
            Self::Backward => &[2],
            Self::FastStop => &[3],
            Self::SwitchPassthrough => &[4],
            Self::SwitchDetour => &[5],
        };
        let mut payload = Payload::new();
        // At most two bytes, always fits.
        let _ = payload.extend_from_slice(bytes);
        payload
    }

    /// Parse a command payload (used by firmware simulators and tests).
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        match payload {
            [] => Err(LinkError::EmptyFrame),
            [1, speed, ..] => Ok(Self::Forward(*speed)),
            [2, ..] => Ok(Self::Backward),
            [3, ..] => Ok(Self::FastStop),
            [4, ..] => Ok(Self::SwitchPassthrough),
            [5, ..] => Ok(Self::SwitchDetour),
            [code, ..] => Err(LinkError::UnknownCommand(*code)),
        }
    }
}

/// Parse the authentication payload.
pub fn decode_access_key(payload: &[u8]) -> Result<u32, LinkError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| LinkError::BadAccessKey(payload.len()))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Build the authentication payload.
pub fn encode_access_key(key: u32) -> [u8; 4] {
    key.to_le_bytes()
}

/// Read one frame; `None` on a clean end of stream before the length byte.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Payload>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = usize::from(len[0]);
    let mut payload = Payload::new();
    payload
        .resize_default(len)
        .map_err(|_| LinkError::FrameTooLong(len))?;
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let len = u8::try_from(payload.len()).map_err(|_| LinkError::FrameTooLong(payload.len()))?;
    let mut frame: heapless::Vec<u8, { MAX_FRAME + 1 }> = heapless::Vec::new();
    let _ = frame.push(len);
    let _ = frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_carries_speed() {
        assert_eq!(TrainCommand::Forward(120).encode().as_slice(), &[1, 120]);
        assert_eq!(TrainCommand::FastStop.encode().as_slice(), &[3]);
        assert_eq!(
            TrainCommand::decode(&[1, 42]).unwrap(),
            TrainCommand::Forward(42)
        );
    }

    #[test]
    fn unknown_codes_are_errors() {
        assert!(matches!(
            TrainEvent::decode(&[9]),
            Err(LinkError::UnknownEvent(9))
        ));
        assert!(matches!(TrainEvent::decode(&[]), Err(LinkError::EmptyFrame)));
        assert!(matches!(
            TrainCommand::decode(&[0]),
            Err(LinkError::UnknownCommand(0))
        ));
    }

    #[test]
    fn access_key_is_little_endian() {
        assert_eq!(decode_access_key(&[0x78, 0x56, 0x34, 0x12]).unwrap(), 0x1234_5678);
        assert!(matches!(
            decode_access_key(&[1, 2, 3]),
            Err(LinkError::BadAccessKey(3))
        ));
    }

    #[tokio::test]
    async fn frames_keep_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[1]).await.unwrap();
        write_frame(&mut a, &[]).await.unwrap();
        write_frame(&mut a, &[3, 4, 5]).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().as_slice(), &[1]);
        assert!(read_frame(&mut b).await.unwrap().unwrap().is_empty());
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().as_slice(), &[3, 4, 5]);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let (mut a, _b) = tokio::io::duplex(16);
        let big = [0u8; MAX_FRAME + 1];
        assert!(matches!(
            write_frame(&mut a, &big).await,
            Err(LinkError::FrameTooLong(256))
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(16);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[5, 1, 2]).await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(LinkError::Io(_))));
    }
}
