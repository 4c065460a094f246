//! Length-prefixed framing for broker envelopes over a byte stream.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Length prefix in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    len: usize,
}

impl FrameHeader {
    pub const LEN: usize = 4;

    /// Header for an outgoing payload, checked against the frame limit.
    pub fn for_payload(payload: &[u8]) -> Result<Self> {
        Self::checked(payload.len())
    }

    pub fn decode(bytes: [u8; Self::LEN]) -> Result<Self> {
        Self::checked(u32::from_be_bytes(bytes) as usize)
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        // `checked` keeps len within u32 range.
        (self.len as u32).to_be_bytes()
    }

    pub fn payload_len(&self) -> usize {
        self.len
    }

    fn checked(len: usize) -> Result<Self> {
        if len > HostConfig::MAX_FRAME_SIZE {
            return Err(HostError::FrameTooLarge {
                len,
                max: HostConfig::MAX_FRAME_SIZE,
            });
        }
        Ok(Self { len })
    }
}

/// Read the next header, or `None` if the peer closed between frames.
async fn read_header<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<FrameHeader>> {
    let mut bytes = [0u8; FrameHeader::LEN];
    match reader.read_exact(&mut bytes).await {
        Ok(_) => FrameHeader::decode(bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read one frame payload. `None` means clean EOF.
///
/// EOF inside a payload is an error, not a clean close.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let Some(header) = read_header(reader).await? else {
        return Ok(None);
    };
    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Read a frame carrying one envelope as UTF-8 text.
pub async fn read_text_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<String>> {
    read_frame(reader)
        .await?
        .map(|payload| String::from_utf8(payload).map_err(|_| HostError::InvalidUtf8))
        .transpose()
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = FrameHeader::for_payload(payload)?;
    writer.write_all(&header.encode()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
