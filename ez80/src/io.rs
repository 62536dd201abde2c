//! Frame transfer over any async byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    codec::{Header, encode},
    command::Command,
    error::{FrameError, ProtocolError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn command(&self) -> Command {
        self.header.command
    }

    /// The single status byte carried by info, warning, status, error and
    /// socket-count frames.
    pub fn code(&self) -> Result<u8, ProtocolError> {
        match self.payload.as_slice() {
            [code] => Ok(*code),
            other => Err(ProtocolError::PayloadLength {
                command: self.command().as_char(),
                len: other.len(),
                expected: 1,
            }),
        }
    }
}

pub async fn write_frame(
    writer: &mut (impl AsyncWrite + Unpin),
    node: &[u8],
    command: Command,
    payload: &[u8],
) -> Result<(), FrameError> {
    let (header, payload) = encode(node, command, payload)?;
    writer.write_all(&header).await?;
    if !payload.is_empty() {
        writer.write_all(&payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. The header must name `node`; no resynchronisation is
/// attempted after a malformed frame.
pub async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
    node: &[u8],
) -> Result<Frame, FrameError> {
    let mut header = vec![0; Header::size(node.len())];
    reader.read_exact(&mut header).await?;
    let header = Header::decode(&header, node.len())?;

    if header.node != node {
        return Err(ProtocolError::NodeMismatch {
            expected: String::from_utf8_lossy(node).into_owned(),
            found: String::from_utf8_lossy(&header.node).into_owned(),
        }
        .into());
    }

    let mut payload = vec![0; usize::from(header.length)];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await?;
    }

    Ok(Frame { header, payload })
}
