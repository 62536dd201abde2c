use std::{io, time::Duration};

use ez80::{Command, Frame, read_frame, write_frame};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::drive::error::DriveError;

/// One connection to a drive controller. Fail-fast: no retries, every
/// operation bounded by `timeout`.
pub struct DriveLink<S = TcpStream> {
    node: String,
    stream: S,
    timeout: Duration,
}

impl DriveLink<TcpStream> {
    pub async fn open(node: &str, addr: &str, timeout_after: Duration) -> Result<Self, DriveError> {
        let connect_error = |source| DriveError::Connect {
            addr: addr.to_string(),
            source,
        };

        let stream = timeout(timeout_after, TcpStream::connect(addr))
            .await
            .map_err(|_| connect_error(timed_out("connect")))?
            .map_err(connect_error)?;
        stream.set_nodelay(true)?;

        debug!(node, addr, "Opened drive link");
        Ok(Self::from_stream(node, stream, timeout_after))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> DriveLink<S> {
    pub fn from_stream(node: &str, stream: S, timeout: Duration) -> Self {
        Self {
            node: node.to_string(),
            stream,
            timeout,
        }
    }

    pub async fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), DriveError> {
        debug!(node = %self.node, %command, ?payload, "Sending frame");
        timeout(
            self.timeout,
            write_frame(&mut self.stream, self.node.as_bytes(), command, payload),
        )
        .await
        .map_err(|_| timed_out("send"))??;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Frame, DriveError> {
        let frame = timeout(
            self.timeout,
            read_frame(&mut self.stream, self.node.as_bytes()),
        )
        .await
        .map_err(|_| timed_out("receive"))??;

        debug!(
            node = %self.node,
            command = %frame.command(),
            payload = ?frame.payload,
            "Received frame"
        );
        Ok(frame)
    }

    pub async fn close(mut self) -> Result<(), DriveError> {
        self.stream.shutdown().await?;
        debug!(node = %self.node, "Closed drive link");
        Ok(())
    }
}

fn timed_out(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("Timed out waiting to {} frame", operation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ez80::ProtocolError;

    #[tokio::test]
    async fn exchanges_frames_with_the_controller() {
        let (near, mut far) = tokio::io::duplex(256);
        let mut link = DriveLink::from_stream("NSDRIVE", near, Duration::from_secs(1));

        link.send(Command::Update, &[]).await.unwrap();
        let query = read_frame(&mut far, b"NSDRIVE").await.unwrap();
        assert_eq!(query.command(), Command::Update);

        write_frame(&mut far, b"NSDRIVE", Command::Status, &[0])
            .await
            .unwrap();
        let reply = link.receive().await.unwrap();
        assert_eq!(reply.command(), Command::Status);
        assert_eq!(reply.code(), Ok(0));
    }

    #[tokio::test]
    async fn silent_controller_times_out() {
        let (near, _far) = tokio::io::duplex(256);
        let mut link = DriveLink::from_stream("NSDRIVE", near, Duration::from_millis(50));

        match link.receive().await {
            Err(DriveError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other.map(|f| f.command())),
        }
    }

    #[tokio::test]
    async fn unknown_command_is_a_protocol_error() {
        let (near, mut far) = tokio::io::duplex(256);
        let mut link = DriveLink::from_stream("MD", near, Duration::from_secs(1));

        far.write_all(b"MD\x00\x01Z\x00").await.unwrap();
        assert!(matches!(
            link.receive().await,
            Err(DriveError::Protocol(ProtocolError::UnknownCommand(b'Z')))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = DriveLink::open("NSDRIVE", &addr, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DriveError::Connect { .. })));
    }
}
