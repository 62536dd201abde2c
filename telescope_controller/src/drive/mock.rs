//! In-process stand-in for an eZ80 drive controller.
//!
//! Connections are served one at a time, in accept order, so a client that
//! keeps an old connection open while starting a new one stalls. Every frame
//! received is recorded per connection.

use std::sync::{Arc, Mutex};

use ez80::{Command, Frame, ProtocolError, pack_ticks, read_frame, write_frame};
use tokio::{net::TcpListener, task::JoinHandle};

use crate::config::DriveConfig;

pub type Reply = (Command, Vec<u8>);
pub type Script = Box<dyn FnMut(&Frame) -> Vec<Reply> + Send>;

pub struct MockController {
    pub port: u16,
    conversations: Arc<Mutex<Vec<Vec<(Command, Vec<u8>)>>>>,
    task: JoinHandle<()>,
}

impl MockController {
    pub async fn start(node: &'static str, mut script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conversations = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&conversations);
        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let index = {
                    let mut log = log.lock().unwrap();
                    log.push(Vec::new());
                    log.len() - 1
                };
                while let Ok(frame) = read_frame(&mut socket, node.as_bytes()).await {
                    log.lock().unwrap()[index].push((frame.command(), frame.payload.clone()));
                    for (command, payload) in script(&frame) {
                        if write_frame(&mut socket, node.as_bytes(), command, &payload)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            port,
            conversations,
            task,
        }
    }

    /// Frames received so far, grouped by connection.
    pub fn conversations(&self) -> Vec<Vec<(Command, Vec<u8>)>> {
        self.conversations.lock().unwrap().clone()
    }

    /// Commands received so far across all connections.
    pub fn commands(&self) -> Vec<Command> {
        self.conversations()
            .into_iter()
            .flatten()
            .map(|(command, _)| command)
            .collect()
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn status(code: u8) -> Reply {
    (Command::Status, vec![code])
}

pub fn update(east: u32, west: u32) -> Reply {
    let mut payload = vec![0];
    payload.extend_from_slice(&pack_ticks(east).unwrap());
    payload.push(0);
    payload.extend_from_slice(&pack_ticks(west).unwrap());
    (Command::Update, payload)
}

/// Decodes the target counts of a drive frame. Single-arm frames fill the
/// other arm with `None`.
pub fn drive_targets(frame: &Frame) -> Result<(Option<u32>, Option<u32>), ProtocolError> {
    let ticks = |bytes: &[u8]| ez80::unpack_ticks([bytes[0], bytes[1], bytes[2]]);
    match frame.command() {
        Command::DriveBoth => Ok((
            Some(ticks(&frame.payload[0..3])),
            Some(ticks(&frame.payload[3..6])),
        )),
        Command::DriveEast => Ok((Some(ticks(&frame.payload[0..3])), None)),
        Command::DriveWest => Ok((None, Some(ticks(&frame.payload[0..3])))),
        other => Err(ProtocolError::UnexpectedCommand(other.as_char())),
    }
}

/// A controller whose arms sit still at the given counts and accept every
/// command without ever finishing a drive.
pub fn idle_at(east: u32, west: u32) -> Script {
    Box::new(move |frame: &Frame| match frame.command() {
        Command::Update => vec![update(east, west), status(0)],
        _ => vec![status(0)],
    })
}

/// A controller whose arms jump straight to every commanded count and
/// report the drive finished.
pub fn obedient(east: u32, west: u32) -> Script {
    let mut position = (east, west);
    Box::new(move |frame: &Frame| match frame.command() {
        Command::Update => vec![update(position.0, position.1), status(0)],
        Command::DriveBoth | Command::DriveEast | Command::DriveWest => {
            if let Ok((east, west)) = drive_targets(frame) {
                position = (east.unwrap_or(position.0), west.unwrap_or(position.1));
            }
            vec![status(0), update(position.0, position.1), status(0)]
        }
        _ => vec![status(0)],
    })
}

/// Drive settings pointing at a mock on `port`, with quick timeouts.
pub fn drive_config(node: &str, port: u16, base: DriveConfig) -> DriveConfig {
    DriveConfig {
        node_name: node.to_string(),
        ip: "127.0.0.1".to_string(),
        port,
        timeout_ms: 5000,
        interrupt_timeout_ms: 1000,
        ..base
    }
}
