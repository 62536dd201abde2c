//! Binary frame protocol spoken by the eZ80 drive controllers.
//!
//! A frame is the controller's ASCII node id, a two byte length (high byte
//! first), one ASCII command byte and then `length` payload bytes.

pub mod codec;
pub mod command;
pub mod drive;
pub mod error;
pub mod io;
pub mod ticks;

pub use codec::{Field, Fields, Header, UpdatePayload, Value, decode, encode};
pub use command::Command;
pub use drive::{ArmDrive, ArmTarget, DriveRequest, Speed, ZeroSelection};
pub use error::{FrameError, ProtocolError};
pub use io::{Frame, read_frame, write_frame};
pub use ticks::{MAX_TICKS, pack_ticks, unpack_ticks};
