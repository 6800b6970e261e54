//! A client-side Postgres wire protocol engine.
//!
//! [`messages`] frames and parses protocol bytes, [`connection`] tracks the
//! session as a sans-I/O state machine, and [`Session`] / [`AsyncSession`]
//! drive that machine over a blocking or tokio byte stream.

pub mod connection;
mod error;
pub mod messages;
mod session;
pub mod startup;
pub mod types;

pub use connection::{Command, Connection, Field, Phase, ProtocolEvent, Row, TransactionStatus};
pub use error::{Error, Result};
pub use session::{Session, Transport, read_frame};
#[cfg(feature = "tokio")]
pub use session::{AsyncSession, read_frame_async};
pub use startup::{ConnectionBuilder, ProtocolVersion};
pub use types::Value;
