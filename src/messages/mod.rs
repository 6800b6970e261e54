//! Encoding and decoding of Postgres protocol messages.
//!
//! For more information, see the official Postgres docs:
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>

pub mod backend;
pub mod frontend;
mod reader;
mod response;

pub use reader::Reader;
pub use response::PgErrorResponse;
