//! Drivers that run a [`Connection`] over a byte stream.
//!
//! Each iteration flushes the queued outbound bytes, reads one frame
//! (exactly 5 header bytes, then the declared payload) and feeds it to
//! the state machine.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::{
    ConnectionBuilder, Error, Result,
    connection::{Command, Connection, ProtocolEvent},
    messages::backend::{FrameHeader, HEADER_LEN, MessageCode, PgFrame},
};

/// The two operations the protocol engine needs from a byte stream.
pub trait Transport {
    /// Writes all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Blocks until exactly `n` bytes have been read.
    fn receive_exact(&mut self, n: usize) -> Result<Bytes>;
}

impl<S: Read + Write> Transport for S {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        self.flush()?;
        Ok(())
    }

    fn receive_exact(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(n);
        self.read_exact(&mut buf).map_err(map_read_err)?;
        Ok(buf.freeze())
    }
}

fn map_read_err(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Transport(err),
    }
}

/// Reads one complete backend frame.
pub fn read_frame(transport: &mut impl Transport) -> Result<PgFrame> {
    let header = FrameHeader::parse(&transport.receive_exact(HEADER_LEN)?)?;
    let body = transport.receive_exact(header.payload_len())?;
    PgFrame::from_parts(header, body)
}

/// Returns true once startup is over.
fn startup_step(event: ProtocolEvent) -> Result<bool> {
    match event {
        ProtocolEvent::Ready(_) => Ok(true),
        ProtocolEvent::Fatal(err) => Err(Error::Server(err)),
        _ => Ok(false),
    }
}

/// Collects the outcome of one simple query until the backend is ready again.
#[derive(Default)]
struct QueryProgress {
    completed: Option<Command>,
    error: Option<Error>,
}

impl QueryProgress {
    /// Returns true once the backend is ready for the next query.
    ///
    /// Non-fatal failures are held back until ReadyForQuery so the
    /// connection is not left mid-query.
    fn step(&mut self, polled: Result<ProtocolEvent>) -> Result<bool> {
        let event = match polled {
            Ok(event) => event,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "query failed, draining until ready");
                self.error.get_or_insert(err);
                return Ok(false);
            }
        };

        match event {
            ProtocolEvent::Ready(_) => return Ok(true),
            ProtocolEvent::QueryComplete(cmd) => self.completed = Some(cmd),
            // the first error aborts the rest of a multi-statement query
            ProtocolEvent::ServerError(err) => {
                self.error.get_or_insert(Error::Server(err));
            }
            ProtocolEvent::Fatal(err) => return Err(Error::Server(err)),
            _ => {}
        }
        Ok(false)
    }

    fn finish(self, conn: &Connection) -> Result<Command> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.completed.ok_or(Error::ProtocolSequence {
            message: MessageCode::READY_FOR_QUERY,
            phase: conn.phase(),
        })
    }
}

/// A blocking Postgres session over any [`Transport`].
pub struct Session<T> {
    transport: T,
    conn: Connection,
}

impl<T: Transport> Session<T> {
    /// Performs the startup handshake, handles authentication, and waits for
    /// the server to be ready for queries.
    pub fn connect(builder: &ConnectionBuilder, transport: T) -> Result<Self> {
        let mut session = Session {
            transport,
            conn: builder.build(),
        };

        while !startup_step(session.next_event()?)? {}
        debug!(
            process_id = ?session.conn.process_id(),
            "connection ready for queries"
        );
        Ok(session)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the session and returns the underlying transport and state.
    pub fn into_parts(self) -> (T, Connection) {
        (self.transport, self.conn)
    }

    /// Sends every queued message.
    pub fn flush(&mut self) -> Result<()> {
        let out = self.conn.take_outbound();
        if !out.is_empty() {
            trace!(len = out.len(), "send");
            self.transport.send(&out)?;
        }
        Ok(())
    }

    /// Flushes, then reads and applies a single frame.
    pub fn next_event(&mut self) -> Result<ProtocolEvent> {
        self.flush()?;
        let frame = read_frame(&mut self.transport)?;
        self.conn.poll(&frame)
    }

    /// Runs a simple query to completion.
    ///
    /// Server errors and value decoding failures are returned only after
    /// the backend is ready again, so the session stays usable.
    pub fn simple_query(&mut self, stmt: &str) -> Result<Command> {
        self.conn.submit_query(stmt)?;

        let mut progress = QueryProgress::default();
        while !progress.step(self.next_event())? {}
        progress.finish(&self.conn)
    }

    /// Sends Terminate and hands back the transport.
    pub fn close(mut self) -> Result<T> {
        self.conn.terminate();
        self.flush()?;
        Ok(self.transport)
    }
}

#[cfg(feature = "tokio")]
pub use self::tokio_impl::{AsyncSession, read_frame_async};

#[cfg(feature = "tokio")]
mod tokio_impl {
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
    use tracing::{debug, trace};

    use super::{QueryProgress, map_read_err, startup_step};
    use crate::{
        ConnectionBuilder, Result,
        connection::{Command, Connection, ProtocolEvent},
        messages::backend::{FrameHeader, HEADER_LEN, PgFrame},
    };

    /// Reads one complete backend frame (async).
    pub async fn read_frame_async(mut stream: impl AsyncRead + Unpin) -> Result<PgFrame> {
        let mut buf = [0; HEADER_LEN];
        stream.read_exact(&mut buf).await.map_err(map_read_err)?;
        let header = FrameHeader::parse(&buf)?;

        let mut body = vec![0; header.payload_len()];
        stream.read_exact(&mut body).await.map_err(map_read_err)?;
        PgFrame::from_parts(header, body)
    }

    /// A Postgres session over a tokio stream.
    pub struct AsyncSession<S> {
        stream: S,
        conn: Connection,
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> AsyncSession<S> {
        /// Performs the startup handshake, handles authentication, and waits for
        /// the server to be ready for queries.
        pub async fn connect(builder: &ConnectionBuilder, stream: S) -> Result<Self> {
            let mut session = AsyncSession {
                stream,
                conn: builder.build(),
            };

            while !startup_step(session.next_event().await?)? {}
            debug!(
                process_id = ?session.conn.process_id(),
                "connection ready for queries"
            );
            Ok(session)
        }

        pub fn connection(&self) -> &Connection {
            &self.conn
        }

        pub fn into_parts(self) -> (S, Connection) {
            (self.stream, self.conn)
        }

        /// Sends every queued message (async).
        pub async fn flush(&mut self) -> Result<()> {
            let mut out = self.conn.take_outbound();
            if !out.is_empty() {
                trace!(len = out.len(), "send");
                self.stream.write_all_buf(&mut out).await?;
                self.stream.flush().await?;
            }
            Ok(())
        }

        /// Flushes, then reads and applies a single frame (async).
        pub async fn next_event(&mut self) -> Result<ProtocolEvent> {
            self.flush().await?;
            let frame = read_frame_async(&mut self.stream).await?;
            self.conn.poll(&frame)
        }

        /// Runs a simple query to completion (async).
        pub async fn simple_query(&mut self, stmt: &str) -> Result<Command> {
            self.conn.submit_query(stmt)?;

            let mut progress = QueryProgress::default();
            while !progress.step(self.next_event().await)? {}
            progress.finish(&self.conn)
        }

        /// Sends Terminate and hands back the stream (async).
        pub async fn close(mut self) -> Result<S> {
            self.conn.terminate();
            self.flush().await?;
            Ok(self.stream)
        }
    }
}
