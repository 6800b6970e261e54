//! The client side of a Postgres session as a sans-I/O state machine.
//!
//! A [`Connection`] never touches a socket. The caller feeds it one
//! backend frame at a time through [`Connection::poll`] and ships whatever
//! [`Connection::take_outbound`] returns back to the server.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, info, trace, warn};

use crate::{
    Error, Result,
    messages::{
        PgErrorResponse, Reader,
        backend::{MessageCode, PgFrame},
        frontend,
    },
};

mod command;

pub use command::{Command, Field, Row};

const AUTH_OK: i32 = 0;
const AUTH_MD5_PASSWORD: i32 = 5;

/// Coarse lifecycle stage of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Startup sent, waiting for an authentication request.
    Connecting,
    /// A password response was sent, waiting for AuthenticationOk.
    Authenticating,
    /// Authenticated, waiting for the first ReadyForQuery.
    Authenticated,
    ReadyForQuery,
    QueryInFlight,
    ShuttingDown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Connecting => "connecting",
            Phase::Authenticating => "authenticating",
            Phase::Authenticated => "authenticated",
            Phase::ReadyForQuery => "ready for query",
            Phase::QueryInFlight => "running a query",
            Phase::ShuttingDown => "shutting down",
        };
        write!(f, "{name}")
    }
}

/// Backend transaction state reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            _ => Err(Error::Framing("unknown transaction status")),
        }
    }
}

/// The server's answer to a startup request for a newer minor protocol
/// version or for options it does not recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolNegotiation {
    pub newest_minor: i32,
    pub unrecognized_options: Vec<String>,
}

/// What a single backend frame did to the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// An MD5 password challenge was answered; the response is queued.
    AuthChallenge,
    Authenticated,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ProtocolNegotiated(ProtocolNegotiation),
    /// The backend accepts the next query.
    Ready(TransactionStatus),
    RowDescription { columns: usize },
    RowReceived,
    QueryComplete(Command),
    ServerError(PgErrorResponse),
    Notice(PgErrorResponse),
    /// The backend reported an error that ends the session.
    Fatal(PgErrorResponse),
    /// A known message this engine does not act on.
    Unhandled(MessageCode, Bytes),
}

/// Client-visible state of one Postgres session.
pub struct Connection {
    user: String,
    password: Option<String>,
    phase: Phase,
    parameters: HashMap<String, String>,
    process_id: Option<i32>,
    secret_key: Option<i32>,
    transaction_status: Option<TransactionStatus>,
    negotiation: Option<ProtocolNegotiation>,
    command: Option<Command>,
    outbound: BytesMut,
}

impl Connection {
    /// Creates a connection with `startup` already queued for sending.
    pub(crate) fn new(user: String, password: Option<String>, startup: Bytes) -> Self {
        let mut outbound = BytesMut::with_capacity(startup.len());
        outbound.put(startup);

        Self {
            user,
            password,
            phase: Phase::Connecting,
            parameters: HashMap::new(),
            process_id: None,
            secret_key: None,
            transaction_status: None,
            negotiation: None,
            command: None,
            outbound,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Server parameters reported so far (e.g., server_version, client_encoding).
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Backend process ID, used to cancel queries on this connection.
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Secret key, used to cancel queries on this connection.
    pub fn secret_key(&self) -> Option<i32> {
        self.secret_key
    }

    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }

    pub fn negotiation(&self) -> Option<&ProtocolNegotiation> {
        self.negotiation.as_ref()
    }

    /// The latest submitted query, in flight or completed.
    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.phase,
            Phase::Authenticated | Phase::ReadyForQuery | Phase::QueryInFlight
        )
    }

    pub fn is_ready_for_query(&self) -> bool {
        self.phase == Phase::ReadyForQuery
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase == Phase::ShuttingDown
    }

    /// Bytes queued for the server that have not been taken yet.
    pub fn pending_outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Takes every queued message, leaving the queue empty.
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Queues a simple query. Only permitted while ready for query.
    pub fn submit_query(&mut self, stmt: impl Into<String>) -> Result<()> {
        if self.phase != Phase::ReadyForQuery {
            return Err(Error::ProtocolState { phase: self.phase });
        }
        let stmt = stmt.into();
        if stmt.contains('\0') {
            return Err(Error::NulInQuery);
        }

        let command = Command::new(stmt);
        debug!(query = %command.query_text, "submitting query");
        self.outbound.put(frontend::simple_query(&command.query_text));
        self.command = Some(command);
        self.phase = Phase::QueryInFlight;
        Ok(())
    }

    /// Queues a Terminate message and moves to [`Phase::ShuttingDown`].
    pub fn terminate(&mut self) {
        if self.phase == Phase::ShuttingDown {
            return;
        }
        debug!("terminating connection");
        self.outbound.put(frontend::termination());
        self.phase = Phase::ShuttingDown;
    }

    /// Applies one backend frame to the connection.
    pub fn poll(&mut self, frame: &PgFrame) -> Result<ProtocolEvent> {
        trace!(code = %frame.code, len = frame.body.len(), "recv");
        let mut reader = Reader::new(&frame.body);

        match frame.code {
            MessageCode::AUTHENTICATION => self.on_authentication(&mut reader),
            MessageCode::PARAMETER_STATUS => self.on_parameter_status(&mut reader),
            MessageCode::BACKEND_KEY_DATA => self.on_backend_key_data(&mut reader),
            MessageCode::NEGOTIATE_PROTOCOL_VERSION => self.on_negotiate_protocol(&mut reader),
            MessageCode::READY_FOR_QUERY => self.on_ready_for_query(&mut reader),
            MessageCode::ROW_DESCRIPTION => self.on_row_description(&mut reader),
            MessageCode::DATA_ROW => self.on_data_row(&mut reader),
            MessageCode::COMMAND_COMPLETE => self.on_command_complete(&mut reader),
            MessageCode::EMPTY_QUERY_RESPONSE => self.on_empty_query(),
            MessageCode::ERROR_RESPONSE => self.on_error_response(&mut reader),
            MessageCode::NOTICE_RESPONSE => {
                let notice = PgErrorResponse::decode(&mut reader)?;
                warn!(%notice, "server notice");
                Ok(ProtocolEvent::Notice(notice))
            }
            code if code.is_known() => {
                warn!(%code, "ignoring unhandled message");
                Ok(ProtocolEvent::Unhandled(code, frame.body.clone()))
            }
            code => Err(Error::UnknownMessageType(code.into())),
        }
    }

    fn unexpected(&self, message: MessageCode) -> Error {
        Error::ProtocolSequence {
            message,
            phase: self.phase,
        }
    }

    fn on_authentication(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        match reader.read_i32()? {
            AUTH_OK => {
                if self.phase != Phase::Authenticating {
                    return Err(self.unexpected(MessageCode::AUTHENTICATION));
                }
                info!(user = %self.user, "authentication successful");
                self.phase = Phase::Authenticated;
                Ok(ProtocolEvent::Authenticated)
            }
            AUTH_MD5_PASSWORD => {
                if self.phase != Phase::Connecting {
                    return Err(self.unexpected(MessageCode::AUTHENTICATION));
                }
                let salt = reader.read_array::<4>()?;
                let Some(password) = &self.password else {
                    return Err(Error::PasswordRequired);
                };

                debug!("handling salted md5 authentication");
                let msg = frontend::password_response_md5(&self.user, password, salt);
                self.outbound.put(msg);
                self.phase = Phase::Authenticating;
                Ok(ProtocolEvent::AuthChallenge)
            }
            code => {
                warn!(code, "unsupported authentication method");
                Err(Error::UnsupportedAuthMethod(code))
            }
        }
    }

    fn on_parameter_status(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let name = reader.read_cstring()?.to_owned();
        let value = reader.read_cstring()?.to_owned();
        debug!(%name, %value, "read param");

        self.parameters.insert(name.clone(), value.clone());
        Ok(ProtocolEvent::ParameterStatus { name, value })
    }

    fn on_backend_key_data(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let process_id = reader.read_i32()?;
        let secret_key = reader.read_i32()?;
        debug!(process_id, "read backend key data");

        self.process_id = Some(process_id);
        self.secret_key = Some(secret_key);
        Ok(ProtocolEvent::BackendKeyData {
            process_id,
            secret_key,
        })
    }

    fn on_negotiate_protocol(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let newest_minor = reader.read_i32()?;
        let count = reader.read_i32()?;
        let count = usize::try_from(count).map_err(|_| Error::Framing("negative option count"))?;

        let unrecognized_options = (0..count)
            .map(|_| reader.read_cstring().map(str::to_owned))
            .collect::<Result<Vec<_>>>()?;
        warn!(newest_minor, ?unrecognized_options, "server negotiated protocol version");

        let negotiation = ProtocolNegotiation {
            newest_minor,
            unrecognized_options,
        };
        self.negotiation = Some(negotiation.clone());
        Ok(ProtocolEvent::ProtocolNegotiated(negotiation))
    }

    fn on_ready_for_query(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        if !matches!(self.phase, Phase::Authenticated | Phase::QueryInFlight) {
            return Err(self.unexpected(MessageCode::READY_FOR_QUERY));
        }
        let status = TransactionStatus::try_from(reader.read_u8()?)?;

        self.transaction_status = Some(status);
        self.phase = Phase::ReadyForQuery;
        Ok(ProtocolEvent::Ready(status))
    }

    fn active_command(&mut self, message: MessageCode) -> Result<&mut Command> {
        let phase = self.phase;
        match (phase, self.command.as_mut()) {
            (Phase::QueryInFlight, Some(command)) => Ok(command),
            _ => Err(Error::ProtocolSequence { message, phase }),
        }
    }

    fn on_row_description(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let command = self.active_command(MessageCode::ROW_DESCRIPTION)?;
        let row = Row::decode_description(reader)?;
        let columns = row.len();
        command.rows.push(row);

        debug!(columns, "read row description");
        Ok(ProtocolEvent::RowDescription { columns })
    }

    fn on_data_row(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let phase = self.phase;
        let command = self.active_command(MessageCode::DATA_ROW)?;
        let sequence_err = || Error::ProtocolSequence {
            message: MessageCode::DATA_ROW,
            phase,
        };

        let Some(last) = command.rows.last() else {
            return Err(sequence_err());
        };
        let count = reader.read_i16()?;
        if usize::try_from(count).ok() != Some(last.len()) {
            return Err(sequence_err());
        }
        let values = last.decode_values(reader)?;
        debug!(?values, "read row");

        if last.is_populated() {
            let mut row = last.template();
            row.fill(values);
            command.rows.push(row);
        } else if let Some(last) = command.rows.last_mut() {
            last.fill(values);
        }
        Ok(ProtocolEvent::RowReceived)
    }

    fn on_command_complete(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let command = self.active_command(MessageCode::COMMAND_COMPLETE)?;
        let tag = reader.read_cstring()?.to_owned();
        debug!(%tag, "command complete");

        command.completed = true;
        command.tag = Some(tag);
        Ok(ProtocolEvent::QueryComplete(command.clone()))
    }

    fn on_empty_query(&mut self) -> Result<ProtocolEvent> {
        let command = self.active_command(MessageCode::EMPTY_QUERY_RESPONSE)?;
        debug!("empty query response");

        command.completed = true;
        Ok(ProtocolEvent::QueryComplete(command.clone()))
    }

    fn on_error_response(&mut self, reader: &mut Reader<'_>) -> Result<ProtocolEvent> {
        let resp = PgErrorResponse::decode(reader)?;

        // errors before authentication completes always end the session
        if !self.is_authenticated() || resp.is_fatal() {
            error!(error = %resp, phase = %self.phase, "fatal server error");
            self.phase = Phase::ShuttingDown;
            return Ok(ProtocolEvent::Fatal(resp));
        }

        error!(error = %resp, "server error");
        Ok(ProtocolEvent::ServerError(resp))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("user", &self.user)
            .field("phase", &self.phase)
            .field("parameters", &self.parameters)
            .field("process_id", &self.process_id)
            .field("transaction_status", &self.transaction_status)
            .field("command", &self.command)
            .field("pending_outbound", &self.outbound.len())
            .finish_non_exhaustive()
    }
}
