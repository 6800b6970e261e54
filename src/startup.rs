use bytes::Bytes;

use crate::{connection::Connection, messages::frontend};

const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0);

/// Postgres protocol version number.
///
/// The version is encoded as a 32-bit integer where the upper 16 bits represent
/// the major version and the lower 16 bits represent the minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | (minor as u32))
    }

    pub fn major(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn minor(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u32> for ProtocolVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ProtocolVersion> for u32 {
    fn from(value: ProtocolVersion) -> Self {
        value.0
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Builder for the startup parameters and credentials of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    user: String,
    password: Option<String>,
    protocol: ProtocolVersion,
    options: Vec<(String, String)>,
}

impl ConnectionBuilder {
    /// Creates a new connection builder with the specified user.
    ///
    /// Defaults to no password, protocol version 3.0 and a database named
    /// after the user.
    ///
    /// Only MD5 password authentication is supported. A server that skips
    /// the password challenge (trust auth) is rejected with
    /// [`Error::ProtocolSequence`](crate::Error::ProtocolSequence), and an
    /// MD5 challenge without a password fails with
    /// [`Error::PasswordRequired`](crate::Error::PasswordRequired).
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();

        Self {
            options: vec![
                ("user".into(), user.clone()),
                ("database".into(), user.clone()),
                ("application_name".into(), env!("CARGO_PKG_NAME").into()),
            ],
            user,
            password: None,
            protocol: CURRENT_VERSION,
        }
    }

    /// Sets the database name to connect to.
    pub fn database(self, db: impl Into<String>) -> Self {
        self.add_option("database", db)
    }

    /// Sets the username for authentication.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        let user = self.user.clone();
        self.add_option("user", user)
    }

    pub fn application_name(self, name: impl Into<String>) -> Self {
        self.add_option("application_name", name)
    }

    /// Sets the password sent in answer to an MD5 challenge.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the Postgres protocol version.
    pub fn protocol(mut self, protocol: impl Into<ProtocolVersion>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Adds a startup parameter option, replacing any earlier value for
    /// the same key while keeping its position.
    pub fn add_option(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        let key = key.into();
        let val = val.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = val,
            None => self.options.push((key, val)),
        }
        self
    }

    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    pub fn startup_message(&self) -> Bytes {
        frontend::startup(
            self.protocol.major(),
            self.protocol.minor(),
            self.options.as_slice(),
        )
    }

    /// Creates a connection in the connecting phase with the startup
    /// message queued.
    pub fn build(&self) -> Connection {
        Connection::new(
            self.user.clone(),
            self.password.clone(),
            self.startup_message(),
        )
    }
}
