//! Transport abstraction over an authenticated SSH session.
//!
//! The orchestration layers only need three capabilities: connect and
//! authenticate, open a command channel, and upload a file. They are
//! expressed as traits so the libssh2-backed implementation in [`ssh`] can be
//! swapped for scripted doubles in tests.

use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;

use crate::auth::ResolvedIdentity;
use crate::target::RemoteTarget;

pub mod ssh;

pub use ssh::Ssh2Transport;

/// Errors raised by a transport implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the host name cannot be resolved.
    #[error("cannot resolve {host}:{port}")]
    Unresolvable {
        /// Host that failed to resolve.
        host: String,
        /// Port requested.
        port: u16,
    },
    /// Raised when an operation exceeds the configured timeout.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out.
        operation: String,
    },
    /// Raised when the server rejects every offered identity.
    #[error("server rejected all identities for user {user}")]
    AuthRejected {
        /// User the identities were offered for.
        user: String,
    },
    /// Raised for I/O failures on sockets or local files.
    #[error("{operation} failed: {message}")]
    Io {
        /// Operation that failed.
        operation: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised for SSH protocol level failures.
    #[error("{operation} failed: {message}")]
    Protocol {
        /// Operation that failed.
        operation: String,
        /// Underlying error text.
        message: String,
    },
}

/// Everything a transport needs to establish a session.
#[derive(Clone, Debug)]
pub struct ConnectRequest<'a> {
    /// Endpoint to reach.
    pub target: &'a RemoteTarget,
    /// User to authenticate as.
    pub user: &'a str,
    /// Identities to offer, in preference order.
    pub identities: &'a [ResolvedIdentity],
    /// Whether the host key must be verified. Only `false` is supported by
    /// the bundled transport.
    pub verify_host_key: bool,
}

/// Factory for authenticated sessions.
pub trait Transport {
    /// Session type returned by [`Transport::connect`].
    type Session: RemoteSession;

    /// Connects, performs the handshake, and authenticates.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint is unreachable, times out,
    /// fails the handshake, or rejects every identity.
    fn connect(&self, request: &ConnectRequest<'_>) -> Result<Self::Session, TransportError>;
}

/// An authenticated session able to run commands and receive files.
pub trait RemoteSession {
    /// Channel type returned by [`RemoteSession::open_exec`].
    type Channel: ExecChannel;

    /// Starts `command_line` on a fresh exec channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the channel cannot be opened.
    fn open_exec(&mut self, command_line: &str) -> Result<Self::Channel, TransportError>;

    /// Copies `local` to the absolute path `remote` over a file-transfer
    /// subchannel, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the local file cannot be read or the
    /// remote file cannot be written.
    fn upload(&mut self, local: &Utf8Path, remote: &str) -> Result<u64, TransportError>;
}

/// A running remote command.
///
/// Reads never block: `Ok(0)` means no bytes are available right now, not
/// end of stream.
pub trait ExecChannel {
    /// Reads available standard output into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport failures.
    fn read_stdout(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Reads available standard error into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport failures.
    fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Returns `true` once the remote side has closed the channel. Data may
    /// still be buffered after this reports `true`.
    fn is_closed(&mut self) -> bool;

    /// Blocks for at most `timeout` until output arrives or the channel
    /// closes. Returning early is always allowed.
    ///
    /// The default implementation simply sleeps.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport failures while waiting.
    fn wait_for_activity(&mut self, timeout: Duration) -> Result<(), TransportError> {
        std::thread::sleep(timeout);
        Ok(())
    }

    /// Waits for the channel to finish closing and returns the exit code.
    /// Processes terminated by a signal report `-1`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the status cannot be retrieved.
    fn exit_code(&mut self) -> Result<i32, TransportError>;
}
