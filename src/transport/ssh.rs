//! libssh2-backed transport built on the `ssh2` crate.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use ssh2::{Channel, ErrorCode, Session, Stream};
use tracing::debug;

use super::{ConnectRequest, ExecChannel, RemoteSession, Transport, TransportError};
use crate::auth::{Identity, ResolvedIdentity};

const LIBSSH2_ERROR_TIMEOUT: std::os::raw::c_int = -9;
const WAIT_CHUNK: usize = 1024;
/// libssh2 treats a zero session timeout as "wait forever".
const UNBOUNDED_MS: u32 = 0;

/// Transport that opens real SSH sessions with libssh2.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ssh2Transport;

impl Transport for Ssh2Transport {
    type Session = Ssh2Session;

    fn connect(&self, request: &ConnectRequest<'_>) -> Result<Self::Session, TransportError> {
        if request.verify_host_key {
            return Err(TransportError::Protocol {
                operation: String::from("host key verification"),
                message: String::from("known-hosts verification is not implemented"),
            });
        }

        let target = request.target;
        let timeout = target.connect_timeout();
        let tcp = connect_tcp(target.host(), target.port(), timeout)?;

        let mut session = Session::new().map_err(|err| ssh_error("session setup", &err))?;
        session.set_timeout(timeout_millis(timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| ssh_error("handshake", &err))?;

        for resolved in request.identities {
            if try_identity(&session, request.user, resolved) {
                break;
            }
        }

        if !session.authenticated() {
            return Err(TransportError::AuthRejected {
                user: request.user.to_owned(),
            });
        }

        session.set_timeout(UNBOUNDED_MS);
        Ok(Ssh2Session { session })
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::Unresolvable {
            host: host.to_owned(),
            port,
        })?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }

    Err(match last_error {
        Some(err) if err.kind() == io::ErrorKind::TimedOut => TransportError::Timeout {
            operation: format!("connect to {host}:{port}"),
        },
        Some(err) => TransportError::Io {
            operation: format!("connect to {host}:{port}"),
            message: err.to_string(),
        },
        None => TransportError::Unresolvable {
            host: host.to_owned(),
            port,
        },
    })
}

fn try_identity(session: &Session, user: &str, resolved: &ResolvedIdentity) -> bool {
    let result = match &resolved.identity {
        Identity::KeyFile { path, passphrase } => session.userauth_pubkey_file(
            user,
            None,
            path.as_std_path(),
            passphrase.as_deref(),
        ),
        Identity::Agent(_) => try_agent(session, user),
    };
    match result {
        Ok(()) => session.authenticated(),
        Err(err) => {
            debug!(provider = %resolved.provider, error = %err, "identity rejected");
            false
        }
    }
}

fn try_agent(session: &Session, user: &str) -> Result<(), ssh2::Error> {
    let mut agent = session.agent()?;
    agent.connect()?;
    agent.list_identities()?;
    for key in agent.identities()? {
        if agent.userauth(user, &key).is_ok() && session.authenticated() {
            break;
        }
    }
    if let Err(err) = agent.disconnect() {
        debug!(error = %err, "agent disconnect failed");
    }
    Ok(())
}

/// Authenticated libssh2 session.
pub struct Ssh2Session {
    session: Session,
}

impl RemoteSession for Ssh2Session {
    type Channel = Ssh2Channel;

    fn open_exec(&mut self, command_line: &str) -> Result<Self::Channel, TransportError> {
        self.session.set_blocking(true);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| ssh_error("open exec channel", &err))?;
        channel
            .exec(command_line)
            .map_err(|err| ssh_error("exec", &err))?;
        let stderr = channel.stderr();
        self.session.set_blocking(false);

        Ok(Ssh2Channel {
            session: self.session.clone(),
            channel,
            stderr,
            pending: PendingOutput::default(),
        })
    }

    fn upload(&mut self, local: &Utf8Path, remote: &str) -> Result<u64, TransportError> {
        self.session.set_blocking(true);
        let mut source = open_local(local)?;
        let sftp = self
            .session
            .sftp()
            .map_err(|err| ssh_error("open sftp subsystem", &err))?;
        let mut destination = sftp
            .create(Path::new(remote))
            .map_err(|err| ssh_error(&format!("create {remote}"), &err))?;
        io::copy(&mut source, &mut destination).map_err(|err| TransportError::Io {
            operation: format!("copy {local} to {remote}"),
            message: err.to_string(),
        })
    }
}

fn open_local(path: &Utf8Path) -> Result<cap_std::fs_utf8::File, TransportError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| TransportError::Io {
        operation: format!("open {path}"),
        message: String::from("path has no file name"),
    })?;
    Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.open(file_name))
        .map_err(|err| TransportError::Io {
            operation: format!("open {path}"),
            message: err.to_string(),
        })
}

/// Stdout bytes caught while waiting for activity, served before the
/// channel is read again.
#[derive(Debug, Default)]
struct PendingOutput {
    bytes: Vec<u8>,
}

impl PendingOutput {
    fn park(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Moves parked bytes into `buf`; `None` when nothing is parked.
    fn take_into(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.bytes.is_empty() {
            return None;
        }
        let count = buf.len().min(self.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(self.bytes.drain(..count)) {
            *slot = byte;
        }
        Some(count)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The channel only counts as closed once parked bytes are drained.
    fn closed_with(&self, eof: bool) -> bool {
        eof && self.is_empty()
    }
}

/// Non-blocking exec channel over a libssh2 session.
///
/// Waiting for activity switches the session to a blocking read on stdout
/// bounded by the poll interval; bytes caught that way are parked and
/// handed out by the next [`ExecChannel::read_stdout`]. Outside that wait
/// the session has no timeout.
pub struct Ssh2Channel {
    session: Session,
    channel: Channel,
    stderr: Stream,
    pending: PendingOutput,
}

impl ExecChannel for Ssh2Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if let Some(count) = self.pending.take_into(buf) {
            return Ok(count);
        }
        non_blocking_read(self.channel.read(buf), "read stdout")
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        non_blocking_read(self.stderr.read(buf), "read stderr")
    }

    fn is_closed(&mut self) -> bool {
        self.pending.closed_with(self.channel.eof())
    }

    fn wait_for_activity(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if timeout.is_zero() || !self.pending.is_empty() {
            return Ok(());
        }
        let mut buf = [0_u8; WAIT_CHUNK];
        self.session.set_blocking(true);
        self.session.set_timeout(wait_millis(timeout));
        let result = self.channel.read(&mut buf);
        self.session.set_timeout(UNBOUNDED_MS);
        self.session.set_blocking(false);
        match result {
            Ok(read) => {
                self.pending.park(buf.get(..read).unwrap_or_default());
                Ok(())
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(TransportError::Io {
                operation: String::from("wait for output"),
                message: err.to_string(),
            }),
        }
    }

    fn exit_code(&mut self) -> Result<i32, TransportError> {
        self.session.set_blocking(true);
        self.channel
            .wait_close()
            .map_err(|err| ssh_error("close channel", &err))?;
        let status = self
            .channel
            .exit_status()
            .map_err(|err| ssh_error("read exit status", &err))?;
        let signalled = self
            .channel
            .exit_signal()
            .ok()
            .and_then(|signal| signal.exit_signal)
            .is_some();
        Ok(if signalled && status == 0 { -1 } else { status })
    }
}

impl Drop for Ssh2Channel {
    fn drop(&mut self) {
        self.session.set_blocking(true);
    }
}

fn non_blocking_read(result: io::Result<usize>, operation: &str) -> Result<usize, TransportError> {
    match result {
        Ok(read) => Ok(read),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(err) => Err(TransportError::Io {
            operation: operation.to_owned(),
            message: err.to_string(),
        }),
    }
}

fn ssh_error(operation: &str, err: &ssh2::Error) -> TransportError {
    if matches!(err.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)) {
        TransportError::Timeout {
            operation: operation.to_owned(),
        }
    } else {
        TransportError::Protocol {
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// Session timeout for one bounded wait; never zero, which would block
/// forever.
fn wait_millis(timeout: Duration) -> u32 {
    timeout_millis(timeout).max(1)
}
