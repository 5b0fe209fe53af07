//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedTransport`] stands in for a real SSH server: it records every
//! connect, command and upload, and answers commands from scripted channels.
//! [`ScriptedRunner`] does the same for local processes such as `git`.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::process::{CommandOutput, CommandRunner, ProcessError};
use crate::target::TargetKey;
use crate::transport::{ConnectRequest, ExecChannel, RemoteSession, Transport, TransportError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes an explicit command output response.
    pub fn push_output(&self, code: Option<i32>, stdout: impl Into<String>) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: String::new(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| ProcessError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, Default)]
struct Burst {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    closes: bool,
}

/// Exec channel replaying scripted output.
///
/// Output is released in bursts: every call to [`ExecChannel::is_closed`]
/// makes the next burst readable. Once the bursts run out the channel
/// reports closed. A burst added with
/// [`ScriptedChannel::with_output_at_close`] becomes readable at the same
/// moment the close is signalled, mimicking output still in flight when the
/// remote process exits.
#[derive(Clone, Debug)]
pub struct ScriptedChannel {
    bursts: VecDeque<Burst>,
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    closed: bool,
    exit: Result<i32, TransportError>,
    largest_read: usize,
    waits: usize,
}

impl ScriptedChannel {
    /// Channel that exits with `exit_code` and produces no output.
    #[must_use]
    pub const fn new(exit_code: i32) -> Self {
        Self {
            bursts: VecDeque::new(),
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
            closed: false,
            exit: Ok(exit_code),
            largest_read: 0,
            waits: 0,
        }
    }

    /// Appends a burst of output released before the close.
    #[must_use]
    pub fn with_output(mut self, stdout: &[u8], stderr: &[u8]) -> Self {
        self.bursts.push_back(Burst {
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
            closes: false,
        });
        self
    }

    /// Appends a final burst released together with the close signal.
    #[must_use]
    pub fn with_output_at_close(mut self, stdout: &[u8], stderr: &[u8]) -> Self {
        self.bursts.push_back(Burst {
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
            closes: true,
        });
        self
    }

    /// Makes exit status retrieval fail with `err`.
    #[must_use]
    pub fn with_exit_failure(mut self, err: TransportError) -> Self {
        self.exit = Err(err);
        self
    }

    /// Largest number of bytes copied by a single read.
    #[must_use]
    pub const fn largest_read(&self) -> usize {
        self.largest_read
    }

    /// Number of times the poll loop waited for activity.
    #[must_use]
    pub const fn waits(&self) -> usize {
        self.waits
    }

    fn read_from(source: &mut VecDeque<u8>, buf: &mut [u8], largest: &mut usize) -> usize {
        let count = buf.len().min(source.len());
        for (slot, byte) in buf.iter_mut().zip(source.drain(..count)) {
            *slot = byte;
        }
        *largest = (*largest).max(count);
        count
    }
}

impl ExecChannel for ScriptedChannel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(Self::read_from(&mut self.stdout, buf, &mut self.largest_read))
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(Self::read_from(&mut self.stderr, buf, &mut self.largest_read))
    }

    fn is_closed(&mut self) -> bool {
        if self.closed {
            return true;
        }
        match self.bursts.pop_front() {
            Some(burst) => {
                self.stdout.extend(burst.stdout);
                self.stderr.extend(burst.stderr);
                self.closed = burst.closes;
            }
            None => self.closed = true,
        }
        self.closed
    }

    fn wait_for_activity(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        self.waits += 1;
        Ok(())
    }

    fn exit_code(&mut self) -> Result<i32, TransportError> {
        self.exit.clone()
    }
}

/// One remote operation observed by the scripted transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCall {
    /// A command line sent over an exec channel.
    Exec {
        /// Endpoint the command ran on.
        target: TargetKey,
        /// Command line, verbatim.
        command: String,
    },
    /// A file uploaded over the transfer subchannel.
    Upload {
        /// Endpoint receiving the file.
        target: TargetKey,
        /// Local source path.
        local: Utf8PathBuf,
        /// Remote destination path.
        remote: String,
    },
}

/// A recorded connection attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectRecord {
    /// Endpoint requested.
    pub target: TargetKey,
    /// User the session authenticated as.
    pub user: String,
    /// Names of the providers whose identities were offered, in order.
    pub providers: Vec<String>,
    /// Whether host key verification was requested.
    pub verify_host_key: bool,
}

#[derive(Debug, Default)]
struct TransportState {
    connects: Vec<ConnectRecord>,
    calls: Vec<RemoteCall>,
    connect_failures: VecDeque<TransportError>,
    replies: Vec<(String, ScriptedChannel)>,
    exec_failures: Vec<(String, TransportError)>,
    upload_failures: Vec<(String, TransportError)>,
}

/// In-memory transport recording every interaction.
///
/// Commands succeed with empty output unless a reply registered with
/// [`ScriptedTransport::reply_to`] matches a fragment of the command line.
/// Clones share state, so a clone handed to the code under test can be
/// inspected afterwards.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    /// Creates a transport with no scripted behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands containing `fragment` with `channel`.
    ///
    /// The first matching registration wins.
    pub fn reply_to(&self, fragment: impl Into<String>, channel: ScriptedChannel) {
        lock(&self.state).replies.push((fragment.into(), channel));
    }

    /// Answers commands containing `fragment` with the given exit code.
    pub fn exit_with(&self, fragment: impl Into<String>, exit_code: i32) {
        self.reply_to(fragment, ScriptedChannel::new(exit_code));
    }

    /// Fails the next connection attempt with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        lock(&self.state).connect_failures.push_back(err);
    }

    /// Fails opening an exec channel for commands containing `fragment`.
    pub fn fail_exec(&self, fragment: impl Into<String>, err: TransportError) {
        lock(&self.state).exec_failures.push((fragment.into(), err));
    }

    /// Fails uploads whose remote path contains `fragment`.
    pub fn fail_upload(&self, fragment: impl Into<String>, err: TransportError) {
        lock(&self.state).upload_failures.push((fragment.into(), err));
    }

    /// Connection attempts so far.
    #[must_use]
    pub fn connects(&self) -> Vec<ConnectRecord> {
        lock(&self.state).connects.clone()
    }

    /// Every command and upload so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.state).calls.clone()
    }

    /// Command lines executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Exec { command, .. } => Some(command),
                RemoteCall::Upload { .. } => None,
            })
            .collect()
    }

    /// Remote destinations of uploads so far, in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Upload { remote, .. } => Some(remote),
                RemoteCall::Exec { .. } => None,
            })
            .collect()
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    fn connect(&self, request: &ConnectRequest<'_>) -> Result<Self::Session, TransportError> {
        let target = request.target.key();
        let mut state = lock(&self.state);
        state.connects.push(ConnectRecord {
            target: target.clone(),
            user: request.user.to_owned(),
            providers: request
                .identities
                .iter()
                .map(|identity| identity.provider.clone())
                .collect(),
            verify_host_key: request.verify_host_key,
        });
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        Ok(ScriptedSession {
            target,
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`ScriptedTransport`].
#[derive(Debug)]
pub struct ScriptedSession {
    target: TargetKey,
    state: Arc<Mutex<TransportState>>,
}

impl RemoteSession for ScriptedSession {
    type Channel = ScriptedChannel;

    fn open_exec(&mut self, command_line: &str) -> Result<Self::Channel, TransportError> {
        let mut state = lock(&self.state);
        state.calls.push(RemoteCall::Exec {
            target: self.target.clone(),
            command: command_line.to_owned(),
        });
        if let Some((_, err)) = state
            .exec_failures
            .iter()
            .find(|(fragment, _)| command_line.contains(fragment.as_str()))
        {
            return Err(err.clone());
        }
        Ok(state
            .replies
            .iter()
            .find(|(fragment, _)| command_line.contains(fragment.as_str()))
            .map_or_else(|| ScriptedChannel::new(0), |(_, channel)| channel.clone()))
    }

    fn upload(&mut self, local: &Utf8Path, remote: &str) -> Result<u64, TransportError> {
        let mut state = lock(&self.state);
        state.calls.push(RemoteCall::Upload {
            target: self.target.clone(),
            local: local.to_path_buf(),
            remote: remote.to_owned(),
        });
        if let Some((_, err)) = state
            .upload_failures
            .iter()
            .find(|(fragment, _)| remote.contains(fragment.as_str()))
        {
            return Err(err.clone());
        }
        Ok(local.metadata().map_or(0, |meta| meta.len()))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
