//! Running a single remote command to completion.
//!
//! The loop reads both streams in bounded chunks until nothing is available,
//! then checks whether the channel has closed. A close signal does not mean
//! the buffers are empty, so a final drain of both streams always runs before
//! the exit code is read.

use std::borrow::Cow;
use std::time::Duration;

use crate::transport::{ExecChannel, TransportError};

/// Default delay between polls when no output is available.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default upper bound for a single stream read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Captured outcome of one remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResult {
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Raw bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Raw bytes written to standard error.
    pub stderr: Vec<u8>,
}

impl CommandResult {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Tuning for the poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Longest wait for new output before polling again.
    pub interval: Duration,
    /// Maximum bytes requested per read.
    pub chunk_size: usize,
}

impl PollSettings {
    /// Settings with a custom interval and the default chunk size.
    #[must_use]
    pub const fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }
}

/// Reads `channel` until it is closed and drained, then returns the result.
///
/// Non-zero exit codes are returned, not raised.
///
/// # Errors
///
/// Returns [`TransportError`] when a read, the wait, or the exit status
/// retrieval fails.
pub fn run_to_completion<C: ExecChannel>(
    channel: &mut C,
    settings: &PollSettings,
) -> Result<CommandResult, TransportError> {
    let mut buf = vec![0_u8; settings.chunk_size.max(1)];
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let read = drain(channel, &mut buf, &mut stdout, &mut stderr)?;
        if channel.is_closed() {
            drain(channel, &mut buf, &mut stdout, &mut stderr)?;
            let exit_code = channel.exit_code()?;
            return Ok(CommandResult {
                exit_code,
                stdout,
                stderr,
            });
        }
        if read == 0 {
            channel.wait_for_activity(settings.interval)?;
        }
    }
}

fn drain<C: ExecChannel>(
    channel: &mut C,
    buf: &mut [u8],
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Result<usize, TransportError> {
    let mut total = 0;
    loop {
        let out = channel.read_stdout(buf)?;
        stdout.extend_from_slice(buf.get(..out).unwrap_or_default());
        let err = channel.read_stderr(buf)?;
        stderr.extend_from_slice(buf.get(..err).unwrap_or_default());
        if out == 0 && err == 0 {
            return Ok(total);
        }
        total += out + err;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedChannel;
    use rstest::rstest;

    fn payload(len: usize) -> Vec<u8> {
        b"shard-output-0123456789\n"
            .iter()
            .cycle()
            .take(len)
            .copied()
            .collect()
    }

    fn settings() -> PollSettings {
        PollSettings::with_interval(Duration::ZERO)
    }

    #[rstest]
    #[case(0)]
    #[case(1024)]
    #[case(5000)]
    fn stdout_is_byte_exact(#[case] len: usize) {
        let bytes = payload(len);
        let mut channel = ScriptedChannel::new(0).with_output(&bytes, b"");

        let result = run_to_completion(&mut channel, &settings())
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        assert_eq!(result.stdout, bytes);
        assert!(result.stderr.is_empty());
        assert!(channel.largest_read() <= DEFAULT_CHUNK_SIZE);
    }

    #[rstest]
    #[case(0)]
    #[case(1024)]
    #[case(5000)]
    fn output_flushed_with_the_close_signal_is_kept(#[case] len: usize) {
        let early = payload(300);
        let late = payload(len);
        let mut channel = ScriptedChannel::new(0)
            .with_output(&early, b"warn ")
            .with_output_at_close(&late, b"done");

        let result = run_to_completion(&mut channel, &settings())
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        let expected: Vec<u8> = early.iter().chain(late.iter()).copied().collect();
        assert_eq!(result.stdout, expected);
        assert_eq!(result.stderr_text(), "warn done");
    }

    #[rstest]
    #[case(1)]
    #[case(-1)]
    #[case(127)]
    fn non_zero_exit_is_returned(#[case] code: i32) {
        let mut channel = ScriptedChannel::new(code).with_output(b"", b"boom");
        let result = run_to_completion(&mut channel, &settings())
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));
        assert_eq!(result.exit_code, code);
        assert!(!result.is_success());
    }

    #[rstest]
    fn waits_between_quiet_polls() {
        let mut channel = ScriptedChannel::new(0)
            .with_output(b"", b"")
            .with_output(b"", b"")
            .with_output(b"ok", b"");

        let result = run_to_completion(&mut channel, &settings())
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        assert_eq!(result.stdout_text(), "ok");
        assert!(channel.waits() >= 2, "waited {} times", channel.waits());
    }

    #[rstest]
    fn exit_status_failure_is_propagated() {
        let failure = TransportError::Protocol {
            operation: String::from("read exit status"),
            message: String::from("channel vanished"),
        };
        let mut channel = ScriptedChannel::new(0).with_exit_failure(failure.clone());

        let Err(err) = run_to_completion(&mut channel, &settings()) else {
            panic!("exit status failure should surface");
        };

        assert_eq!(err, failure);
    }

    #[rstest]
    fn default_settings_match_documented_values() {
        let settings = PollSettings::default();
        assert_eq!(settings.interval, Duration::from_millis(100));
        assert_eq!(settings.chunk_size, 1024);
    }
}
