//! Remote command strings for lockouts and deploy steps.
//!
//! Every value interpolated into a command line is shell-escaped here so the
//! lockout coordinator and the deploy orchestrator never build command
//! strings by hand. The lockout script path is the exception: it is emitted
//! as configured so a leading `~` still expands on the remote side.

use std::borrow::Cow;

use shell_escape::unix::escape;

fn quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}

/// `<script> <domain> claim <shard> <holder> <minutes> <note>`
pub(crate) fn lockout_claim(
    script: &str,
    domain: &str,
    shard: &str,
    holder: &str,
    minutes: u32,
    note: &str,
) -> String {
    format!(
        "{script} {} claim {} {} {minutes} {}",
        quote(domain),
        quote(shard),
        quote(holder),
        quote(note)
    )
}

/// `<script> <domain> check <shard>`
pub(crate) fn lockout_check(script: &str, domain: &str, shard: &str) -> String {
    format!("{script} {} check {}", quote(domain), quote(shard))
}

/// Removes every `<base>*.jar` in `path`. The glob stays unquoted.
pub(crate) fn clean(path: &str, base_name: &str) -> String {
    format!("cd {} && rm -f {}*.jar", quote(path), quote(base_name))
}

/// Points `<link>.jar` in `path` at `artifact_file_name`.
pub(crate) fn relink(path: &str, link_name: &str, artifact_file_name: &str) -> String {
    let link = quote(link_name);
    format!(
        "cd {} && rm -f {link}.jar && ln -s {} {link}.jar",
        quote(path),
        quote(artifact_file_name)
    )
}

/// Joins a remote directory and a file name with exactly one `/`.
pub(crate) fn join_remote(dir: &str, file_name: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        format!("/{file_name}")
    } else {
        format!("{trimmed}/{file_name}")
    }
}
