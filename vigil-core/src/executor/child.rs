//! Child-process plumbing shared by the worker boundary and the check runner.

use std::collections::VecDeque;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Make the spawned child the leader of a new process group, so everything it
/// starts can be signalled together with [`kill_group`].
pub fn lead_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        command.process_group(0);
    }
    command
}

/// SIGKILL every process in the group led by `pid`.
///
/// Call this before reaping the leader: a zombie leader keeps the group id
/// reserved.
pub fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return;
        };
        // SAFETY: killpg only delivers a signal; an empty group yields ESRCH.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc != 0 {
            debug!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Read `reader` to the end keeping at most the last `limit` bytes.
pub async fn read_tail<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut kept: VecDeque<u8> = VecDeque::with_capacity(limit.min(64 * 1024));
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                kept.extend(&chunk[..read]);
                let excess = kept.len().saturating_sub(limit);
                kept.drain(..excess);
            }
            Err(err) => {
                debug!(error = %err, "stopped reading child output");
                break;
            }
        }
    }
    let bytes: Vec<u8> = kept.into_iter().collect();
    tail_text(&String::from_utf8_lossy(&bytes), limit)
}

/// Trimmed suffix of `text` no longer than `limit` bytes, cut on a char
/// boundary.
pub fn tail_text(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
