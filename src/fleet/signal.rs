//! Signal delivery to simulator processes that are not our children.

use crate::{AppError, Result};

/// Signals used at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Polite shutdown request.
    Terminate,
    /// Unconditional kill.
    Kill,
}

/// Send `signal` to `pid`. Returns `false` if the process no longer exists.
///
/// # Errors
///
/// Returns [`AppError::Fleet`] if the signal cannot be delivered.
#[cfg(unix)]
pub fn send(pid: u32, signal: StopSignal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};

    let target = to_pid(pid)?;
    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    match kill(target, sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(AppError::Fleet(format!("failed to signal {pid}: {err}"))),
    }
}

/// Whether `pid` still exists.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};

    let Ok(target) = to_pid(pid) else {
        return false;
    };
    matches!(kill(target, None::<Signal>), Ok(()) | Err(Errno::EPERM))
}

#[cfg(unix)]
fn to_pid(pid: u32) -> Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .map(nix::unistd::Pid::from_raw)
        .map_err(|_| AppError::Fleet(format!("process id {pid} out of range")))
}

/// Send `signal` to `pid`.
///
/// # Errors
///
/// Always returns [`AppError::Fleet`]; signalling is unix-only.
#[cfg(not(unix))]
pub fn send(pid: u32, signal: StopSignal) -> Result<bool> {
    Err(AppError::Fleet(format!(
        "cannot send {signal:?} to {pid} on this platform"
    )))
}

/// Whether `pid` still exists; always `false` off unix.
#[cfg(not(unix))]
#[must_use]
pub fn is_alive(_pid: u32) -> bool {
    false
}
