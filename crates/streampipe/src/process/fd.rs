//! Descriptor flag helpers for the bridge pipes.
//!
//! Pipes are created close-on-exec so the child only ever sees the two ends
//! that get duplicated onto its stdin/stdout. The parent's retained ends are
//! switched to non-blocking for steady state and back to blocking for the
//! shutdown drain.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};

use crate::error::BridgeError;

/// One direction of the bridge: `(read_end, write_end)`, both close-on-exec.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), BridgeError> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| BridgeError::Pipe(e.into()))
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), BridgeError> {
    let (read, write) = nix::unistd::pipe().map_err(|e| BridgeError::Pipe(e.into()))?;
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn fcntl_error(fd: &impl AsRawFd, errno: nix::errno::Errno) -> BridgeError {
    BridgeError::Fcntl {
        fd: fd.as_raw_fd(),
        source: errno.into(),
    }
}

fn status_flags<F: AsFd + AsRawFd>(fd: &F) -> Result<OFlag, BridgeError> {
    let bits = fcntl(fd.as_fd(), FcntlArg::F_GETFL).map_err(|e| fcntl_error(fd, e))?;
    Ok(OFlag::from_bits_truncate(bits))
}

fn update_status_flags<F: AsFd + AsRawFd>(
    fd: &F,
    update: impl FnOnce(OFlag) -> OFlag,
) -> Result<(), BridgeError> {
    let flags = update(status_flags(fd)?);
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags)).map_err(|e| fcntl_error(fd, e))?;
    Ok(())
}

pub(crate) fn set_nonblocking<F: AsFd + AsRawFd>(fd: &F) -> Result<(), BridgeError> {
    update_status_flags(fd, |flags| flags | OFlag::O_NONBLOCK)
}

pub(crate) fn set_blocking<F: AsFd + AsRawFd>(fd: &F) -> Result<(), BridgeError> {
    update_status_flags(fd, |flags| flags & !OFlag::O_NONBLOCK)
}

pub(crate) fn set_cloexec<F: AsFd + AsRawFd>(fd: &F) -> Result<(), BridgeError> {
    let bits = fcntl(fd.as_fd(), FcntlArg::F_GETFD).map_err(|e| fcntl_error(fd, e))?;
    let flags = FdFlag::from_bits_truncate(bits) | FdFlag::FD_CLOEXEC;
    fcntl(fd.as_fd(), FcntlArg::F_SETFD(flags)).map_err(|e| fcntl_error(fd, e))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn is_nonblocking<F: AsFd + AsRawFd>(fd: &F) -> Result<bool, BridgeError> {
    Ok(status_flags(fd)?.contains(OFlag::O_NONBLOCK))
}

#[cfg(test)]
pub(crate) fn is_cloexec<F: AsFd + AsRawFd>(fd: &F) -> Result<bool, BridgeError> {
    let bits = fcntl(fd.as_fd(), FcntlArg::F_GETFD).map_err(|e| fcntl_error(fd, e))?;
    Ok(FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_ends_start_cloexec_and_blocking() {
        let (read, write) = cloexec_pipe().unwrap();
        assert!(is_cloexec(&read).unwrap());
        assert!(is_cloexec(&write).unwrap());
        assert!(!is_nonblocking(&read).unwrap());
        assert!(!is_nonblocking(&write).unwrap());
    }

    #[test]
    fn nonblocking_flag_round_trips() {
        let (read, _write) = cloexec_pipe().unwrap();

        set_nonblocking(&read).unwrap();
        assert!(is_nonblocking(&read).unwrap());

        set_blocking(&read).unwrap();
        assert!(!is_nonblocking(&read).unwrap());
        assert!(is_cloexec(&read).unwrap());
    }

    #[test]
    fn set_cloexec_is_idempotent() {
        let (read, _write) = cloexec_pipe().unwrap();
        set_cloexec(&read).unwrap();
        set_cloexec(&read).unwrap();
        assert!(is_cloexec(&read).unwrap());
    }
}
