//! Ties a dispatch child's lifetime to the supervising process.

/// Runs in the forked child before `exec`. Asks the kernel to deliver SIGTERM
/// when the supervisor dies, and exits right away if it already has.
///
/// `supervisor_pid` must be captured in the parent before forking.
#[cfg(target_os = "linux")]
pub(crate) fn set_parent_death(supervisor_pid: libc::pid_t) {
    // SAFETY: prctl, getppid, kill and getpid are async-signal-safe and take
    // no pointers.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        if libc::getppid() != supervisor_pid {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
    }
}
