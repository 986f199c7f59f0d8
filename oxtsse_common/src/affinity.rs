//! Best-effort CPU pinning. Absence or failure of the capability only
//! affects scheduling locality, never correctness.

/// Pins the calling thread to the given logical core. Returns whether the
/// request took effect.
#[cfg(target_os = "linux")]
pub fn try_set_affinity(core: usize) -> bool {
    let mut cpu_set = nix::sched::CpuSet::new();
    if cpu_set.set(core).is_err() {
        return false;
    }

    nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &cpu_set).is_ok()
}

/// Pinning is not supported on this platform.
#[cfg(not(target_os = "linux"))]
pub fn try_set_affinity(_core: usize) -> bool {
    false
}
