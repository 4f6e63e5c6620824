//! process placement and signal-safe teardown. every process in the
//! control plane is pinned to a fixed CPU and, where privileges allow,
//! promoted to SCHED_FIFO; the controller additionally arms a handler
//! that removes the rendezvous segment on any terminating signal.

use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

/// pin the calling thread to one CPU
pub fn pin_to_cpu(cpu: usize) -> anyhow::Result<()> {
    let cpus = num_cpus::get();
    if cpu >= cpus {
        anyhow::bail!("cpu {} out of range, this machine has {}", cpu, cpus);
    }
    unsafe {
        let mut mask: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut mask);
        libc::CPU_SET(cpu, &mut mask);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mask) != 0 {
            anyhow::bail!(
                "sched_setaffinity failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    Ok(())
}

/// switch to the real-time FIFO policy. needs privileges; without them
/// the runtime keeps going at normal priority, loudly.
pub fn promote_to_fifo(priority: i32) {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
        log::warn!(
            "cannot switch to SCHED_FIFO priority {}: {}",
            priority,
            std::io::Error::last_os_error()
        );
    }
}

pub fn max_fifo_priority() -> i32 {
    unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) }
}

/// the one piece of process-wide state the signal handler may consult.
/// set before the handlers are installed.
static TEARDOWN_REGION: AtomicI32 = AtomicI32::new(-1);

/// install terminating-signal handlers that remove the given shared
/// segment and exit: 0 for a plain interrupt, nonzero for anything
/// unexpected. the segfault hook is best effort.
pub fn arm_teardown(shmid: i32) {
    TEARDOWN_REGION.store(shmid, Ordering::SeqCst);
    for sig in [
        libc::SIGHUP,
        libc::SIGINT,
        libc::SIGPIPE,
        libc::SIGTERM,
        libc::SIGSEGV,
    ] {
        install(sig, teardown_handler);
    }
}

/// plain clean-exit-on-ctrl-c for processes that own nothing
pub fn exit_on_interrupt() {
    install(libc::SIGINT, interrupt_handler);
}

fn install(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(sig, &sa, std::ptr::null_mut());
    }
}

extern "C" fn teardown_handler(sig: libc::c_int) {
    let id = TEARDOWN_REGION.load(Ordering::SeqCst);
    if id >= 0 {
        unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
    }
    // async-signal-safe from here on: write(2) and _exit only
    let msg: &[u8] = match sig == libc::SIGINT {
        true => b"interrupted, shared region removed\n",
        false => b"unexpected terminating signal, shared region removed\n",
    };
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(if sig == libc::SIGINT { 0 } else { 1 });
    }
}

extern "C" fn interrupt_handler(_: libc::c_int) {
    unsafe { libc::_exit(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinning_to_an_existing_cpu_succeeds() {
        pin_to_cpu(0).unwrap();
    }

    #[test]
    fn pinning_out_of_range_is_rejected() {
        assert!(pin_to_cpu(usize::MAX).is_err());
    }

    #[test]
    fn fifo_priority_range_is_sane() {
        assert!(max_fifo_priority() >= 1);
    }
}
