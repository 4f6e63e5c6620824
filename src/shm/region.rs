//! the plant↔controller rendezvous. the plant writes the state and
//! posts STATE_WRITTEN; the controller computes, writes the input, and
//! posts INPUT_WRITTEN. strict alternation, one pair in flight, no
//! queueing. the region is created by the controller and removed by it
//! on every termination path.
//!
//! layout: a fixed header, then state_num doubles of state, then
//! input_num doubles of input, contiguous. each side only ever mutates
//! its own array and the semaphore pair provides release/acquire
//! ordering, so no locks appear anywhere on the hot path.

use crate::Secs;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

const SEM_STATE_WRITTEN: usize = 0;
const SEM_INPUT_WRITTEN: usize = 1;

#[repr(C)]
struct Header {
    sems: [libc::sem_t; 2],
    state_num: u64,
    input_num: u64,
    stats_int: [i32; 1],
    stats_dbl: [f64; 1],
    flags: AtomicU32,
    /// scratch slot kept for adapter experiments
    u: f64,
}

pub struct Region {
    id: i32,
    header: *mut Header,
    owner: bool,
}

// the header is only touched through the semaphores, the atomic flags
// word, or single-writer slots; raw pointers are fine to move across
// threads under that discipline
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn byte_size(n: usize, m: usize) -> usize {
        std::mem::size_of::<Header>() + 8 * (n + m)
    }

    /// create and initialize the region. fails if the key is already
    /// in use, which usually means another controller is up.
    pub fn create(key: i32, n: usize, m: usize) -> anyhow::Result<Self> {
        let size = Self::byte_size(n, m);
        let id = unsafe {
            libc::shmget(
                key,
                size,
                crate::SHM_PERMS | libc::IPC_CREAT | libc::IPC_EXCL,
            )
        };
        if id == -1 {
            anyhow::bail!(
                "cannot create shared region key {:#x} (in use? try ipcs): {}",
                key,
                std::io::Error::last_os_error()
            );
        }
        let header = match Self::map(id) {
            Ok(header) => header,
            Err(err) => {
                unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
                return Err(err);
            }
        };
        let region = Self {
            id,
            header,
            owner: true,
        };
        unsafe {
            std::ptr::write_bytes(region.header as *mut u8, 0, size);
            (*region.header).state_num = n as u64;
            (*region.header).input_num = m as u64;
            for i in 0..2 {
                let sem = &raw mut (*region.header).sems[i];
                if libc::sem_init(sem, 1, 0) < 0 {
                    anyhow::bail!(
                        "cannot initialize rendezvous semaphore: {}",
                        std::io::Error::last_os_error()
                    );
                }
            }
        }
        Ok(region)
    }

    /// attach to a region some controller created
    pub fn attach(key: i32) -> anyhow::Result<Self> {
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            anyhow::bail!(
                "no shared region at key {:#x} (is the controller running?): {}",
                key,
                std::io::Error::last_os_error()
            );
        }
        let region = Self {
            id,
            header: Self::map(id)?,
            owner: false,
        };
        if region.n() == 0 {
            anyhow::bail!("shared region at key {:#x} is not initialized", key);
        }
        Ok(region)
    }

    fn map(id: i32) -> anyhow::Result<*mut Header> {
        let at = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if at as isize == -1 {
            anyhow::bail!(
                "cannot attach shared region: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(at as *mut Header)
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn n(&self) -> usize {
        unsafe { (*self.header).state_num as usize }
    }

    pub fn m(&self) -> usize {
        unsafe { (*self.header).input_num as usize }
    }

    /// shape check for consumers that bring their own model
    pub fn validate(&self, n: usize, m: usize) -> anyhow::Result<()> {
        if self.n() != n || self.m() != m {
            anyhow::bail!(
                "shared region is {}x{} but the model is {}x{}",
                self.n(),
                self.m(),
                n,
                m
            );
        }
        Ok(())
    }

    fn state_ptr(&self) -> *mut f64 {
        unsafe { (self.header as *mut u8).add(std::mem::size_of::<Header>()) as *mut f64 }
    }

    fn input_ptr(&self) -> *mut f64 {
        unsafe { self.state_ptr().add(self.n()) }
    }

    pub fn write_state(&self, x: &[f64]) {
        assert_eq!(x.len(), self.n());
        unsafe { std::ptr::copy_nonoverlapping(x.as_ptr(), self.state_ptr(), x.len()) }
    }

    pub fn read_state(&self) -> Vec<f64> {
        let mut x = vec![0.; self.n()];
        unsafe { std::ptr::copy_nonoverlapping(self.state_ptr(), x.as_mut_ptr(), x.len()) }
        x
    }

    pub fn write_input(&self, u: &[f64]) {
        assert_eq!(u.len(), self.m());
        unsafe { std::ptr::copy_nonoverlapping(u.as_ptr(), self.input_ptr(), u.len()) }
    }

    pub fn read_input(&self) -> Vec<f64> {
        let mut u = vec![0.; self.m()];
        unsafe { std::ptr::copy_nonoverlapping(self.input_ptr(), u.as_mut_ptr(), u.len()) }
        u
    }

    fn sem(&self, idx: usize) -> *mut libc::sem_t {
        unsafe { &raw mut (*self.header).sems[idx] }
    }

    fn sem_wait(sem: *mut libc::sem_t) -> anyhow::Result<()> {
        loop {
            if unsafe { libc::sem_wait(sem) } == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                anyhow::bail!("semaphore wait failed: {}", err);
            }
        }
    }

    fn sem_post(sem: *mut libc::sem_t) -> anyhow::Result<()> {
        match unsafe { libc::sem_post(sem) } {
            0 => Ok(()),
            _ => Err(anyhow::anyhow!(
                "semaphore post failed: {}",
                std::io::Error::last_os_error()
            )),
        }
    }

    pub fn post_state(&self) -> anyhow::Result<()> {
        Self::sem_post(self.sem(SEM_STATE_WRITTEN))
    }

    pub fn wait_state(&self) -> anyhow::Result<()> {
        Self::sem_wait(self.sem(SEM_STATE_WRITTEN))
    }

    pub fn post_input(&self) -> anyhow::Result<()> {
        Self::sem_post(self.sem(SEM_INPUT_WRITTEN))
    }

    pub fn wait_input(&self) -> anyhow::Result<()> {
        Self::sem_wait(self.sem(SEM_INPUT_WRITTEN))
    }

    /// flags word shared with the resource manager; a stale read at
    /// most defers a policy change by one tick
    pub fn flags(&self) -> &AtomicU32 {
        unsafe { &(*self.header).flags }
    }

    pub fn offload(&self) -> bool {
        self.flags().load(Ordering::Relaxed) & super::OFFLOAD != 0
    }

    pub fn set_offload(&self, on: bool) {
        match on {
            true => self.flags().fetch_or(super::OFFLOAD, Ordering::Relaxed),
            false => self.flags().fetch_and(!super::OFFLOAD, Ordering::Relaxed),
        };
    }

    pub fn set_stat_time(&self, secs: Secs) {
        unsafe { std::ptr::write_volatile(&raw mut (*self.header).stats_dbl[0], secs) }
    }

    pub fn stat_time(&self) -> Secs {
        unsafe { std::ptr::read_volatile(&raw const (*self.header).stats_dbl[0]) }
    }

    pub fn set_stat_offloaded(&self, offloaded: bool) {
        unsafe { std::ptr::write_volatile(&raw mut (*self.header).stats_int[0], offloaded as i32) }
    }

    pub fn stat_offloaded(&self) -> bool {
        unsafe { std::ptr::read_volatile(&raw const (*self.header).stats_int[0]) != 0 }
    }

    /// mark the segment for removal; the kernel reaps it once the last
    /// attachment goes away
    pub fn remove(&self) {
        unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.owner {
            self.remove();
        }
        unsafe { libc::shmdt(self.header as *const libc::c_void) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(salt: i32) -> i32 {
        0x5A000000 | ((std::process::id() as i32 & 0xFFFF) << 8) | salt
    }

    #[test]
    fn create_then_attach_shares_state_and_shape() {
        let owner = Region::create(key(1), 2, 1).unwrap();
        let peer = Region::attach(key(1)).unwrap();
        assert_eq!((peer.n(), peer.m()), (2, 1));
        assert!(peer.validate(2, 1).is_ok());
        assert!(peer.validate(3, 1).is_err());
        peer.write_state(&[0.5, -0.5]);
        assert_eq!(owner.read_state(), vec![0.5, -0.5]);
        owner.write_input(&[7.]);
        assert_eq!(peer.read_input(), vec![7.]);
    }

    #[test]
    fn flags_and_stats_are_visible_across_attachments() {
        let owner = Region::create(key(2), 1, 1).unwrap();
        let peer = Region::attach(key(2)).unwrap();
        assert!(!owner.offload());
        peer.set_offload(true);
        assert!(owner.offload());
        peer.set_offload(false);
        assert!(!owner.offload());
        owner.set_stat_time(0.125);
        owner.set_stat_offloaded(true);
        assert_eq!(peer.stat_time(), 0.125);
        assert!(peer.stat_offloaded());
    }

    #[test]
    fn rendezvous_alternates_state_and_input() {
        let region = Region::create(key(3), 1, 1).unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                // plant side
                for k in 0..3 {
                    region.write_state(&[k as f64]);
                    region.post_state().unwrap();
                    region.wait_input().unwrap();
                    assert_eq!(region.read_input(), vec![-(k as f64)]);
                }
            });
            // controller side
            for _ in 0..3 {
                region.wait_state().unwrap();
                let x = region.read_state();
                region.write_input(&[-x[0]]);
                region.post_input().unwrap();
            }
        });
    }

    #[test]
    fn second_create_on_same_key_fails() {
        let _owner = Region::create(key(4), 1, 1).unwrap();
        assert!(Region::create(key(4), 1, 1).is_err());
    }
}
