//! the worker pool's pending-request board: a counting semaphore whose
//! value is the queue depth, a mutex-protected cursor handing out job
//! ids, and one release/start/finish record per job. the workload
//! driver owns it; the resource manager only ever reads the count.

use crate::Secs;
use std::time::Duration;

#[repr(C)]
struct Header {
    pending: libc::sem_t,
    mutex: libc::sem_t,
    next_req: u64,
    jobs: u64,
}

/// per-job timestamps, seconds since the epoch
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobRecord {
    pub release: Secs,
    pub start: Secs,
    pub finish: Secs,
}

pub struct PendingBoard {
    id: i32,
    header: *mut Header,
    owner: bool,
}

unsafe impl Send for PendingBoard {}
unsafe impl Sync for PendingBoard {}

fn now() -> Secs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs_f64()
}

impl PendingBoard {
    fn byte_size(jobs: usize) -> usize {
        std::mem::size_of::<Header>() + jobs * std::mem::size_of::<JobRecord>()
    }

    pub fn create(key: i32, jobs: usize) -> anyhow::Result<Self> {
        let id = unsafe {
            libc::shmget(
                key,
                Self::byte_size(jobs),
                crate::SHM_PERMS | libc::IPC_CREAT | libc::IPC_EXCL,
            )
        };
        if id == -1 {
            anyhow::bail!(
                "cannot create pending board key {:#x} (in use? try ipcs): {}",
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
        let board = Self {
            id,
            header,
            owner: true,
        };
        unsafe {
            std::ptr::write_bytes(board.header as *mut u8, 0, Self::byte_size(jobs));
            (*board.header).jobs = jobs as u64;
            if libc::sem_init(&raw mut (*board.header).pending, 1, 0) < 0
                || libc::sem_init(&raw mut (*board.header).mutex, 1, 1) < 0
            {
                anyhow::bail!(
                    "cannot initialize board semaphores: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        Ok(board)
    }

    pub fn attach(key: i32) -> anyhow::Result<Self> {
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            anyhow::bail!(
                "no pending board at key {:#x} (is the workload running?): {}",
                key,
                std::io::Error::last_os_error()
            );
        }
        Ok(Self {
            id,
            header: Self::map(id)?,
            owner: false,
        })
    }

    fn map(id: i32) -> anyhow::Result<*mut Header> {
        let at = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if at as isize == -1 {
            anyhow::bail!(
                "cannot attach pending board: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(at as *mut Header)
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn jobs(&self) -> usize {
        unsafe { (*self.header).jobs as usize }
    }

    /// queue depth right now. reading is the manager's whole contract
    /// with this region.
    pub fn pending(&self) -> i32 {
        let mut value = 0;
        unsafe { libc::sem_getvalue(&raw mut (*self.header).pending, &mut value) };
        value
    }

    /// announce one released request
    pub fn post(&self) -> anyhow::Result<()> {
        match unsafe { libc::sem_post(&raw mut (*self.header).pending) } {
            0 => Ok(()),
            _ => Err(anyhow::anyhow!(
                "pending post failed: {}",
                std::io::Error::last_os_error()
            )),
        }
    }

    /// block for one pending request, up to the timeout. Ok(false)
    /// means the timeout ran out.
    pub fn wait_timeout(&self, timeout: Duration) -> anyhow::Result<bool> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }
        loop {
            if unsafe { libc::sem_timedwait(&raw mut (*self.header).pending, &ts) } == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => anyhow::bail!("pending wait failed: {}", err),
            }
        }
    }

    /// claim the next job id under the board mutex
    pub fn take_next(&self) -> anyhow::Result<u64> {
        let mutex = unsafe { &raw mut (*self.header).mutex };
        loop {
            if unsafe { libc::sem_wait(mutex) } == 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                anyhow::bail!("board mutex wait failed: {}", err);
            }
        }
        let id = unsafe {
            let id = (*self.header).next_req;
            (*self.header).next_req = id + 1;
            id
        };
        unsafe { libc::sem_post(mutex) };
        Ok(id)
    }

    /// how many jobs have been claimed so far. monotone, so a racy
    /// read only ever under-reports.
    pub fn claimed(&self) -> u64 {
        unsafe { std::ptr::read_volatile(&raw const (*self.header).next_req) }
    }

    fn record_ptr(&self, id: u64) -> *mut JobRecord {
        assert!((id as usize) < self.jobs());
        unsafe {
            ((self.header as *mut u8).add(std::mem::size_of::<Header>()) as *mut JobRecord)
                .add(id as usize)
        }
    }

    pub fn mark_release(&self, id: u64) {
        unsafe { (*self.record_ptr(id)).release = now() }
    }

    pub fn mark_start(&self, id: u64) {
        unsafe { (*self.record_ptr(id)).start = now() }
    }

    pub fn mark_finish(&self, id: u64) {
        unsafe { (*self.record_ptr(id)).finish = now() }
    }

    pub fn record(&self, id: u64) -> JobRecord {
        unsafe { *self.record_ptr(id) }
    }

    pub fn remove(&self) {
        unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
    }
}

impl Drop for PendingBoard {
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
        0x5B000000 | ((std::process::id() as i32 & 0xFFFF) << 8) | salt
    }

    #[test]
    fn queue_depth_tracks_posts_and_waits() {
        let board = PendingBoard::create(key(1), 4).unwrap();
        assert_eq!(board.pending(), 0);
        board.post().unwrap();
        board.post().unwrap();
        assert_eq!(board.pending(), 2);
        assert!(board.wait_timeout(Duration::from_millis(100)).unwrap());
        assert_eq!(board.pending(), 1);
    }

    #[test]
    fn empty_queue_times_out() {
        let board = PendingBoard::create(key(2), 1).unwrap();
        assert!(!board.wait_timeout(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn job_ids_are_handed_out_in_order() {
        let board = PendingBoard::create(key(3), 3).unwrap();
        assert_eq!(board.take_next().unwrap(), 0);
        assert_eq!(board.take_next().unwrap(), 1);
        board.mark_release(0);
        board.mark_start(0);
        board.mark_finish(0);
        let record = board.record(0);
        assert!(record.release > 0.);
        assert!(record.finish >= record.start);
        assert_eq!(board.record(2), JobRecord::default());
    }

    #[test]
    fn manager_view_attaches_read_only() {
        let board = PendingBoard::create(key(4), 2).unwrap();
        let view = PendingBoard::attach(key(4)).unwrap();
        assert_eq!(view.jobs(), 2);
        board.post().unwrap();
        assert_eq!(view.pending(), 1);
    }
}
