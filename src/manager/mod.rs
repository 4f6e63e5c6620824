//! resource manager: a periodic policy that watches the worker pool's
//! queue depth and decides whether the controller should offload its
//! solves. asymmetric by design: any pending work offloads at once,
//! while coming back on board waits for a long streak of empty samples
//! so the flag does not flap around an empty queue.

use crate::shm::PendingBoard;
use crate::shm::Region;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Local,
    Offloaded,
}

/// the policy itself, kept free of any I/O so it can be exercised
/// sample by sample
#[derive(Debug)]
pub struct Hysteresis {
    mode: Mode,
    empty_streak: u32,
    threshold: u32,
}

impl Hysteresis {
    pub fn new(threshold: u32) -> Self {
        Self {
            mode: Mode::Local,
            empty_streak: 0,
            threshold,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// feed one queue-depth sample; returns the new mode on the
    /// samples that switch it
    pub fn sample(&mut self, pending: u32) -> Option<Mode> {
        match self.mode {
            Mode::Local => match pending > 0 {
                true => {
                    self.mode = Mode::Offloaded;
                    self.empty_streak = 0;
                    Some(Mode::Offloaded)
                }
                false => None,
            },
            Mode::Offloaded => match pending > 0 {
                true => None,
                false => {
                    self.empty_streak += 1;
                    match self.empty_streak >= self.threshold {
                        true => {
                            self.mode = Mode::Local;
                            Some(Mode::Local)
                        }
                        false => None,
                    }
                }
            },
        }
    }
}

pub struct Manager {
    board: PendingBoard,
    region: Region,
    fsm: Hysteresis,
    period: Duration,
    log: std::fs::File,
}

impl Manager {
    /// attach to both regions and start from the on-board state
    pub fn new(board_key: i32, region_key: i32, log_path: &str) -> anyhow::Result<Self> {
        let board = PendingBoard::attach(board_key)?;
        let region = Region::attach(region_key)?;
        region.set_offload(false);
        let mut log = std::fs::File::create(log_path)?;
        Self::stamp(&mut log, Mode::Local)?;
        Ok(Self {
            board,
            region,
            fsm: Hysteresis::new(crate::MANAGER_ONBOARD_STREAK),
            period: Duration::from_millis(crate::MANAGER_PERIOD_MS),
            log,
        })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        log::info!(
            "resource manager up: period {:?}, onboard after {} empty samples",
            self.period,
            crate::MANAGER_ONBOARD_STREAK
        );
        loop {
            std::thread::sleep(self.period);
            self.poll()?;
        }
    }

    /// one period: sample the queue, apply a transition if the policy
    /// asks for one
    pub fn poll(&mut self) -> anyhow::Result<()> {
        let pending = self.board.pending().max(0) as u32;
        if let Some(mode) = self.fsm.sample(pending) {
            self.region.set_offload(mode == Mode::Offloaded);
            Self::stamp(&mut self.log, mode)?;
            log::info!("{:?} with {} pending requests", mode, pending);
        }
        Ok(())
    }

    fn stamp(log: &mut std::fs::File, mode: Mode) -> anyhow::Result<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        writeln!(
            log,
            "{}.{:09},{},",
            now.as_secs(),
            now.subsec_nanos(),
            (mode == Mode::Offloaded) as u32
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_work_offloads_immediately() {
        let mut fsm = Hysteresis::new(10);
        assert_eq!(fsm.mode(), Mode::Local);
        assert_eq!(fsm.sample(1), Some(Mode::Offloaded));
        assert_eq!(fsm.mode(), Mode::Offloaded);
    }

    #[test]
    fn onboarding_takes_exactly_the_threshold_of_empty_samples() {
        let mut fsm = Hysteresis::new(10);
        assert_eq!(fsm.sample(1), Some(Mode::Offloaded));
        assert_eq!(fsm.sample(1), None);
        for _ in 0..9 {
            assert_eq!(fsm.sample(0), None);
        }
        assert_eq!(fsm.sample(0), Some(Mode::Local));
        assert_eq!(fsm.mode(), Mode::Local);
    }

    #[test]
    fn empty_streak_survives_pending_interruptions() {
        // the streak is not reset by a busy sample, matching the
        // period-counting policy the hysteresis came from
        let mut fsm = Hysteresis::new(3);
        fsm.sample(5);
        assert_eq!(fsm.sample(0), None);
        assert_eq!(fsm.sample(0), None);
        assert_eq!(fsm.sample(2), None);
        assert_eq!(fsm.sample(0), Some(Mode::Local));
    }

    #[test]
    fn quiet_queue_never_offloads() {
        let mut fsm = Hysteresis::new(10);
        for _ in 0..100 {
            assert_eq!(fsm.sample(0), None);
        }
        assert_eq!(fsm.mode(), Mode::Local);
    }

    #[test]
    fn manager_toggles_the_region_flag() {
        let region_key = 0x5D000000 | ((std::process::id() as i32 & 0xFFFF) << 8) | 1;
        let board_key = 0x5D000000 | ((std::process::id() as i32 & 0xFFFF) << 8) | 2;
        let region = crate::shm::Region::create(region_key, 1, 1).unwrap();
        let board = PendingBoard::create(board_key, 4).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rm.csv");
        let mut manager =
            Manager::new(board_key, region_key, path.to_str().unwrap()).unwrap();
        board.post().unwrap();
        manager.poll().unwrap();
        assert!(region.offload());
        // drain the queue, then onboard after the streak
        board.wait_timeout(Duration::from_millis(100)).unwrap();
        for _ in 0..crate::MANAGER_ONBOARD_STREAK {
            manager.poll().unwrap();
        }
        assert!(!region.offload());
        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.lines().count(), 3); // initial local, offload, local
        assert!(log.lines().nth(1).unwrap().ends_with(",1,"));
    }
}
