//! the co-resident workload whose queue pressure drives the offload
//! policy: a releaser paces requests out of a CSV schedule, workers
//! burn CPU next to the controller, and every job leaves a
//! release/start/finish record on the pending board.

use crate::Secs;
use crate::shm::PendingBoard;
use anyhow::Context;
use std::io::Write;
use std::time::Duration;

/// how long a worker sleeps between checks for the end of the workload
const WORKER_POLL: Duration = Duration::from_millis(100);
/// divisions per request, sized to hold a core busy for a while
const SPIN_ITERATIONS: u64 = 40_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Burst {
    pub count: u64,
    pub separation: Secs,
}

/// request schedule: each row releases `count` requests spaced
/// `separation` seconds apart
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub bursts: Vec<Burst>,
}

impl Schedule {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading schedule {}", path))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut bursts = vec![];
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim().trim_end_matches(',');
            if line.is_empty() {
                continue;
            }
            let (count, separation) = line
                .split_once(',')
                .ok_or_else(|| anyhow::anyhow!("schedule line {}: expected count,seconds", lineno + 1))?;
            bursts.push(Burst {
                count: count
                    .trim()
                    .parse()
                    .with_context(|| format!("schedule line {}: bad count", lineno + 1))?,
                separation: separation
                    .trim()
                    .parse()
                    .with_context(|| format!("schedule line {}: bad separation", lineno + 1))?,
            });
        }
        Ok(Self { bursts })
    }

    pub fn jobs(&self) -> usize {
        self.bursts.iter().map(|b| b.count as usize).sum()
    }
}

/// pace the schedule out onto the board, one post per request
pub fn release(board: &PendingBoard, schedule: &Schedule) -> anyhow::Result<()> {
    let mut id = 0;
    for burst in schedule.bursts.iter() {
        for _ in 0..burst.count {
            std::thread::sleep(Duration::from_secs_f64(burst.separation.max(0.)));
            board.mark_release(id);
            board.post()?;
            id += 1;
        }
    }
    Ok(())
}

/// serve requests until the whole workload has been claimed. `spin` is
/// the unit of work, injectable so the pool is testable without
/// burning forty million divisions per job.
pub fn work(board: &PendingBoard, spin: impl Fn()) -> anyhow::Result<()> {
    let jobs = board.jobs() as u64;
    loop {
        if !board.wait_timeout(WORKER_POLL)? {
            if board.claimed() >= jobs {
                return Ok(());
            }
            continue;
        }
        let id = board.take_next()?;
        board.mark_start(id);
        spin();
        board.mark_finish(id);
        if id + 1 >= jobs {
            return Ok(());
        }
    }
}

/// anything the optimizer cannot delete
pub fn busy_spin() {
    let mut var = 2.0f64;
    for _ in 0..SPIN_ITERATIONS {
        var = 1.0 / var;
    }
    std::hint::black_box(var);
}

/// one CSV row per job: id, release, start, finish
pub fn dump_records(board: &PendingBoard, path: &str) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating log {}", path))?;
    for id in 0..board.jobs() as u64 {
        let r = board.record(id);
        writeln!(
            file,
            "{},{:.9},{:.9},{:.9},",
            id, r.release, r.start, r.finish
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(salt: i32) -> i32 {
        0x5E000000 | ((std::process::id() as i32 & 0xFFFF) << 8) | salt
    }

    #[test]
    fn schedule_rows_parse_with_trailing_commas_and_blanks() {
        let schedule = Schedule::parse("3,0.5,\n\n2,0.001\n").unwrap();
        assert_eq!(
            schedule.bursts,
            vec![
                Burst { count: 3, separation: 0.5 },
                Burst { count: 2, separation: 0.001 },
            ]
        );
        assert_eq!(schedule.jobs(), 5);
    }

    #[test]
    fn malformed_schedule_names_the_line() {
        let err = Schedule::parse("1,0.1\nnonsense\n").unwrap_err().to_string();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn pool_drains_the_whole_schedule() {
        let board = PendingBoard::create(key(1), 5).unwrap();
        let schedule = Schedule::parse("5,0.0\n").unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| release(&board, &schedule).unwrap());
            scope.spawn(|| work(&board, || {}).unwrap());
            scope.spawn(|| work(&board, || {}).unwrap());
        });
        assert_eq!(board.claimed(), 5);
        for id in 0..5 {
            let r = board.record(id);
            assert!(r.release > 0.);
            assert!(r.start >= r.release - 1.0);
            assert!(r.finish >= r.start);
        }
    }
}
