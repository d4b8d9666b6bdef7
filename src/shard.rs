//! Time-rotating shard assignment for queue workers.
//!
//! Each worker owns one shard of the job table at a time (`job_id mod W`),
//! but ownership rotates with the wall clock: every `W` minutes the mapping
//! shifts by one, so a stuck or slow worker cannot permanently starve a
//! shard. No coordinator is involved; every worker computes its shard from
//! its own ordinal and the current minute on every poll.

use chrono::Timelike;

/// Compute the shard a worker is responsible for at a given wall-clock
/// minute.
///
/// `ordinal` is the worker's index in `[0, worker_count)`; `minute` is the
/// minute-of-hour (0..60). Pure function so rotation is unit-testable
/// without touching the clock.
pub fn rotating_shard(ordinal: u32, minute: u32, worker_count: u32) -> u32 {
    debug_assert!(worker_count >= 1);
    let rotation = minute / worker_count;
    (ordinal + rotation) % worker_count
}

/// Current minute-of-hour, read once per poll tick by the worker loop.
pub fn wall_clock_minute() -> u32 {
    chrono::Local::now().minute()
}
