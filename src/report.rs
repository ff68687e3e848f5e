// End-of-run reporting
// Line-oriented, human-readable: one block per task (elapsed, thread,
// summary), an aggregate line, and optionally a resident-set line when heap
// reporting is requested.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;

use crate::task::CompletedTask;

/// Write the per-task results log.
pub fn write_results(
    out: &mut impl Write,
    completed: &[CompletedTask],
    wall_time: Duration,
) -> Result<()> {
    writeln!(out, "\n{:.3} msec total", wall_time.as_secs_f64() * 1000.0)?;
    writeln!(out, "\nResults for {} tasks:", completed.len())?;
    for task in completed {
        writeln!(out, "\nTASK: {}", task.task)?;
        writeln!(out, "  {:.3} msec", task.elapsed.as_secs_f64() * 1000.0)?;
        writeln!(out, "  thread {}", task.thread)?;
        writeln!(out, "  {}", task.summary)?;
    }
    Ok(())
}

/// Resident set size of this process in bytes, if the platform exposes it.
pub fn resident_set_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Append the heap-usage line, when available.
pub fn write_heap_usage(out: &mut impl Write) -> Result<()> {
    match resident_set_bytes() {
        Some(bytes) => writeln!(out, "\nHEAP: {bytes}")?,
        None => writeln!(out, "\nHEAP: unavailable on this platform")?,
    }
    Ok(())
}
