//! Per-process CPU and resident memory, read from `/proc`.
//!
//! Sampling never fails: on other platforms, for vanished processes or when a
//! sample runs past its deadline the result is zeroed.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f64,
    pub rss_bytes: u64,
}

impl ProcessUsage {
    pub fn memory_mb(&self) -> f64 {
        self.rss_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// CPU share over `window`, measured on a separate task bounded by `limit`.
pub async fn sample_usage(pid: u32, window: Duration, limit: Duration) -> ProcessUsage {
    let mut task = tokio::spawn(measure(pid, window));

    match timeout(limit, &mut task).await {
        Ok(Ok(Some(usage))) => usage,
        Ok(Ok(None)) => {
            debug!(pid, "process usage unavailable");
            ProcessUsage::default()
        }
        Ok(Err(err)) => {
            warn!(pid, error = %err, "usage sampler failed");
            ProcessUsage::default()
        }
        Err(_) => {
            task.abort();
            warn!(pid, limit_ms = limit.as_millis() as u64, "usage sampling timed out");
            ProcessUsage::default()
        }
    }
}

async fn measure(pid: u32, window: Duration) -> Option<ProcessUsage> {
    let before = read_proc_cpu_ticks(pid).await?;
    let started = Instant::now();
    sleep(window).await;
    let after = read_proc_cpu_ticks(pid).await?;
    let elapsed = started.elapsed();

    Some(ProcessUsage {
        cpu_percent: cpu_percent(before, after, elapsed),
        rss_bytes: read_proc_rss_bytes(pid).await.unwrap_or(0),
    })
}

fn cpu_percent(before: u64, after: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let cpu = (after.saturating_sub(before) as f64 / ticks_per_sec() as f64) / secs * 100.0;
    if cpu.is_finite() { cpu.max(0.0) } else { 0.0 }
}

#[cfg(target_os = "linux")]
fn ticks_per_sec() -> u64 {
    static TICKS: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *TICKS.get_or_init(|| {
        let v = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if v <= 0 { 100 } else { v as u64 }
    })
}

#[cfg(not(target_os = "linux"))]
fn ticks_per_sec() -> u64 {
    100
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    static PAGE: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *PAGE.get_or_init(|| {
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v <= 0 { 4096 } else { v as u64 }
    })
}

/// utime + stime, in clock ticks.
#[cfg(target_os = "linux")]
async fn read_proc_cpu_ticks(pid: u32) -> Option<u64> {
    let stat = tokio::fs::read_to_string(format!("/proc/{pid}/stat")).await.ok()?;
    // comm may contain spaces; fields resume after its closing paren
    let rest = stat.get(stat.rfind(')')? + 2..)?;
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime.saturating_add(stime))
}

#[cfg(not(target_os = "linux"))]
async fn read_proc_cpu_ticks(_pid: u32) -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
async fn read_proc_rss_bytes(pid: u32) -> Option<u64> {
    let statm = tokio::fs::read_to_string(format!("/proc/{pid}/statm")).await.ok()?;
    let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident.saturating_mul(page_size()))
}

#[cfg(not(target_os = "linux"))]
async fn read_proc_rss_bytes(_pid: u32) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_percent_is_ticks_over_wall_time() {
        let tps = ticks_per_sec();
        let pct = cpu_percent(0, tps, Duration::from_secs(2));
        assert!((pct - 50.0).abs() < 1e-9);
        assert_eq!(cpu_percent(10, 5, Duration::from_secs(1)), 0.0);
        assert_eq!(cpu_percent(0, 10, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn vanished_process_reads_as_zero() {
        let usage = sample_usage(u32::MAX, Duration::from_millis(10), Duration::from_secs(1)).await;
        assert_eq!(usage, ProcessUsage::default());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn samples_own_process() {
        let usage = sample_usage(
            std::process::id(),
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
        .await;
        assert!(usage.rss_bytes > 0);
        assert!(usage.memory_mb() > 0.0);
        assert!(usage.cpu_percent >= 0.0);
    }
}
