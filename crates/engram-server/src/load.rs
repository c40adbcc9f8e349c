//! System Load Probe
//!
//! Weighted mix of process memory pressure (0.6) and CPU pressure (0.4),
//! clamped to [0,1]. Reads /proc on Linux and reports 0.0 elsewhere, so
//! tests and non-Linux hosts see an always-idle system.

const MEMORY_WEIGHT: f64 = 0.6;
const CPU_WEIGHT: f64 = 0.4;

/// Current system load in [0,1].
pub fn system_load() -> f64 {
    let load = MEMORY_WEIGHT * memory_fraction() + CPU_WEIGHT * cpu_fraction();
    load.clamp(0.0, 1.0)
}

#[cfg(target_os = "linux")]
fn memory_fraction() -> f64 {
    let resident_kb = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok())
        });
    let total_kb = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| {
            meminfo
                .lines()
                .find(|line| line.starts_with("MemTotal:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok())
        });

    match (resident_kb, total_kb) {
        (Some(resident), Some(total)) if total > 0.0 => (resident / total).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

#[cfg(target_os = "linux")]
fn cpu_fraction() -> f64 {
    let one_minute = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|loadavg| {
            loadavg
                .split_whitespace()
                .next()
                .and_then(|value| value.parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0);
    (one_minute / cpus).clamp(0.0, 1.0)
}

#[cfg(not(target_os = "linux"))]
fn memory_fraction() -> f64 {
    0.0
}

#[cfg(not(target_os = "linux"))]
fn cpu_fraction() -> f64 {
    0.0
}
