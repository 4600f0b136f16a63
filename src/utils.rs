use tokio::signal;
use tracing::error;

use crate::models::MemoryUsage;

/// Wait for a termination signal and return its name.
///
/// Listens for Ctrl+C (`SIGINT`) and, on Unix, `SIGTERM` and `SIGQUIT`.
/// A handler that cannot be installed is logged and never fires; the other
/// signals keep working.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let quit = unix_signal(signal::unix::SignalKind::quit(), "SIGQUIT");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
        _ = quit => "SIGQUIT",
    }
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to install {name} handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

/// Current process memory usage, read from `/proc/self/status`.
///
/// Returns all-`None` on platforms without procfs.
pub fn memory_usage() -> MemoryUsage {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => parse_proc_status(&status),
        Err(_) => MemoryUsage::default(),
    }
}

fn parse_proc_status(status: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in status.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "VmRSS" => &mut usage.rss_bytes,
            "VmSize" => &mut usage.virtual_bytes,
            "VmHWM" => &mut usage.peak_rss_bytes,
            _ => continue,
        };
        // Values are reported in kB
        *slot = rest
            .split_whitespace()
            .next()
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024);
    }
    usage
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_status() {
        let status = concat!(
            "Name:\thardened_api\n",
            "VmHWM:\t    2048 kB\n",
            "VmRSS:\t    1024 kB\n",
            "VmSize:\t  40960 kB\n",
            "Threads:\t4\n",
        );
        let usage = parse_proc_status(status);

        assert_eq!(usage.rss_bytes, Some(1024 * 1024));
        assert_eq!(usage.virtual_bytes, Some(40960 * 1024));
        assert_eq!(usage.peak_rss_bytes, Some(2048 * 1024));
    }

    #[test]
    fn test_parse_proc_status_missing_fields() {
        let usage = parse_proc_status("Name:\tx\n");
        assert!(usage.rss_bytes.is_none());
        assert!(usage.virtual_bytes.is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_usage_on_linux() {
        assert!(memory_usage().rss_bytes.unwrap() > 0);
    }
}
