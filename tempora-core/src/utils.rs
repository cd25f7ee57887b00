//! # Common Utilities
//!
//! Utility functions and helpers used throughout TemporaDB.

/// Format bytes in human readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.log2() / 10.0).floor() as usize;
    let unit_index = exp.min(UNITS.len() - 1);
    let size = bytes_f64 / (1024_f64).powi(unit_index as i32);

    if size >= 100.0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else if size >= 10.0 {
        format!("{:.1} {}", size, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut f: F,
    max_retries: u32,
    initial_delay_ms: u64,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut delay = initial_delay_ms;
    let mut attempts = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts >= max_retries {
                    return Err(e);
                }

                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                delay = (delay * 2).min(60_000); // Cap at 1 minute
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[tokio::test]
    async fn test_retry_eventually_succeeds() {
        let mut remaining_failures = 2u32;
        let result: Result<u32, &'static str> = retry_with_backoff(
            || {
                let fail = remaining_failures > 0;
                if fail {
                    remaining_failures -= 1;
                }
                async move { if fail { Err("transient") } else { Ok(7) } }
            },
            5,
            1,
        )
        .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_error() {
        let result: Result<u32, &'static str> =
            retry_with_backoff(|| async { Err("down") }, 3, 1).await;
        assert_eq!(result, Err("down"));
    }
}
