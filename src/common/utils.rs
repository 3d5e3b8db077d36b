//! Utility functions for fleetlb

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(0);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        "h" => std::time::Duration::from_secs(num * 3600),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries - 1 => {
                tracing::debug!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

/// Validate a node endpoint (`host:port`, reasonable length)
pub fn validate_endpoint(endpoint: &str) -> crate::Result<()> {
    if endpoint.is_empty() {
        return Err(crate::Error::InvalidConfig(
            "endpoint cannot be empty".into(),
        ));
    }

    if endpoint.len() > 255 {
        return Err(crate::Error::InvalidConfig(
            "endpoint too long (max 255 bytes)".into(),
        ));
    }

    if endpoint.chars().any(|c| c.is_control() || c.is_whitespace() || c == '/') {
        return Err(crate::Error::InvalidConfig(format!(
            "endpoint contains invalid characters: {:?}",
            endpoint
        )));
    }

    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(crate::Error::InvalidConfig(format!(
            "endpoint must be host:port, got {}",
            endpoint
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("7d").is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("127.0.0.1:7001").is_ok());
        assert!(validate_endpoint("worker-3.local:80").is_ok());
        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("no-port").is_err());
        assert!(validate_endpoint(":7001").is_err());
        assert!(validate_endpoint("host:99999").is_err());
        assert!(validate_endpoint("http://host:1").is_err());
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let res: crate::Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::NotFound("c".into())) }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let calls = AtomicUsize::new(0);
        let res = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::Timeout("probe".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(res.unwrap(), 2);
    }
}
