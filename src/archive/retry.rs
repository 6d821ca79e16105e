use std::time::Duration;

use super::ArchiveError;

/// Run `op`, retrying transient failures up to `max_retries` more times with
/// `delay` between attempts. Non-retryable errors return immediately.
pub fn with_retry<T>(
    label: &str,
    max_retries: usize,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, ArchiveError>,
) -> Result<T, ArchiveError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "{} failed, retrying",
                    label
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retries_transient_failures() {
        let calls = Cell::new(0);
        let result = with_retry("query", 2, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ArchiveError::Timeout)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry("query", 2, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(ArchiveError::Connection("refused".into()))
        });
        assert!(matches!(result, Err(ArchiveError::Connection(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_does_not_retry_parse_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry("query", 5, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(ArchiveError::Parse("bad json".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
