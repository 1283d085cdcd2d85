//! Bandwidth throttling to simulate period-accurate connection speeds (§4.3).

use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Named speed tiers in bytes/sec. `"none"` (or any unrecognized key) means
/// unlimited.
pub fn speed_tiers() -> &'static [(&'static str, u64)] {
    &[
        ("14.4k", 1800),
        ("28.8k", 3600),
        ("56k", 7000),
        ("isdn", 16000),
        ("dsl", 125_000),
        ("none", 0),
    ]
}

pub fn bytes_per_sec(speed: &str) -> u64 {
    speed_tiers()
        .iter()
        .find(|(name, _)| *name == speed)
        .map(|(_, rate)| *rate)
        .unwrap_or(0)
}

/// Write `data` to `writer`, throttled to `speed`'s byte rate. At `"none"` (or
/// an unknown tier), this is a single unthrottled write. Otherwise the data
/// is sent in chunks sized to span ~100ms at the target rate, with a 100ms
/// sleep between chunks.
pub async fn write_throttled<W>(writer: &mut W, data: &[u8], speed: &str) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let rate = bytes_per_sec(speed);

    if rate == 0 || data.is_empty() {
        writer.write_all(data).await?;
        writer.flush().await?;
        return Ok(());
    }

    let chunk_size = std::cmp::max(1, (rate / 10) as usize);
    let mut offset = 0;

    while offset < data.len() {
        let end = std::cmp::min(offset + chunk_size, data.len());
        writer.write_all(&data[offset..end]).await?;
        writer.flush().await?;
        offset = end;
        if offset < data.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_match_original_byte_rates() {
        assert_eq!(bytes_per_sec("14.4k"), 1800);
        assert_eq!(bytes_per_sec("28.8k"), 3600);
        assert_eq!(bytes_per_sec("56k"), 7000);
        assert_eq!(bytes_per_sec("isdn"), 16000);
        assert_eq!(bytes_per_sec("dsl"), 125_000);
        assert_eq!(bytes_per_sec("none"), 0);
    }

    #[test]
    fn unknown_speed_defaults_to_unlimited() {
        assert_eq!(bytes_per_sec("blazing"), 0);
    }

    #[tokio::test]
    async fn unlimited_speed_writes_everything_at_once() {
        let mut buf: Vec<u8> = Vec::new();
        write_throttled(&mut buf, b"hello world", "none").await.unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn throttled_write_preserves_full_payload() {
        let mut buf: Vec<u8> = Vec::new();
        let data = vec![7u8; 5000];
        write_throttled(&mut buf, &data, "56k").await.unwrap();
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn empty_payload_is_a_noop() {
        let mut buf: Vec<u8> = Vec::new();
        write_throttled(&mut buf, b"", "14.4k").await.unwrap();
        assert!(buf.is_empty());
    }
}
