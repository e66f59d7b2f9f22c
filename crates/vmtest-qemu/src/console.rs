//! Expect-style access to a VM's serial console.

use crate::error::{Result, VmError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

/// Timeout used by [`Console::expect_string`].
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Live view of the VM's combined stdout/stderr plus write access to stdin.
///
/// Output is delivered by the VM's pump task as it is produced. Bytes read
/// while searching for a marker but lying past it stay buffered for the next
/// call.
#[derive(Debug)]
pub struct Console {
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
    stdin: Option<ChildStdin>,
}

impl Console {
    pub(crate) fn new(output: mpsc::UnboundedReceiver<Vec<u8>>, stdin: Option<ChildStdin>) -> Self {
        Self {
            output,
            buffer: Vec::new(),
            stdin,
        }
    }

    /// Wait up to [`DEFAULT_EXPECT_TIMEOUT`] for `marker` to appear.
    pub async fn expect_string(&mut self, marker: &str) -> Result<String> {
        self.expect_string_timeout(marker, DEFAULT_EXPECT_TIMEOUT)
            .await
    }

    /// Wait for `marker` to appear in the output.
    ///
    /// Returns everything consumed up to and including the marker.
    ///
    /// # Errors
    /// - [`VmError::ConsoleClosed`] if output ends before the marker
    /// - [`VmError::Timeout`] if `timeout` elapses first
    pub async fn expect_string_timeout(&mut self, marker: &str, timeout: Duration) -> Result<String> {
        let start = std::time::Instant::now();
        tracing::debug!(marker, timeout_ms = timeout.as_millis() as u64, "Expecting console output");

        match tokio::time::timeout(timeout, self.read_until(marker)).await {
            Ok(Ok(seen)) => {
                tracing::debug!(
                    marker,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Console marker found"
                );
                Ok(seen)
            }
            Ok(Err(e)) => {
                tracing::warn!(marker, error = %e, "Console closed while expecting");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(marker, timeout_ms = timeout.as_millis() as u64, "Console expect timeout");
                Err(VmError::Timeout(timeout))
            }
        }
    }

    async fn read_until(&mut self, marker: &str) -> Result<String> {
        // Start of the region not yet searched; a match can begin at most
        // `marker.len() - 1` bytes before the end of the previous pass.
        let mut from = 0;
        loop {
            if let Some(pos) = find(&self.buffer[from..], marker.as_bytes()) {
                let end = from + pos + marker.len();
                let seen: Vec<u8> = self.buffer.drain(..end).collect();
                return Ok(String::from_utf8_lossy(&seen).into_owned());
            }
            from = self.buffer.len().saturating_sub(marker.len().saturating_sub(1));
            match self.output.recv().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => {
                    return Err(VmError::ConsoleClosed {
                        marker: marker.to_string(),
                    })
                }
            }
        }
    }

    /// Drain output until the VM closes its stdout and stderr.
    pub async fn read_to_end(&mut self) -> String {
        while let Some(chunk) = self.output.recv().await {
            self.buffer.extend_from_slice(&chunk);
        }
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Write `input` to the VM's stdin.
    pub async fn send(&mut self, input: &str) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VmError::InvalidState {
                expected: "stdin open".into(),
                actual: "stdin closed".into(),
            });
        };
        tracing::trace!(len = input.len(), "Writing to console");
        stdin.write_all(input.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the VM's stdin, signalling EOF to the guest.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console() -> (mpsc::UnboundedSender<Vec<u8>>, Console) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Console::new(rx, None))
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"hello world", b"world"), Some(6));
        assert_eq!(find(b"hello", b"xyz"), None);
        assert_eq!(find(b"ab", b"abc"), None);
        assert_eq!(find(b"abc", b""), Some(0));
    }

    #[tokio::test]
    async fn test_marker_split_across_chunks() {
        let (tx, mut console) = console();
        tx.send(b"booting... I AM".to_vec()).unwrap();
        tx.send(b" HERE\nrest".to_vec()).unwrap();

        let seen = console.expect_string("I AM HERE").await.unwrap();
        assert_eq!(seen, "booting... I AM HERE");

        drop(tx);
        assert_eq!(console.read_to_end().await, "\nrest");
    }

    #[tokio::test]
    async fn test_marker_after_many_small_chunks() {
        let (tx, mut console) = console();
        for _ in 0..10_000 {
            tx.send(b"ab".to_vec()).unwrap();
        }
        for byte in b"login:" {
            tx.send(vec![*byte]).unwrap();
        }
        tx.send(b"tail".to_vec()).unwrap();

        let seen = console.expect_string("login:").await.unwrap();
        assert_eq!(seen.len(), 20_000 + "login:".len());
        assert!(seen.ends_with("ablogin:"));

        drop(tx);
        assert_eq!(console.read_to_end().await, "tail");
    }

    #[tokio::test]
    async fn test_marker_overlapping_previous_chunk() {
        let (tx, mut console) = console();
        tx.send(b"xxlog".to_vec()).unwrap();
        tx.send(b"in".to_vec()).unwrap();
        tx.send(b": ".to_vec()).unwrap();
        assert_eq!(console.expect_string("login:").await.unwrap(), "xxlogin:");
    }

    #[tokio::test]
    async fn test_consecutive_markers() {
        let (tx, mut console) = console();
        tx.send(b"one two three".to_vec()).unwrap();
        assert_eq!(console.expect_string("one").await.unwrap(), "one");
        assert_eq!(console.expect_string("three").await.unwrap(), " two three");
    }

    #[tokio::test]
    async fn test_closed_before_marker() {
        let (tx, mut console) = console();
        tx.send(b"kernel panic".to_vec()).unwrap();
        drop(tx);
        let err = console.expect_string("login:").await.unwrap_err();
        assert!(matches!(err, VmError::ConsoleClosed { ref marker } if marker == "login:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (_tx, mut console) = console();
        let err = console
            .expect_string_timeout("never", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_send_without_stdin() {
        let (_tx, mut console) = console();
        assert!(matches!(
            console.send("ls\n").await,
            Err(VmError::InvalidState { .. })
        ));
    }
}
