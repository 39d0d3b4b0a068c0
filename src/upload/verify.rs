//! Size-capped, hash-verifying body stream
//!
//! Wraps an inbound body and forwards at most `expected_size` bytes while
//! feeding them to a running SHA-256. When the last byte arrives the digest
//! is compared before that final chunk is released, so a corrupted segment
//! never reaches S3 in full. A body that ends early fails the same way.
//!
//! Failures are reported twice: as an `io::Error` item (which aborts the
//! outgoing request) and through the shared [`IntegrityProbe`], so the caller
//! can tell an integrity failure apart from a network failure.

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Shared record of a verification failure
#[derive(Debug, Clone, Default)]
pub struct IntegrityProbe {
    failure: Arc<Mutex<Option<String>>>,
}

impl IntegrityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&self, message: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(message);
        }
    }

    /// Failure message, if verification failed
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

pin_project! {
    /// Stream adapter enforcing declared size and SHA-256
    pub struct VerifyingStream<S> {
        #[pin]
        inner: S,
        expected_size: u64,
        expected_sha256: Option<String>,
        received: u64,
        hasher: Sha256,
        probe: IntegrityProbe,
        verified: bool,
        done: bool,
    }
}

impl<S> VerifyingStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    pub fn new(
        inner: S,
        expected_size: u64,
        expected_sha256: Option<String>,
        probe: IntegrityProbe,
    ) -> Self {
        Self {
            inner,
            expected_size,
            expected_sha256: expected_sha256.filter(|s| !s.is_empty()),
            received: 0,
            hasher: Sha256::new(),
            probe,
            verified: false,
            done: false,
        }
    }
}

fn integrity_error(probe: &IntegrityProbe, message: String) -> io::Error {
    probe.fail(message.clone());
    crate::metrics::record_integrity_failure();
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl<S> Stream for VerifyingStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            if *this.received == *this.expected_size && !*this.verified {
                // Zero-length body: nothing to read, only the digest to check
                *this.verified = true;
                if let Some(expected) = this.expected_sha256.as_deref() {
                    let actual = hex::encode(std::mem::take(this.hasher).finalize());
                    if !actual.eq_ignore_ascii_case(expected) {
                        *this.done = true;
                        return Poll::Ready(Some(Err(integrity_error(
                            this.probe,
                            format!("SHA-256 mismatch: expected {}, got {}", expected, actual),
                        ))));
                    }
                }
            }
            if *this.verified {
                *this.done = true;
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    let message = format!(
                        "Body ended after {} of {} bytes",
                        this.received, this.expected_size
                    );
                    return Poll::Ready(Some(Err(integrity_error(this.probe, message))));
                }
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let remaining = *this.expected_size - *this.received;
                    let chunk = if chunk.len() as u64 > remaining {
                        chunk.slice(..remaining as usize)
                    } else {
                        chunk
                    };
                    this.hasher.update(&chunk);
                    *this.received += chunk.len() as u64;

                    if *this.received == *this.expected_size {
                        *this.verified = true;
                        if let Some(expected) = this.expected_sha256.as_deref() {
                            let actual = hex::encode(std::mem::take(this.hasher).finalize());
                            if !actual.eq_ignore_ascii_case(expected) {
                                // Withhold the final chunk
                                *this.done = true;
                                return Poll::Ready(Some(Err(integrity_error(
                                    this.probe,
                                    format!(
                                        "SHA-256 mismatch: expected {}, got {}",
                                        expected, actual
                                    ),
                                ))));
                            }
                        }
                    }
                    return Poll::Ready(Some(Ok(chunk)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    async fn drain<S>(stream: S) -> (Vec<u8>, Option<io::Error>)
    where
        S: Stream<Item = Result<Bytes, io::Error>>,
    {
        let mut stream = Box::pin(stream);
        let mut data = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => return (data, Some(e)),
            }
        }
        (data, None)
    }

    #[tokio::test]
    async fn test_matching_hash_passes_all_bytes() {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            chunks(&[b"hello ", b"world"]),
            11,
            Some(sha256_hex(b"hello world")),
            probe.clone(),
        );

        let (data, error) = drain(stream).await;
        assert_eq!(data, b"hello world");
        assert!(error.is_none());
        assert!(probe.failure().is_none());
    }

    #[tokio::test]
    async fn test_mismatch_withholds_final_chunk() {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            chunks(&[b"hello ", b"world"]),
            11,
            Some(sha256_hex(b"hello there")),
            probe.clone(),
        );

        let (data, error) = drain(stream).await;
        assert_eq!(data, b"hello ");
        assert_eq!(error.unwrap().kind(), io::ErrorKind::InvalidData);
        assert!(probe.failure().unwrap().contains("SHA-256 mismatch"));
    }

    #[tokio::test]
    async fn test_truncated_body_fails() {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(chunks(&[b"short"]), 100, None, probe.clone());

        let (data, error) = drain(stream).await;
        assert_eq!(data, b"short");
        assert!(error.is_some());
        assert!(probe.failure().unwrap().contains("5 of 100"));
    }

    #[tokio::test]
    async fn test_excess_bytes_are_capped() {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            chunks(&[b"abc", b"defgh"]),
            5,
            Some(sha256_hex(b"abcde")),
            probe.clone(),
        );

        let (data, error) = drain(stream).await;
        assert_eq!(data, b"abcde");
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_hash_comparison_ignores_case() {
        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            chunks(&[b"abc"]),
            3,
            Some(sha256_hex(b"abc").to_uppercase()),
            probe.clone(),
        );
        let (_, error) = drain(stream).await;
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_empty_body_checks_digest() {
        let probe = IntegrityProbe::new();
        let stream =
            VerifyingStream::new(chunks(&[]), 0, Some(sha256_hex(b"")), probe.clone());
        let (data, error) = drain(stream).await;
        assert!(data.is_empty());
        assert!(error.is_none());

        let probe = IntegrityProbe::new();
        let stream =
            VerifyingStream::new(chunks(&[]), 0, Some(sha256_hex(b"x")), probe.clone());
        let (_, error) = drain(stream).await;
        assert!(error.is_some());
        assert!(probe.failure().is_some());
    }

    #[test]
    fn test_waits_for_slow_body() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, io::Error>>();
        let probe = IntegrityProbe::new();
        let mut stream = tokio_test::task::spawn(VerifyingStream::new(
            rx,
            3,
            Some(sha256_hex(b"abc")),
            probe.clone(),
        ));

        tokio_test::assert_pending!(stream.poll_next());
        tx.unbounded_send(Ok(Bytes::from_static(b"ab"))).unwrap();
        assert!(stream.is_woken());
        let chunk = tokio_test::assert_ready!(stream.poll_next());
        assert_eq!(chunk.unwrap().unwrap().as_ref(), b"ab");

        tokio_test::assert_pending!(stream.poll_next());
        tx.unbounded_send(Ok(Bytes::from_static(b"c"))).unwrap();
        let chunk = tokio_test::assert_ready!(stream.poll_next());
        assert_eq!(chunk.unwrap().unwrap().as_ref(), b"c");
        assert!(tokio_test::assert_ready!(stream.poll_next()).is_none());
        assert!(probe.failure().is_none());
    }

    #[tokio::test]
    async fn test_random_chunking_verifies() {
        use rand::Rng;

        let mut rng = rand::rng();
        let mut data = vec![0u8; 4096];
        rng.fill(&mut data[..]);

        let mut parts = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let len = rng.random_range(1..=512).min(data.len() - offset);
            parts.push(Ok(Bytes::copy_from_slice(&data[offset..offset + len])));
            offset += len;
        }

        let probe = IntegrityProbe::new();
        let stream = VerifyingStream::new(
            futures::stream::iter(parts),
            data.len() as u64,
            Some(sha256_hex(&data)),
            probe.clone(),
        );
        let (received, error) = drain(stream).await;
        assert!(error.is_none());
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_inner_error_is_forwarded_without_integrity_failure() {
        let probe = IntegrityProbe::new();
        let inner = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let stream = VerifyingStream::new(inner, 10, None, probe.clone());
        let (_, error) = drain(stream).await;
        assert_eq!(error.unwrap().kind(), io::ErrorKind::ConnectionReset);
        assert!(probe.failure().is_none());
    }
}
