//! Outbound frame queue with in-order delivery
//!
//! Frames produced while the socket is unavailable wait here and are sent in
//! enqueue order once it opens. A failing head entry is retried rather than
//! skipped, because audio chunks must reconstruct a contiguous stream; after
//! `MAX_FRAME_RETRIES` failed retries it is dropped so the stream can move on.

use std::collections::VecDeque;
use std::time::Instant;

use super::protocol::ClientMessage;
use super::transport::FrameSink;

/// Failed retries tolerated per entry (on top of the first attempt)
pub const MAX_FRAME_RETRIES: u32 = 3;

/// A frame waiting to be sent
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub message: ClientMessage,
    pub enqueued_at: Instant,
    /// Failed send attempts so far
    pub retries: u32,
}

/// FIFO of outbound frames
///
/// Not internally synchronized: the session task is its only owner.
#[derive(Debug)]
pub struct FrameQueue {
    entries: VecDeque<QueuedFrame>,
    max_retries: u32,
    sent: u64,
    dropped: u64,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(MAX_FRAME_RETRIES)
    }
}

impl FrameQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            max_retries,
            sent: 0,
            dropped: 0,
        }
    }

    /// Append a message to the tail
    pub fn push(&mut self, message: ClientMessage) {
        self.entries.push_back(QueuedFrame {
            message,
            enqueued_at: Instant::now(),
            retries: 0,
        });
    }

    /// Send queued frames in order until the queue is empty or the head fails.
    ///
    /// Returns `true` when everything was delivered (or dropped after
    /// exhausting retries) and the queue is empty. Returns `false` if there is
    /// no open sink or the head entry failed and still has retries left.
    pub async fn drain(&mut self, sink: Option<&mut (dyn FrameSink + '_)>) -> bool {
        let sink = match sink {
            Some(sink) if sink.is_open() => sink,
            _ => return self.entries.is_empty(),
        };

        while let Some(head) = self.entries.front_mut() {
            let outcome = match head.message.to_json() {
                Ok(json) => sink.send_text(json).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.entries.pop_front();
                    self.sent += 1;
                    if self.sent % 50 == 0 {
                        log::debug!("FrameQueue: sent {} frames", self.sent);
                    }
                }
                Err(e) => {
                    head.retries += 1;
                    if head.retries > self.max_retries {
                        let kind = head.message.kind();
                        let age = head.enqueued_at.elapsed();
                        self.entries.pop_front();
                        self.dropped += 1;
                        log::warn!(
                            "FrameQueue: dropped {} after {} failed sends (queued {:?}): {}",
                            kind,
                            self.max_retries + 1,
                            age,
                            e
                        );
                    } else {
                        log::debug!(
                            "FrameQueue: send failed (retry {}/{}): {}",
                            head.retries,
                            self.max_retries,
                            e
                        );
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Discard all pending entries, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frames delivered since creation
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    /// Frames abandoned after exhausting their retries
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn peek_all(&self) -> impl Iterator<Item = &QueuedFrame> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::StreamingError;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Sink that records texts and fails according to a script
    struct ScriptedSink {
        open: bool,
        failures: Vec<bool>,
        sent: Vec<String>,
    }

    impl ScriptedSink {
        fn new(failures: Vec<bool>) -> Self {
            Self {
                open: true,
                failures,
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl FrameSink for ScriptedSink {
        async fn send_text(&mut self, text: String) -> Result<(), StreamingError> {
            let fail = if self.failures.is_empty() {
                false
            } else {
                self.failures.remove(0)
            };
            if fail {
                return Err(StreamingError::SendFailed("scripted".to_string()));
            }
            self.sent.push(text);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StreamingError> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn frame(label: &str) -> ClientMessage {
        ClientMessage::VideoFrame {
            timestamp: Utc::now(),
            data: label.to_string(),
            format: None,
        }
    }

    fn labels(sink: &ScriptedSink) -> Vec<String> {
        sink.sent
            .iter()
            .map(|json| {
                let value: serde_json::Value = serde_json::from_str(json).unwrap();
                value["data"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_drain_without_sink_keeps_frames() {
        let mut queue = FrameQueue::default();
        queue.push(frame("A"));

        assert!(!queue.drain(None).await);
        assert_eq!(queue.len(), 1);

        let mut closed = ScriptedSink::new(vec![]);
        closed.open = false;
        assert!(!queue.drain(Some(&mut closed)).await);
        assert_eq!(queue.len(), 1);
        assert!(closed.sent.is_empty());
    }

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let mut queue = FrameQueue::default();
        for label in ["A", "B", "C"] {
            queue.push(frame(label));
        }

        let mut sink = ScriptedSink::new(vec![]);
        assert!(queue.drain(Some(&mut sink)).await);

        assert_eq!(labels(&sink), vec!["A", "B", "C"]);
        assert!(queue.is_empty());
        assert_eq!(queue.sent_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_head_stalls_without_skipping() {
        let mut queue = FrameQueue::default();
        queue.push(frame("A"));
        queue.push(frame("B"));

        let mut sink = ScriptedSink::new(vec![true]);
        assert!(!queue.drain(Some(&mut sink)).await);
        assert!(sink.sent.is_empty());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_all().next().unwrap().retries, 1);

        // Next trigger succeeds and keeps the original order
        assert!(queue.drain(Some(&mut sink)).await);
        assert_eq!(labels(&sink), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_frame_dropped_after_fourth_failure() {
        let mut queue = FrameQueue::default();
        queue.push(frame("A"));
        queue.push(frame("B"));

        let mut sink = ScriptedSink::new(vec![true, true, true, true]);

        // Failures 1..3 leave A at the head
        for expected_retries in 1..=3 {
            assert!(!queue.drain(Some(&mut sink)).await);
            assert_eq!(queue.len(), 2);
            assert_eq!(queue.peek_all().next().unwrap().retries, expected_retries);
        }

        // 4th failure drops A and B goes through in the same drain
        assert!(queue.drain(Some(&mut sink)).await);
        assert_eq!(labels(&sink), vec!["B"]);
        assert_eq!(queue.dropped_count(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_clear_reports_removed() {
        let mut queue = FrameQueue::default();
        for label in ["A", "B", "C"] {
            queue.push(frame(label));
        }
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }
}
