//! Outbound frame writer.
//!
//! Frames are enqueued on an unbounded channel whose receiving half is the
//! HTTP response body. The sentinel is sent exactly once, when the writer is
//! closed or dropped, and is always the last item on the channel.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{error, trace};

use chat_relay_core::protocol::{OutboundFrame, encode_sentinel};

pub struct FrameWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl FrameWriter {
    /// Create a connected writer and body stream pair.
    pub fn channel() -> (FrameWriter, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FrameWriter { tx: Some(tx) }, FrameStream { rx })
    }

    /// Enqueue one frame. Returns false if the client is gone and the frame
    /// was dropped.
    pub fn write(&mut self, frame: &OutboundFrame) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode frame");
                return !tx.is_closed();
            }
        };
        trace!(len = bytes.len(), "Writing frame");
        tx.send(bytes).is_ok()
    }

    /// True once the receiving side (the client connection) has been dropped.
    pub fn is_disconnected(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Resolves when the client connection is dropped.
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    /// Send the sentinel and end the stream.
    pub fn close(mut self) {
        self.send_sentinel();
    }

    fn send_sentinel(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Receiver may already be gone; nothing left to deliver then.
            let _ = tx.send(encode_sentinel());
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.send_sentinel();
    }
}

/// Receiving half of a [`FrameWriter`], used as a streaming response body.
pub struct FrameStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Stream for FrameStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|item| item.map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_relay_core::protocol::SENTINEL;
    use tokio_stream::StreamExt;

    async fn collect(stream: FrameStream) -> String {
        let chunks: Vec<Bytes> = stream.map(|b| b.unwrap()).collect().await;
        chunks
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_frames_then_sentinel() {
        let (mut writer, stream) = FrameWriter::channel();
        assert!(writer.write(&OutboundFrame::TextDelta { text: "Hi".into() }));
        assert!(writer.write(&OutboundFrame::Done));
        writer.close();

        let body = collect(stream).await;
        assert_eq!(
            body,
            "data: {\"type\":\"text_delta\",\"text\":\"Hi\"}\n\n\
             data: {\"type\":\"done\"}\n\n\
             data: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_drop_sends_sentinel_once() {
        let (mut writer, stream) = FrameWriter::channel();
        writer.write(&OutboundFrame::error());
        drop(writer);

        let body = collect(stream).await;
        assert_eq!(body.matches(SENTINEL).count(), 1);
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_disconnected_client() {
        let (mut writer, stream) = FrameWriter::channel();
        assert!(!writer.is_disconnected());
        drop(stream);
        assert!(writer.is_disconnected());
        assert!(!writer.write(&OutboundFrame::Done));
        writer.close();
    }
}
