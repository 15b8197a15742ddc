//! Event-stream reader — the long-lived server→client connection.
//!
//! One connection exists per job run.  The reader task decodes
//! `text/event-stream` frames into [`StreamEvent`]s and forwards them, plus a
//! single close notification, into the controller loop.  Each connection
//! carries an id so events from a superseded connection can be told apart
//! from the live one.

use anyhow::Context;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use tunedl_proto::protocol::StreamEvent;

/// Messages delivered from the reader task into the controller loop.
#[derive(Debug)]
pub enum StreamMessage {
    Event { conn_id: u64, event: StreamEvent },
    /// The transport ended, cleanly or not.  Sent once per connection unless
    /// the reader was aborted first.
    Closed { conn_id: u64 },
}

/// Handle to a live stream connection.  Closing aborts the reader task.
#[derive(Debug)]
pub struct StreamHandle {
    conn_id: u64,
    abort: AbortHandle,
}

impl StreamHandle {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn close(self) {
        self.abort.abort();
    }

    #[cfg(test)]
    pub(crate) fn for_tests(conn_id: u64, abort: AbortHandle) -> Self {
        Self { conn_id, abort }
    }
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Frames are separated by a blank line; `data:` lines carry one JSON event
/// each.  Comment keep-alives and unparseable frames are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        // CR is never significant in this protocol; dropping it up front
        // makes CRLF and LF framing look the same.
        self.buf
            .push_str(&String::from_utf8_lossy(chunk).replace('\r', ""));

        let mut events = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            if let Some(event) = Self::decode_frame(&frame) {
                events.push(event);
            }
        }
        events
    }

    fn decode_frame(frame: &str) -> Option<StreamEvent> {
        let mut data = String::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
            // Comment lines (": keep-alive") and unknown fields are ignored.
        }
        if data.is_empty() {
            return None;
        }
        match serde_json::from_str(&data) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("ignoring malformed stream frame: {}", e);
                None
            }
        }
    }
}

/// Open the stream and spawn its reader task.
pub fn connect(
    client: reqwest::Client,
    url: String,
    conn_id: u64,
    tx: mpsc::Sender<StreamMessage>,
) -> StreamHandle {
    let task = tokio::spawn(async move {
        if let Err(e) = read_stream(client, &url, conn_id, &tx).await {
            warn!(conn_id, "stream reader ended: {:#}", e);
        }
        let _ = tx.send(StreamMessage::Closed { conn_id }).await;
    });
    StreamHandle {
        conn_id,
        abort: task.abort_handle(),
    }
}

async fn read_stream(
    client: reqwest::Client,
    url: &str,
    conn_id: u64,
    tx: &mpsc::Sender<StreamMessage>,
) -> anyhow::Result<()> {
    let response = client
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .context("failed to open event stream")?;

    if !response.status().is_success() {
        anyhow::bail!("event stream returned status: {}", response.status());
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("event stream read failed")?;
        for event in decoder.feed(&chunk) {
            debug!(conn_id, ?event, "stream event");
            if tx
                .send(StreamMessage::Event { conn_id, event })
                .await
                .is_err()
            {
                // Controller gone; nothing left to deliver to.
                return Ok(());
            }
        }
    }
    Ok(())
}
