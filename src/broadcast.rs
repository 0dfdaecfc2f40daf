//! Latest-frame broadcast.
//!
//! A publish/subscribe cell where only the most recent annotated JPEG
//! matters: `publish` overwrites the shared frame in O(1) and wakes
//! waiters, subscribers block on a condvar until a frame newer than the
//! one they last saw exists. Slow subscribers silently skip intermediate
//! frames; there is no backlog and no backpressure on the publisher.

use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};

/// Multipart boundary used by the live stream.
pub const STREAM_BOUNDARY: &str = "frame";

#[derive(Default)]
struct LatestFrame {
    /// Monotonic publish counter. 0 means nothing published yet.
    seq: u64,
    jpeg: Option<Arc<Vec<u8>>>,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<LatestFrame>,
    frame_ready: Condvar,
}

/// Holds the single most recently annotated frame.
#[derive(Clone, Default)]
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the latest frame and wake all waiting subscribers.
    /// Never blocks on readers beyond the brief swap.
    pub fn publish(&self, jpeg: Vec<u8>) {
        let mut latest = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        latest.seq += 1;
        latest.jpeg = Some(Arc::new(jpeg));
        drop(latest);
        self.shared.frame_ready.notify_all();
    }

    /// True once at least one frame has been published.
    pub fn has_frame(&self) -> bool {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .seq
            > 0
    }

    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            shared: self.shared.clone(),
            last_seq: 0,
        }
    }
}

/// Independent cursor over published frames. Each `next` call waits for
/// a frame newer than the last one this subscriber returned.
pub struct FrameSubscriber {
    shared: Arc<Shared>,
    last_seq: u64,
}

impl FrameSubscriber {
    /// Block until a newer frame exists and return it. Before the first
    /// publish this waits rather than erroring.
    pub fn next(&mut self) -> Arc<Vec<u8>> {
        let mut latest = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if latest.seq > self.last_seq {
                if let Some(jpeg) = latest.jpeg.as_ref() {
                    self.last_seq = latest.seq;
                    return jpeg.clone();
                }
            }
            latest = self
                .shared
                .frame_ready
                .wait(latest)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Write one frame as a self-delimited multipart chunk:
/// boundary marker, content headers, JPEG bytes, trailing CRLF.
pub fn write_multipart_frame<W: Write>(out: &mut W, jpeg: &[u8]) -> std::io::Result<()> {
    write!(
        out,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        STREAM_BOUNDARY,
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}
