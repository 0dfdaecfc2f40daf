//! Upload orchestration: one inbound frame in, one structured result out.
//!
//! Per frame: decode, detect persons, annotate, fold into the presence
//! timeline, decide on an alarm, publish to the live stream, persist the
//! event when people were seen. Presence and alarm state mutate only
//! after detection has succeeded; later persistence failures are logged
//! and demoted to a null image reference rather than failing the call.

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

use crate::alert::AlertSink;
use crate::annotate::Annotator;
use crate::broadcast::FrameBroadcaster;
use crate::detect::{BackendRegistry, DetectedObject};
use crate::presence::{AlarmDispatcher, PresenceTracker};
use crate::storage::{DetectionLog, FrameStore, NewDetectionEvent};

/// Failures surfaced to the upload caller.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Client sent an empty body.
    #[error("no data")]
    EmptyBody,
    /// Client bytes are not a decodable image.
    #[error("decode fail")]
    Decode(#[source] image::ImageError),
    /// Detector backend failed; presence/alarm state untouched.
    #[error("detection failed")]
    Detection(#[source] anyhow::Error),
}

/// Flat record returned for each accepted upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestResult {
    pub timestamp: String,
    pub persons: u32,
    pub image_url: Option<String>,
    pub objects: Vec<DetectedObject>,
    pub presence_active: bool,
    pub presence_duration_sec: f64,
    pub alarm_triggered: bool,
}

/// Owns every piece of shared mutable state in the pipeline.
///
/// Presence, alarm and the detection log each sit behind their own
/// mutex; the locks are held only for their read-decide-write section,
/// never nested, and never across network or disk I/O.
pub struct IngestRuntime {
    registry: BackendRegistry,
    annotator: Annotator,
    presence: Mutex<PresenceTracker>,
    alarm: Mutex<AlarmDispatcher>,
    sink: Box<dyn AlertSink>,
    broadcaster: FrameBroadcaster,
    log: Mutex<Box<dyn DetectionLog>>,
    frames: FrameStore,
}

impl IngestRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: BackendRegistry,
        annotator: Annotator,
        presence: PresenceTracker,
        alarm: AlarmDispatcher,
        sink: Box<dyn AlertSink>,
        broadcaster: FrameBroadcaster,
        log: Box<dyn DetectionLog>,
        frames: FrameStore,
    ) -> Self {
        Self {
            registry,
            annotator,
            presence: Mutex::new(presence),
            alarm: Mutex::new(alarm),
            sink,
            broadcaster,
            log: Mutex::new(log),
            frames,
        }
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        &self.broadcaster
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<crate::storage::DetectionEvent>> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| anyhow::anyhow!("detection log lock poisoned"))?;
        log.recent(limit)
    }

    /// Process one uploaded frame. See module docs for the step order.
    pub fn ingest(&self, raw: &[u8], now: DateTime<Utc>) -> Result<IngestResult, IngestError> {
        if raw.is_empty() {
            return Err(IngestError::EmptyBody);
        }
        let image = image::load_from_memory(raw)
            .map_err(IngestError::Decode)?
            .into_rgb8();

        let (width, height) = image.dimensions();
        let objects = self
            .registry
            .detect_persons(image.as_raw(), width, height)
            .map_err(IngestError::Detection)?;
        let person_count = objects.len() as u32;

        let annotated = self.annotator.annotate(&image, &objects);

        // Presence lock: the entire read-decide-write transition.
        let observation = {
            let mut presence = self
                .presence
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            presence.observe(now, person_count)
        };

        // Alarm lock: cooldown check-and-set only. The send runs after
        // release, from the captured payload.
        let alert = {
            let mut alarm = self
                .alarm
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            alarm.decide(
                now,
                person_count,
                observation.duration,
                observation.alert_eligible,
            )
        };
        let alarm_triggered = alert.is_some();
        if let Some(msg) = alert {
            log::warn!(
                "intrusion alarm: persons={} duration={:.1}s",
                msg.persons,
                msg.duration_sec
            );
            if let Err(err) = self.sink.send(&msg) {
                // Best-effort delivery; the cooldown already started.
                log::warn!("alert delivery failed: {:#}", err);
            }
        }

        let ts = FrameStore::timestamp_stem(now);
        let jpeg = encode_jpeg(&annotated);

        let mut image_url = None;
        match jpeg {
            Ok(jpeg) => {
                self.broadcaster.publish(jpeg.clone());
                if person_count > 0 {
                    image_url = self.persist(&ts, person_count, &objects, &jpeg);
                }
            }
            Err(err) => {
                // Treated like a persistence gap: the frame is lost to
                // stream and history, presence/alarm results stand.
                log::warn!("annotated frame encode failed: {:#}", err);
            }
        }

        Ok(IngestResult {
            timestamp: ts,
            persons: person_count,
            image_url,
            objects,
            presence_active: observation.is_active,
            presence_duration_sec: observation.duration.as_secs_f64(),
            alarm_triggered,
        })
    }

    /// Blob write + log append. Any failure is logged and reported as a
    /// missing image reference; losing one history row is less harmful
    /// than failing live alerting.
    fn persist(
        &self,
        ts: &str,
        person_count: u32,
        objects: &[DetectedObject],
        jpeg: &[u8],
    ) -> Option<String> {
        let image_path = match self.frames.store(ts, person_count, jpeg) {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("frame blob write failed: {:#}", err);
                None
            }
        };

        let event = NewDetectionEvent {
            ts: ts.to_string(),
            person_count,
            image_path: image_path.clone(),
            objects: objects.to_vec(),
        };
        let mut log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match log.append(event) {
            Ok(_) => image_path,
            Err(err) => {
                log::warn!("detection log append failed: {:#}", err);
                None
            }
        }
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image.write_to(
        &mut std::io::Cursor::new(&mut out),
        image::ImageFormat::Jpeg,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertMessage;
    use crate::detect::{DetectorBackend, StubBackend};
    use crate::presence::{AlarmDispatcher, PresenceTracker};
    use crate::storage::InMemoryDetectionLog;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct RecordingSink {
        sent: Arc<Mutex<Vec<AlertMessage>>>,
    }

    impl AlertSink for RecordingSink {
        fn send(&self, msg: &AlertMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<DetectedObject>> {
            anyhow::bail!("model unavailable")
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn jpeg_frame(luma: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([luma, luma, luma]));
        let mut out = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    fn runtime_with(
        backend: impl DetectorBackend + 'static,
        sent: Arc<Mutex<Vec<AlertMessage>>>,
        dir: &std::path::Path,
    ) -> IngestRuntime {
        let mut registry = BackendRegistry::new();
        registry.register(backend);
        IngestRuntime::new(
            registry,
            Annotator::new(),
            PresenceTracker::new(Duration::from_secs(5)),
            AlarmDispatcher::new(Duration::from_secs(10)),
            Box::new(RecordingSink { sent }),
            FrameBroadcaster::new(),
            Box::new(InMemoryDetectionLog::new()),
            FrameStore::new(dir.join("frames")).unwrap(),
        )
    }

    #[test]
    fn empty_body_is_a_distinct_client_error() {
        let dir = tempdir().unwrap();
        let runtime = runtime_with(StubBackend::new(128), Arc::default(), dir.path());
        assert!(matches!(
            runtime.ingest(&[], t(0)),
            Err(IngestError::EmptyBody)
        ));
    }

    #[test]
    fn malformed_bytes_leave_state_untouched() {
        let dir = tempdir().unwrap();
        let sent: Arc<Mutex<Vec<AlertMessage>>> = Arc::default();
        let runtime = runtime_with(StubBackend::new(128), sent.clone(), dir.path());

        assert!(matches!(
            runtime.ingest(b"not an image", t(0)),
            Err(IngestError::Decode(_))
        ));

        assert!(!runtime.broadcaster().has_frame());
        assert!(runtime.recent_events(50).unwrap().is_empty());
        assert!(sent.lock().unwrap().is_empty());
        // A later valid occupied frame starts a fresh presence run.
        let result = runtime.ingest(&jpeg_frame(220), t(1)).unwrap();
        assert!(result.presence_active);
        assert_eq!(result.presence_duration_sec, 0.0);
    }

    #[test]
    fn detector_failure_is_a_server_error_without_state_change() {
        let dir = tempdir().unwrap();
        let runtime = runtime_with(FailingBackend, Arc::default(), dir.path());
        assert!(matches!(
            runtime.ingest(&jpeg_frame(220), t(0)),
            Err(IngestError::Detection(_))
        ));
        assert!(!runtime.broadcaster().has_frame());
    }

    #[test]
    fn empty_frames_publish_but_never_persist() {
        let dir = tempdir().unwrap();
        let runtime = runtime_with(StubBackend::new(128), Arc::default(), dir.path());

        let result = runtime.ingest(&jpeg_frame(10), t(0)).unwrap();
        assert_eq!(result.persons, 0);
        assert!(result.image_url.is_none());
        assert!(!result.presence_active);
        // Stream gets every frame regardless of detections.
        assert!(runtime.broadcaster().has_frame());
        assert!(runtime.recent_events(50).unwrap().is_empty());
    }

    #[test]
    fn occupied_frames_persist_event_and_blob() {
        let dir = tempdir().unwrap();
        let runtime = runtime_with(StubBackend::new(128), Arc::default(), dir.path());

        let result = runtime.ingest(&jpeg_frame(220), t(0)).unwrap();
        assert_eq!(result.persons, 1);
        let url = result.image_url.expect("stored image url");
        assert!(url.starts_with("/frames/"));
        assert!(url.ends_with("_p1.jpg"));

        let events = runtime.recent_events(50).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].person_count, 1);
        assert_eq!(events[0].image_path.as_deref(), Some(url.as_str()));

        let filename = url.trim_start_matches("/frames/");
        assert!(!runtime.frames().read(filename).unwrap().is_empty());
    }

    #[test]
    fn alarm_fires_once_per_cooldown_across_uploads() {
        let dir = tempdir().unwrap();
        let sent: Arc<Mutex<Vec<AlertMessage>>> = Arc::default();
        let runtime = runtime_with(StubBackend::new(128), sent.clone(), dir.path());

        let mut fired = Vec::new();
        for i in 0..=15 {
            let result = runtime.ingest(&jpeg_frame(220), t(i)).unwrap();
            if result.alarm_triggered {
                fired.push(i);
            }
        }
        // threshold 5s, cooldown 10s: fires at t=5 and t=15.
        assert_eq!(fired, vec![5, 15]);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, "intrusion");
        assert_eq!(sent[0].persons, 1);
        assert!((sent[0].duration_sec - 5.0).abs() < 1e-9);
    }
}
