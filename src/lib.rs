//! sentry-node - frame-upload intrusion watch.
//!
//! A camera client POSTs single JPEG frames to `sentryd`. Each frame
//! runs through person detection, a presence timeline decides when a
//! debounced intrusion alert fires toward the notifier, the annotated
//! frame feeds a live MJPEG stream, and detections with at least one
//! person are appended to a SQLite history log.
//!
//! Module map:
//! - [`detect`]: detector backend trait, registry, stub backend.
//! - [`annotate`]: bounding-box/label overlays, pure per frame.
//! - [`presence`]: presence tracker and alarm dispatcher (the core
//!   state machines).
//! - [`alert`]: outbound fire-and-forget alert sinks.
//! - [`broadcast`]: latest-frame broadcast for stream viewers.
//! - [`storage`]: detection log (SQLite / in-memory) and frame blobs.
//! - [`ingest`]: per-upload orchestration and error taxonomy.
//! - [`server`]: the HTTP boundary.
//! - [`config`]: process-start configuration.

pub mod alert;
pub mod annotate;
pub mod broadcast;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod presence;
pub mod server;
pub mod storage;

pub use alert::{AlertMessage, AlertSink, HttpAlertSink, NullAlertSink};
pub use annotate::Annotator;
pub use broadcast::{FrameBroadcaster, FrameSubscriber};
pub use config::SentrydConfig;
pub use detect::{BackendRegistry, BoundingBox, DetectedObject, DetectorBackend, StubBackend};
pub use ingest::{IngestError, IngestResult, IngestRuntime};
pub use presence::{AlarmDispatcher, PresenceObservation, PresenceState, PresenceTracker};
pub use server::{Server, ServerConfig, ServerHandle};
pub use storage::{
    DetectionEvent, DetectionLog, FrameStore, InMemoryDetectionLog, NewDetectionEvent,
    SqliteDetectionLog,
};
