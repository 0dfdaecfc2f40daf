//! sentryd - intrusion watch daemon
//!
//! This daemon:
//! 1. Accepts raw frame uploads from camera clients over HTTP
//! 2. Runs person detection on every frame
//! 3. Tracks continuous presence and fires debounced intrusion alerts
//! 4. Serves the annotated latest frame as a live MJPEG stream
//! 5. Appends detections to a SQLite history log with stored frames

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sentry_node::{
    AlarmDispatcher, Annotator, BackendRegistry, FrameBroadcaster, FrameStore, HttpAlertSink,
    IngestRuntime, NullAlertSink, PresenceTracker, SentrydConfig, Server, ServerConfig,
    SqliteDetectionLog, StubBackend,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SentrydConfig::load()?;

    let log = SqliteDetectionLog::open(&cfg.db_path)?;
    let frames = FrameStore::new(&cfg.frames_dir)?;

    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new(cfg.detector.stub_luma_threshold));
    registry.set_default(&cfg.detector.backend)?;

    let annotator = match &cfg.detector.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => {
            log::info!("no label font configured; drawing boxes only");
            Annotator::new()
        }
    };

    let sink: Box<dyn sentry_node::AlertSink> = match &cfg.alert_url {
        Some(url) => {
            log::info!("alerting to {}", url);
            Box::new(HttpAlertSink::new(url.clone()))
        }
        None => {
            log::warn!("SENTRY_ALERT_URL not set; alerts will only be logged");
            Box::new(NullAlertSink)
        }
    };

    let runtime = Arc::new(IngestRuntime::new(
        registry,
        annotator,
        PresenceTracker::new(cfg.presence_threshold),
        AlarmDispatcher::new(cfg.alarm_cooldown),
        sink,
        FrameBroadcaster::new(),
        Box::new(log),
        frames,
    ));

    let server = Server::new(
        ServerConfig {
            addr: cfg.listen_addr.clone(),
        },
        runtime,
    );
    let handle = server.spawn()?;
    log::info!("sentryd listening on {}", handle.addr);
    log::info!(
        "presence threshold {:.1}s, alarm cooldown {:.1}s, log {}",
        cfg.presence_threshold.as_secs_f64(),
        cfg.alarm_cooldown.as_secs_f64(),
        cfg.db_path
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("install signal handler: {}", e))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    handle.stop()?;
    Ok(())
}
