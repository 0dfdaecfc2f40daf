//! Durable detection history and annotated-frame blobs.
//!
//! The log is append-only: rows are written once per upload that saw at
//! least one person, never updated or deleted, and queried newest-first
//! with a bounded limit. Single-row appends rely on SQLite's own
//! atomicity; no cross-row transactions are needed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detect::DetectedObject;

/// URL prefix under which stored frames are served back.
pub const FRAMES_URL_PREFIX: &str = "/frames/";

/// A detection event as persisted and as returned by the history query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: i64,
    /// Capture timestamp in `%Y%m%d_%H%M%S_%f` form (also the frame
    /// file name stem).
    pub ts: String,
    pub person_count: u32,
    /// URL path of the stored annotated frame, when one was written.
    pub image_path: Option<String>,
    pub objects: Vec<DetectedObject>,
}

/// Event data before an identifier has been assigned.
#[derive(Clone, Debug)]
pub struct NewDetectionEvent {
    pub ts: String,
    pub person_count: u32,
    pub image_path: Option<String>,
    pub objects: Vec<DetectedObject>,
}

pub trait DetectionLog: Send {
    /// Durable append. Returns the auto-assigned, monotonically
    /// increasing identifier.
    fn append(&mut self, event: NewDetectionEvent) -> Result<i64>;

    /// Most recent events, ordered by identifier descending, at most
    /// `limit` rows.
    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>>;
}

pub struct SqliteDetectionLog {
    conn: Connection,
}

impl SqliteDetectionLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open detection log {}", db_path))?;
        let mut log = Self { conn };
        log.ensure_schema()?;
        Ok(log)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              ts TEXT NOT NULL,
              person_count INTEGER NOT NULL,
              image_path TEXT,
              objects_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_ts ON detections(ts);
            "#,
        )?;
        Ok(())
    }
}

impl DetectionLog for SqliteDetectionLog {
    fn append(&mut self, event: NewDetectionEvent) -> Result<i64> {
        let objects_json = serde_json::to_string(&event.objects)?;
        self.conn.execute(
            r#"
            INSERT INTO detections(ts, person_count, image_path, objects_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                event.ts,
                event.person_count,
                event.image_path,
                objects_json
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, ts, person_count, image_path, objects_json
            FROM detections
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let objects_json: String = row.get(4)?;
            out.push(DetectionEvent {
                id: row.get(0)?,
                ts: row.get(1)?,
                person_count: row.get::<_, i64>(2)? as u32,
                image_path: row.get(3)?,
                objects: serde_json::from_str(&objects_json)?,
            });
        }
        Ok(out)
    }
}

/// Vec-backed log for tests.
#[derive(Default)]
pub struct InMemoryDetectionLog {
    events: Vec<DetectionEvent>,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl DetectionLog for InMemoryDetectionLog {
    fn append(&mut self, event: NewDetectionEvent) -> Result<i64> {
        let id = self.events.len() as i64 + 1;
        self.events.push(DetectionEvent {
            id,
            ts: event.ts,
            person_count: event.person_count,
            image_path: event.image_path,
            objects: event.objects,
        });
        Ok(id)
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>> {
        Ok(self.events.iter().rev().take(limit).cloned().collect())
    }
}

/// Blob store for annotated frames, one JPEG per detection event.
#[derive(Clone, Debug)]
pub struct FrameStore {
    dir: PathBuf,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create frames dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Timestamp stem shared by the event row and the frame file name.
    /// `%6f` keeps microsecond precision so bursts of uploads get
    /// distinct file names.
    pub fn timestamp_stem(now: DateTime<Utc>) -> String {
        now.format("%Y%m%d_%H%M%S_%6f").to_string()
    }

    /// Write an annotated JPEG, named by timestamp and person count.
    /// Returns the URL path stored in the event row.
    pub fn store(&self, ts: &str, person_count: u32, jpeg: &[u8]) -> Result<String> {
        let filename = format!("{}_p{}.jpg", ts, person_count);
        let path = self.dir.join(&filename);
        std::fs::write(&path, jpeg)
            .with_context(|| format!("write annotated frame {}", path.display()))?;
        Ok(format!("{}{}", FRAMES_URL_PREFIX, filename))
    }

    /// Resolve a stored frame by bare file name. Rejects anything that
    /// could escape the frames directory.
    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            anyhow::bail!("invalid frame name");
        }
        let path = self.dir.join(filename);
        std::fs::read(&path).with_context(|| format!("read frame {}", path.display()))
    }
}
