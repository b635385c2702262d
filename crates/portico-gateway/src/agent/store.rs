//! The seam to the session store.
//!
//! Sessions are externally owned; the gateway only upserts metadata (last
//! message preview, message count, workdir) keyed by session key. An
//! in-memory implementation ships for the dev binary and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use portico_core::error::Result;

/// Persisted previews are capped at this many chars (on a char boundary).
const PREVIEW_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub session_key: String,
    pub last_message_preview: Option<String>,
    pub message_count: u64,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub last_message_preview: Option<String>,
    pub bump_message_count: bool,
    pub workdir: Option<String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_key: &str) -> Option<SessionRecord>;
    async fn get_or_create(&self, session_key: &str) -> SessionRecord;
    async fn update(&self, session_key: &str, patch: SessionPatch) -> Result<()>;
}

pub fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_key: &str) -> Option<SessionRecord> {
        self.sessions.get(session_key).map(|r| r.value().clone())
    }

    async fn get_or_create(&self, session_key: &str) -> SessionRecord {
        self.sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionRecord {
                session_key: session_key.to_string(),
                ..SessionRecord::default()
            })
            .clone()
    }

    async fn update(&self, session_key: &str, patch: SessionPatch) -> Result<()> {
        let mut record = self
            .sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionRecord {
                session_key: session_key.to_string(),
                ..SessionRecord::default()
            });
        if let Some(preview) = patch.last_message_preview {
            record.last_message_preview = Some(preview);
        }
        if patch.bump_message_count {
            record.message_count += 1;
        }
        if let Some(workdir) = patch.workdir {
            record.workdir = Some(workdir);
        }
        Ok(())
    }
}
