use crate::providers::base::Message;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Keep at most this many messages per session; older turns are dropped
/// (the request processor applies the finer token-based trim per request).
const MAX_SESSION_MESSAGES: usize = 200;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }
}

/// In-memory session store for the REPL and the gateway. The core keeps no
/// state across restarts; durable history belongs to external collaborators.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a session's accumulated messages, creating the session if
    /// needed. A `None` id creates a fresh session.
    pub async fn resume(&self, session_id: Option<&str>) -> (String, Vec<Message>) {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()));
        session.last_active = Utc::now();
        (id, session.messages.clone())
    }

    /// Append a completed exchange to the session.
    pub async fn record(&self, session_id: &str, user: Message, assistant: Message) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()));
        session.messages.push(user);
        session.messages.push(assistant);
        session.last_active = Utc::now();
        if session.messages.len() > MAX_SESSION_MESSAGES {
            let excess = session.messages.len() - MAX_SESSION_MESSAGES;
            session.messages.drain(..excess);
            debug!(session = session_id, dropped = excess, "session trimmed");
        }
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
