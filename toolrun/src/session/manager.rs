//! Session bookkeeping and turn routing.

use crate::config::EngineConfig;
use crate::engine::{RunEngine, RunOutcome};
use crate::errors::SessionError;
use crate::events::{EventSink, NoOpEventSink};
use crate::service::ReasoningService;
use crate::tools::ToolProvider;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A snapshot of one session for listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: Uuid,
    /// Human-readable label.
    pub label: String,
    /// The engine's thread, once created.
    pub thread_id: Option<String>,
    /// Whether a turn is in flight.
    pub busy: bool,
    /// Whether this session receives interactive input.
    pub active: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

struct Session {
    id: Uuid,
    label: String,
    engine: Arc<RunEngine>,
    task: Option<JoinHandle<RunOutcome>>,
    last_outcome: Option<RunOutcome>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn is_busy(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[derive(Default)]
struct Sessions {
    list: Vec<Session>,
    active: Option<Uuid>,
}

impl Sessions {
    fn find(&self, id: Uuid) -> Result<&Session, SessionError> {
        self.list
            .iter()
            .find(|s| s.id == id)
            .ok_or(SessionError::NotFound(id))
    }

    fn find_mut(&mut self, id: Uuid) -> Result<&mut Session, SessionError> {
        self.list
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(SessionError::NotFound(id))
    }

    fn active_id(&self) -> Result<Uuid, SessionError> {
        self.active.ok_or(SessionError::NoActiveSession)
    }
}

/// Holds many run engines and designates one as active.
///
/// Every session gets its own engine (and so its own thread) built from the
/// shared service, tool provider and engine config.
pub struct SessionManager {
    service: Arc<dyn ReasoningService>,
    tools: Arc<dyn ToolProvider>,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    sessions: Mutex<Sessions>,
}

impl SessionManager {
    /// Creates a manager with no sessions.
    #[must_use]
    pub fn new(
        service: Arc<dyn ReasoningService>,
        tools: Arc<dyn ToolProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            tools,
            config,
            events: Arc::new(NoOpEventSink),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Sets the event sink handed to every new engine.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Creates a session and makes it active.
    pub fn create_session(&self, label: impl Into<String>) -> Uuid {
        let engine = RunEngine::new(self.service.clone(), self.tools.clone(), self.config.clone())
            .with_events(self.events.clone());
        self.insert(label.into(), engine)
    }

    /// Creates a session that continues an existing thread, and makes it
    /// active.
    pub fn resume_session(&self, label: impl Into<String>, thread_id: impl Into<String>) -> Uuid {
        let engine = RunEngine::new(self.service.clone(), self.tools.clone(), self.config.clone())
            .with_events(self.events.clone())
            .with_thread(thread_id);
        self.insert(label.into(), engine)
    }

    fn insert(&self, label: String, engine: RunEngine) -> Uuid {
        let id = Uuid::now_v7();
        let mut sessions = self.sessions.lock();
        sessions.list.push(Session {
            id,
            label: label.clone(),
            engine: Arc::new(engine),
            task: None,
            last_outcome: None,
            created_at: Utc::now(),
        });
        sessions.active = Some(id);
        info!(session_id = %id, label = %label, "Session created");
        id
    }

    /// All sessions in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock();
        sessions
            .list
            .iter()
            .map(|s| SessionInfo {
                id: s.id,
                label: s.label.clone(),
                thread_id: s.engine.thread_id(),
                busy: s.is_busy(),
                active: sessions.active == Some(s.id),
                created_at: s.created_at,
            })
            .collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().list.len()
    }

    /// Returns true if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().list.is_empty()
    }

    /// The active session id.
    #[must_use]
    pub fn active(&self) -> Option<Uuid> {
        self.sessions.lock().active
    }

    /// The engine behind a session.
    pub fn engine(&self, id: Uuid) -> Result<Arc<RunEngine>, SessionError> {
        Ok(self.sessions.lock().find(id)?.engine.clone())
    }

    /// Makes `id` the session that receives interactive input.
    pub fn switch_to(&self, id: Uuid) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        sessions.find(id)?;
        sessions.active = Some(id);
        debug!(session_id = %id, "Switched active session");
        Ok(())
    }

    /// Starts a turn on the active session.
    pub fn submit_active(&self, text: &str) -> Result<Uuid, SessionError> {
        let id = self.sessions.lock().active_id()?;
        self.submit(id, text)?;
        Ok(id)
    }

    /// Starts a turn on `id` in the background.
    ///
    /// A session runs one turn at a time; submitting while a turn is in
    /// flight is rejected.
    pub fn submit(&self, id: Uuid, text: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.find_mut(id)?;
        if session.is_busy() {
            return Err(SessionError::Busy(id));
        }

        let engine = session.engine.clone();
        let text = text.to_string();
        session.task = Some(tokio::spawn(async move { engine.submit(&text).await }));
        debug!(session_id = %id, "Turn spawned");
        Ok(())
    }

    /// Waits for the latest turn on `id` and returns its outcome.
    ///
    /// Returns `None` if the session has never been submitted to.
    pub async fn outcome(&self, id: Uuid) -> Result<Option<RunOutcome>, SessionError> {
        let task = self.sessions.lock().find_mut(id)?.task.take();

        if let Some(task) = task {
            let outcome = task
                .await
                .map_err(|e| SessionError::TaskFailed(e.to_string()))?;
            if let Ok(session) = self.sessions.lock().find_mut(id) {
                session.last_outcome = Some(outcome);
            }
        }

        Ok(self.sessions.lock().find(id)?.last_outcome.clone())
    }

    /// Cancels the active session's current or next turn.
    pub async fn cancel_active(&self) -> Result<Uuid, SessionError> {
        let (id, engine) = {
            let sessions = self.sessions.lock();
            let id = sessions.active_id()?;
            (id, sessions.find(id)?.engine.clone())
        };
        engine.cancel().await;
        info!(session_id = %id, "Cancelled active session");
        Ok(id)
    }

    /// Cancels every busy session. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let engines: Vec<Arc<RunEngine>> = self
            .sessions
            .lock()
            .list
            .iter()
            .filter(|s| s.is_busy())
            .map(|s| s.engine.clone())
            .collect();

        for engine in &engines {
            engine.cancel().await;
        }
        engines.len()
    }

    /// Removes a session, cancelling and aborting any turn in flight.
    ///
    /// If it was active, the most recently created remaining session becomes
    /// active.
    pub async fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.sessions.lock();
            let index = sessions
                .list
                .iter()
                .position(|s| s.id == id)
                .ok_or(SessionError::NotFound(id))?;
            let session = sessions.list.remove(index);
            if sessions.active == Some(id) {
                sessions.active = sessions.list.last().map(|s| s.id);
            }
            session
        };

        if let Some(task) = session.task {
            if !task.is_finished() {
                warn!(session_id = %id, "Removing session with a turn in flight");
                session.engine.cancel().await;
                task.abort();
            }
        }
        info!(session_id = %id, "Session removed");
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.lock();
        f.debug_struct("SessionManager")
            .field("sessions", &sessions.list.len())
            .field("active", &sessions.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EnginePhase;
    use crate::service::RunStatus;
    use crate::testing::ScriptedService;
    use crate::tools::AvailabilityMap;
    use std::time::Duration;

    fn manager(service: &Arc<ScriptedService>) -> SessionManager {
        SessionManager::new(
            service.clone(),
            Arc::new(AvailabilityMap::new()),
            EngineConfig::new("asst_1").with_poll_interval(Duration::from_secs(1)),
        )
    }

    #[test]
    fn test_create_and_switch() {
        let service = Arc::new(ScriptedService::new());
        let manager = manager(&service);
        assert!(manager.active().is_none());

        let first = manager.create_session("one");
        let second = manager.create_session("two");
        assert_eq!(manager.active(), Some(second));

        manager.switch_to(first).unwrap();
        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].active);
        assert!(!listed[1].active);
        assert_eq!(listed[1].label, "two");
    }

    #[test]
    fn test_switch_to_unknown_session() {
        let service = Arc::new(ScriptedService::new());
        let manager = manager(&service);
        let id = Uuid::new_v4();

        assert_eq!(manager.switch_to(id), Err(SessionError::NotFound(id)));
        assert_eq!(
            manager.submit_active("hi"),
            Err(SessionError::NoActiveSession)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_active_runs_in_background() {
        let service = Arc::new(
            ScriptedService::new()
                .then(RunStatus::InProgress)
                .then(RunStatus::Completed)
                .with_reply("hello back"),
        );
        let manager = manager(&service);
        let id = manager.create_session("main");

        assert_eq!(manager.submit_active("hello"), Ok(id));
        assert_eq!(manager.submit(id, "again"), Err(SessionError::Busy(id)));

        let outcome = manager.outcome(id).await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message(), "hello back");
        assert!(manager.list()[0].thread_id.is_some());

        // The stored outcome is returned again without a new turn.
        let again = manager.outcome(id).await.unwrap().unwrap();
        assert_eq!(again.run_id, outcome.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sessions_keep_running() {
        let service = Arc::new(ScriptedService::new().then(RunStatus::InProgress));
        let manager = manager(&service);
        let background = manager.create_session("background");
        manager.submit_active("long job").unwrap();

        let foreground = manager.create_session("foreground");
        assert_eq!(manager.active(), Some(foreground));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(manager.list()[0].busy);
        assert!(service.status_polls() >= 3);

        assert_eq!(manager.cancel_all().await, 1);
        let outcome = manager.outcome(background).await.unwrap().unwrap();
        assert_eq!(outcome.status, EnginePhase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_active_before_submit() {
        let service = Arc::new(ScriptedService::new().then(RunStatus::Completed));
        let manager = manager(&service);
        let id = manager.create_session("main");

        assert_eq!(manager.cancel_active().await, Ok(id));
        manager.submit_active("hello").unwrap();

        let outcome = manager.outcome(id).await.unwrap().unwrap();
        assert_eq!(outcome.status, EnginePhase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_active_session_promotes_latest() {
        let service = Arc::new(ScriptedService::new().then(RunStatus::InProgress));
        let manager = manager(&service);
        let first = manager.create_session("one");
        let second = manager.create_session("two");
        manager.submit(second, "busy").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        manager.remove(second).await.unwrap();

        assert_eq!(manager.active(), Some(first));
        assert_eq!(manager.len(), 1);
        assert_eq!(service.cancel_calls(), 1);
        assert_eq!(
            manager.remove(second).await,
            Err(SessionError::NotFound(second))
        );
    }

    #[tokio::test]
    async fn test_outcome_without_turn_is_none() {
        let service = Arc::new(ScriptedService::new());
        let manager = manager(&service);
        let id = manager.create_session("idle");

        assert_eq!(manager.outcome(id).await, Ok(None));
    }
}
