//! Client-side synchronization session.
//!
//! A [`Session`] keeps one clipboard buffer in step with the server. Local
//! edits are pushed after a quiet period; a fixed-period poll pulls writes
//! made by other devices, but only while the consumer does not hold input
//! focus, so active typing is never overwritten.
//!
//! All state lives in a single task. The debounce deadline and the poll
//! interval are both owned by that task and go away with it.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::client::Remote;
use crate::model::{ClipboardId, ClipboardRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Server,
    UserInput,
}

/// What the local buffer holds relative to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub content: String,
    pub provenance: Provenance,
    pub last_server_timestamp: i64,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState {
            content: String::new(),
            provenance: Provenance::Server,
            last_server_timestamp: 0,
        }
    }
}

impl SyncState {
    pub fn loaded(&mut self, record: ClipboardRecord) {
        self.content = record.content;
        self.provenance = Provenance::Server;
        self.last_server_timestamp = record.timestamp;
    }

    pub fn edited(&mut self, content: String) {
        self.content = content;
        self.provenance = Provenance::UserInput;
    }

    pub fn saved(&mut self, timestamp: i64) {
        self.last_server_timestamp = timestamp;
    }

    /// Takes a polled record only if it is strictly newer than anything seen
    /// and its content actually differs from the buffer.
    pub fn merge(&mut self, record: ClipboardRecord) -> bool {
        if record.timestamp <= self.last_server_timestamp || record.content == self.content {
            return false;
        }
        self.loaded(record);
        true
    }

    pub fn needs_save(&self) -> bool {
        self.provenance == Provenance::UserInput
    }
}

/// Transient, user-facing outcome of a background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Loaded,
    LoadFailed,
    Saved,
    SaveFailed,
    UpdatedRemotely,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::Loaded => "Content loaded",
            Notice::LoadFailed => "Failed to load content",
            Notice::Saved => "Auto-saved",
            Notice::SaveFailed => "Failed to auto-save",
            Notice::UpdatedRemotely => "Content updated from another device",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::LoadFailed | Notice::SaveFailed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            poll_interval: Duration::from_millis(2000),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub id: ClipboardId,
    pub content: String,
    pub provenance: Provenance,
    pub saving: bool,
}

enum Command {
    Edit(String),
    Focus(bool),
    Switch(ClipboardId),
}

pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawns the session task and returns it with the notice stream. The
    /// first thing the task does is load `id`.
    pub fn start<R: Remote>(
        remote: Arc<R>,
        id: ClipboardId,
        config: SessionConfig,
    ) -> (Session, mpsc::UnboundedReceiver<Notice>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView {
            id: id.clone(),
            content: String::new(),
            provenance: Provenance::Server,
            saving: false,
        });
        let cancel = CancellationToken::new();

        let worker = Worker {
            remote,
            id,
            config,
            state: SyncState::default(),
            focused: false,
            view: view_tx,
            notices: notice_tx,
        };
        let task = tokio::spawn(worker.run(command_rx, cancel.clone()));

        let session = Session {
            commands: command_tx,
            view: view_rx,
            cancel,
            task,
        };
        (session, notice_rx)
    }

    /// Replaces the buffer with locally typed content.
    pub fn edit(&self, content: impl Into<String>) {
        let _ = self.commands.send(Command::Edit(content.into()));
    }

    /// While focused, poll ticks are skipped.
    pub fn set_focused(&self, focused: bool) {
        let _ = self.commands.send(Command::Focus(focused));
    }

    /// Moves the session to another clipboard id. A pending save for the
    /// current id is flushed first.
    pub fn switch(&self, id: ClipboardId) {
        let _ = self.commands.send(Command::Switch(id));
    }

    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn content(&self) -> String {
        self.view.borrow().content.clone()
    }

    /// Stops both timers and waits for the task to finish. An edit still
    /// inside its quiet period is dropped.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session task did not shut down cleanly");
        }
    }
}

struct Worker<R> {
    remote: Arc<R>,
    id: ClipboardId,
    config: SessionConfig,
    state: SyncState,
    focused: bool,
    view: watch::Sender<SessionView>,
    notices: mpsc::UnboundedSender<Notice>,
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl<R: Remote> Worker<R> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        self.load().await;

        let period = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut save_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Edit(content)) => {
                        self.state.edited(content);
                        save_deadline = Some(Instant::now() + self.config.debounce);
                        self.publish(false);
                    }
                    Some(Command::Focus(focused)) => self.focused = focused,
                    Some(Command::Switch(id)) => {
                        if save_deadline.take().is_some() && self.state.needs_save() {
                            self.save().await;
                        }
                        tracing::info!(from = %self.id, to = %id, "switching clipboard");
                        self.id = id;
                        self.state = SyncState::default();
                        self.publish(false);
                        self.load().await;
                        poll.reset();
                    }
                    None => break,
                },
                _ = wait_for(save_deadline) => {
                    save_deadline = None;
                    if self.state.needs_save() {
                        self.save().await;
                    }
                }
                _ = poll.tick() => {
                    if self.poll().await {
                        save_deadline = None;
                    }
                }
            }
        }

        tracing::debug!(id = %self.id, "session stopped");
    }

    fn publish(&self, saving: bool) {
        self.view.send_replace(SessionView {
            id: self.id.clone(),
            content: self.state.content.clone(),
            provenance: self.state.provenance,
            saving,
        });
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    async fn load(&mut self) {
        match self.remote.fetch(&self.id).await {
            Ok(record) => {
                tracing::info!(id = %self.id, timestamp = record.timestamp, "loaded clipboard");
                self.state.loaded(record);
                self.publish(false);
                self.notify(Notice::Loaded);
            }
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "failed to load clipboard");
                self.notify(Notice::LoadFailed);
            }
        }
    }

    async fn save(&mut self) {
        self.publish(true);
        let content = self.state.content.clone();
        match self.remote.save(&self.id, &content).await {
            Ok(timestamp) => {
                tracing::info!(id = %self.id, timestamp, "saved clipboard");
                self.state.saved(timestamp);
                self.notify(Notice::Saved);
            }
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "failed to save clipboard");
                self.notify(Notice::SaveFailed);
            }
        }
        self.publish(false);
    }

    /// Returns whether the buffer was replaced.
    async fn poll(&mut self) -> bool {
        if self.focused {
            tracing::trace!(id = %self.id, "input focused, skipping poll");
            return false;
        }

        let record = match self.remote.fetch(&self.id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "poll failed");
                return false;
            }
        };

        tracing::debug!(
            id = %self.id,
            server_timestamp = record.timestamp,
            last_server_timestamp = self.state.last_server_timestamp,
            "poll check"
        );
        if !self.state.merge(record) {
            return false;
        }

        tracing::info!(id = %self.id, "content updated from another device");
        self.publish(false);
        self.notify(Notice::UpdatedRemotely);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::store::FallbackStore;
    use std::sync::Mutex;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::sleep;

    struct RecordingRemote {
        store: FallbackStore,
        saves: Mutex<Vec<(String, String)>>,
    }

    impl RecordingRemote {
        fn new() -> Arc<Self> {
            Arc::new(RecordingRemote {
                store: FallbackStore::memory_only(60_000),
                saves: Mutex::new(Vec::new()),
            })
        }

        fn saves(&self) -> Vec<(String, String)> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl Remote for RecordingRemote {
        async fn fetch(&self, id: &ClipboardId) -> Result<ClipboardRecord, ClientError> {
            Ok(self.store.get(id).await?)
        }

        async fn save(&self, id: &ClipboardId, content: &str) -> Result<i64, ClientError> {
            self.saves.lock().unwrap().push((id.to_string(), content.to_owned()));
            Ok(self.store.set(id, content).await?.timestamp)
        }
    }

    struct DownRemote;

    impl Remote for DownRemote {
        async fn fetch(&self, _id: &ClipboardId) -> Result<ClipboardRecord, ClientError> {
            Err(ClientError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        }

        async fn save(&self, _id: &ClipboardId, _content: &str) -> Result<i64, ClientError> {
            Err(ClientError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    #[test]
    fn test_merge_requires_newer_timestamp() {
        let mut state = SyncState::default();
        state.loaded(ClipboardRecord::new("mine", 100));

        assert!(!state.merge(ClipboardRecord::new("older", 50)));
        assert!(!state.merge(ClipboardRecord::new("same time", 100)));
        assert_eq!(state.content, "mine");

        assert!(state.merge(ClipboardRecord::new("theirs", 101)));
        assert_eq!(state.content, "theirs");
        assert_eq!(state.last_server_timestamp, 101);
        assert_eq!(state.provenance, Provenance::Server);
    }

    #[test]
    fn test_merge_ignores_identical_content() {
        let mut state = SyncState::default();
        state.edited("typed".to_owned());

        assert!(!state.merge(ClipboardRecord::new("typed", 500)));
        assert_eq!(state.provenance, Provenance::UserInput);
        assert_eq!(state.last_server_timestamp, 0);
    }

    #[test]
    fn test_save_keeps_user_provenance() {
        let mut state = SyncState::default();
        state.edited("draft".to_owned());
        state.saved(42);

        assert!(state.needs_save());
        assert_eq!(state.last_server_timestamp, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_saves_once() {
        let remote = RecordingRemote::new();
        let (session, mut notices) = Session::start(remote.clone(), ClipboardId::from("burst"), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.set_focused(true);
        for text in ["a", "ab", "abc"] {
            session.edit(text);
            sleep(Duration::from_millis(100)).await;
        }
        assert!(remote.saves().is_empty());

        assert_eq!(notices.recv().await, Some(Notice::Saved));
        sleep(Duration::from_secs(3)).await;

        assert_eq!(remote.saves(), vec![("burst".to_owned(), "abc".to_owned())]);
        assert_eq!(session.content(), "abc");
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_suppressed_while_focused() {
        let remote = RecordingRemote::new();
        let id = ClipboardId::from("desk");
        let (session, mut notices) = Session::start(remote.clone(), id.clone(), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.set_focused(true);
        remote.store.set(&id, "from the phone").await.unwrap();
        sleep(Duration::from_secs(7)).await;

        assert_eq!(session.content(), "");
        assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));

        session.set_focused(false);
        assert_eq!(notices.recv().await, Some(Notice::UpdatedRemotely));
        assert_eq!(session.content(), "from the phone");
        assert_eq!(session.view().borrow().provenance, Provenance::Server);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_update_cancels_pending_save() {
        let remote = RecordingRemote::new();
        let id = ClipboardId::from("race");
        let config = SessionConfig {
            poll_interval: Duration::from_millis(300),
            debounce: Duration::from_millis(500),
        };
        let (session, mut notices) = Session::start(remote.clone(), id.clone(), config);
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.edit("local draft");
        remote.store.set(&id, "remote wins").await.unwrap();

        assert_eq!(notices.recv().await, Some(Notice::UpdatedRemotely));
        sleep(Duration::from_secs(1)).await;

        assert!(remote.saves().is_empty());
        assert_eq!(session.content(), "remote wins");
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_save_is_not_echoed_back() {
        let remote = RecordingRemote::new();
        let (session, mut notices) = Session::start(remote.clone(), ClipboardId::from("echo"), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.edit("written here");
        assert_eq!(notices.recv().await, Some(Notice::Saved));
        sleep(Duration::from_secs(5)).await;

        assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(session.content(), "written here");
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_become_notices() {
        let (session, mut notices) = Session::start(Arc::new(DownRemote), ClipboardId::default(), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::LoadFailed));

        session.edit("nowhere to go");
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice, Notice::SaveFailed);
        assert!(notice.is_error());

        // polls fail quietly
        sleep(Duration::from_secs(5)).await;
        assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(session.content(), "nowhere to go");
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_save() {
        let remote = RecordingRemote::new();
        let (session, mut notices) = Session::start(remote.clone(), ClipboardId::from("bye"), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.edit("unsaved");
        sleep(Duration::from_millis(100)).await;
        session.shutdown().await;
        sleep(Duration::from_secs(1)).await;

        assert!(remote.saves().is_empty());
        assert_eq!(notices.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_flushes_then_loads() {
        let remote = RecordingRemote::new();
        remote.store.set(&ClipboardId::from("B"), "b content").await.unwrap();
        let (session, mut notices) = Session::start(remote.clone(), ClipboardId::from("A"), SessionConfig::default());
        assert_eq!(notices.recv().await, Some(Notice::Loaded));

        session.edit("a content");
        session.switch(ClipboardId::from("B"));

        assert_eq!(notices.recv().await, Some(Notice::Saved));
        assert_eq!(notices.recv().await, Some(Notice::Loaded));
        assert_eq!(remote.saves(), vec![("A".to_owned(), "a content".to_owned())]);

        let view = session.view().borrow().clone();
        assert_eq!(view.id.as_str(), "B");
        assert_eq!(view.content, "b content");
        assert_eq!(view.provenance, Provenance::Server);
        session.shutdown().await;
    }
}
