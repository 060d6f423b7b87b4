mod config;
mod session;
mod threads;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::api::{ApiError, MessageDto, NotificationDto, ThreadDto};
use crate::state::{now_millis, AppState, AuthState, ChatMessage, MessageDeliveryState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent, PageKind, RealtimeEvent};
use crate::{SharedTokenProvider, SharedTransportOverride};

use session::Session;
use threads::MessageLog;

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    // Outgoing timestamps are forced strictly monotonic so a burst of sends
    // within one millisecond still renders in send order.
    last_outgoing_ts: i64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    session: Option<Session>,
    // Bumped on every session teardown; listing/send results stamped with an
    // older epoch resolved too late and are dropped.
    session_epoch: u64,
    open_threads: HashMap<String, MessageLog>,
    // thread_id -> current fetch generation. Survives CloseThread so results
    // from a closed view can never land in a reopened one.
    generations: HashMap<String, u64>,

    transport_override: SharedTransportOverride,
    tokens: SharedTokenProvider,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        transport_override: SharedTransportOverride,
        tokens: SharedTokenProvider,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state,
            rev: 0,
            last_outgoing_ts: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            session: None,
            session_epoch: 0,
            open_threads: HashMap::new(),
            generations: HashMap::new(),
            transport_override,
            tokens,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        // Project the actor-internal logs into the snapshot before emitting.
        let mut views: Vec<_> = self.open_threads.values().map(MessageLog::to_view).collect();
        views.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        self.state.open_threads = views;
        // The global spinner is derived; each thread tracks its own fetch.
        self.state.busy.loading_thread = self.open_threads.values().any(|log| log.page_in_flight);

        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it, so a rev-gap
        // resync via state() still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn my_user_id(&self) -> String {
        match &self.state.auth {
            AuthState::LoggedIn { user_id } => user_id.clone(),
            AuthState::LoggedOut => String::new(),
        }
    }

    fn current_generation(&self, thread_id: &str) -> u64 {
        self.generations.get(thread_id).copied().unwrap_or(0)
    }

    fn bump_generation(&mut self, thread_id: &str) -> u64 {
        let g = self.generations.entry(thread_id.to_string()).or_insert(0);
        *g += 1;
        *g
    }

    /// Update the thread-list row for `thread_id` with a newer last message,
    /// inserting a stub row if the list hasn't been fetched yet. The list
    /// stays sorted newest-first.
    fn touch_summary(
        &mut self,
        thread_id: &str,
        last_message: Option<&str>,
        ts: i64,
        bump_unread: bool,
    ) {
        let summary = match self
            .state
            .thread_list
            .iter_mut()
            .find(|s| s.thread_id == thread_id)
        {
            Some(s) => s,
            None => {
                self.state.thread_list.push(crate::state::ThreadSummary {
                    thread_id: thread_id.to_string(),
                    peer_id: String::new(),
                    peer_name: None,
                    last_message: None,
                    updated_at: None,
                    unread_count: 0,
                });
                self.state
                    .thread_list
                    .last_mut()
                    .expect("just pushed")
            }
        };
        if summary.updated_at.map_or(true, |prev| ts >= prev) {
            summary.updated_at = Some(ts);
            if let Some(text) = last_message {
                summary.last_message = Some(text.to_string());
            }
        }
        if bump_unread {
            summary.unread_count += 1;
        }
        self.state
            .thread_list
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: message bodies don't belong in logs.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::StartSession { user_id } => self.start_session(user_id),
            AppAction::EndSession => {
                self.stop_session();
                self.emit_state();
            }
            AppAction::OpenThread { thread_id } => self.open_thread(&thread_id),
            AppAction::CloseThread { thread_id } => self.close_thread(&thread_id),
            AppAction::LoadOlderMessages { thread_id } => self.load_older(&thread_id),
            AppAction::SendMessage { thread_id, content } => self.send_message(&thread_id, content),
            AppAction::RetryMessage {
                thread_id,
                message_id,
            } => self.retry_message(&thread_id, &message_id),
            AppAction::RefreshThreads => self.refresh_threads(),
            AppAction::RefreshNotifications => self.refresh_notifications(),
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
            AppAction::Foregrounded => self.foregrounded(),
        }
    }

    fn open_thread(&mut self, thread_id: &str) {
        if self.session.is_none() {
            tracing::warn!(%thread_id, "open_thread without session");
            return;
        }
        let generation = self.bump_generation(thread_id);

        let log = self
            .open_threads
            .entry(thread_id.to_string())
            .or_insert_with(|| MessageLog::new(thread_id.to_string(), generation));
        log.generation = generation;
        log.page_in_flight = true;
        if let Some(summary) = self
            .state
            .thread_list
            .iter_mut()
            .find(|s| s.thread_id == thread_id)
        {
            if !summary.peer_id.is_empty() {
                log.peer_id = Some(summary.peer_id.clone());
            }
            log.peer_name = summary.peer_name.clone();
            summary.unread_count = 0;
        }

        if let Some(sess) = &self.session {
            if let Some(socket) = &sess.socket {
                socket.join(thread_id);
            }
        }

        self.spawn_fetch_page(thread_id.to_string(), generation, PageKind::Initial, None);
        self.emit_state();
    }

    fn close_thread(&mut self, thread_id: &str) {
        self.bump_generation(thread_id);
        if self.open_threads.remove(thread_id).is_none() {
            return;
        }
        if let Some(sess) = &self.session {
            if let Some(socket) = &sess.socket {
                socket.leave(thread_id);
            }
        }
        self.emit_state();
    }

    fn load_older(&mut self, thread_id: &str) {
        let Some(log) = self.open_threads.get_mut(thread_id) else {
            return;
        };
        if log.page_in_flight {
            // This thread already has a page on the wire; other threads are
            // free to page at the same time.
            return;
        }
        let Some(cursor) = log.next_cursor.clone() else {
            // Already at history start (or initial page still in flight).
            return;
        };
        let generation = log.generation;
        log.page_in_flight = true;
        self.spawn_fetch_page(
            thread_id.to_string(),
            generation,
            PageKind::Older,
            Some(cursor),
        );
        self.emit_state();
    }

    fn send_message(&mut self, thread_id: &str, content: String) {
        let content = content.trim().to_string();
        if content.is_empty() {
            return;
        }
        let my_user_id = self.my_user_id();
        let ts = now_millis().max(self.last_outgoing_ts + 1);
        self.last_outgoing_ts = ts;
        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());

        let Some(log) = self.open_threads.get_mut(thread_id) else {
            tracing::warn!(%thread_id, "send_message for thread that isn't open");
            return;
        };
        log.insert(ChatMessage {
            id: temp_id.clone(),
            thread_id: thread_id.to_string(),
            sender_id: my_user_id,
            receiver_id: log.peer_id.clone(),
            content: content.clone(),
            created_at: ts,
            is_mine: true,
            delivery: MessageDeliveryState::Pending,
        });

        self.touch_summary(thread_id, Some(&content), ts, false);
        self.state.busy.sending = true;
        self.spawn_send(thread_id.to_string(), temp_id, content);
        self.emit_state();
    }

    fn retry_message(&mut self, thread_id: &str, message_id: &str) {
        let Some(log) = self.open_threads.get_mut(thread_id) else {
            return;
        };
        let Some(content) = log.begin_retry(message_id) else {
            tracing::debug!(%thread_id, %message_id, "retry for non-failed message ignored");
            return;
        };
        self.state.busy.sending = true;
        self.spawn_send(thread_id.to_string(), message_id.to_string(), content);
        self.emit_state();
    }

    fn refresh_threads(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.state.busy.refreshing_threads = true;
        self.spawn_list_threads();
        self.emit_state();
    }

    fn refresh_notifications(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.spawn_list_notifications();
    }

    /// App came back to the foreground: the socket may have been dead for a
    /// while, so re-read everything that could have moved.
    fn foregrounded(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.refresh_open_threads();
        self.refresh_threads();
        self.refresh_notifications();
    }

    fn refresh_open_threads(&mut self) {
        let targets: Vec<(String, u64)> = self
            .open_threads
            .values()
            .map(|log| (log.thread_id.clone(), log.generation))
            .collect();
        for (thread_id, generation) in targets {
            self.spawn_fetch_page(thread_id, generation, PageKind::Refresh, None);
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::PageFetched {
                thread_id,
                generation,
                kind,
                result,
            } => self.on_page_fetched(thread_id, generation, kind, result),
            InternalEvent::SendFinished {
                epoch,
                thread_id,
                temp_id,
                result,
            } => self.on_send_finished(epoch, thread_id, temp_id, result),
            InternalEvent::ThreadsFetched { epoch, result } => {
                self.on_threads_fetched(epoch, result)
            }
            InternalEvent::NotificationsFetched { epoch, result } => {
                self.on_notifications_fetched(epoch, result)
            }
            InternalEvent::Realtime(event) => self.on_realtime(event),
        }
    }

    fn on_page_fetched(
        &mut self,
        thread_id: String,
        generation: u64,
        kind: PageKind,
        result: Result<crate::api::MessagePage, ApiError>,
    ) {
        if generation != self.current_generation(&thread_id) {
            // The thread was closed (or reopened) since this fetch started;
            // a newer generation owns its own in-flight flag.
            tracing::debug!(%thread_id, generation, "discarding stale page result");
            return;
        }
        let my_user_id = self.my_user_id();
        let demo_fallback = self.demo_fallback_enabled();
        let Some(log) = self.open_threads.get_mut(&thread_id) else {
            return;
        };
        if kind != PageKind::Refresh {
            log.page_in_flight = false;
        }

        match result {
            Ok(page) => {
                let items: Vec<ChatMessage> = page
                    .items
                    .into_iter()
                    .map(|dto| dto.into_message(&thread_id, &my_user_id))
                    .collect();
                log.merge_page(kind, items, page.next_cursor);
                if let Some((ts, text)) = log
                    .messages
                    .last()
                    .map(|m| (m.created_at, m.content.clone()))
                {
                    self.touch_summary(&thread_id, Some(&text), ts, false);
                }
            }
            Err(e) => {
                tracing::warn!(%thread_id, ?kind, error = %e, "page fetch failed");
                if kind == PageKind::Initial && !log.initial_loaded && demo_fallback {
                    log.merge_page(PageKind::Initial, demo_messages(&thread_id, &my_user_id), None);
                } else if kind != PageKind::Refresh {
                    log.load_error = Some(e.to_string());
                }
            }
        }
        self.emit_state();
    }

    fn on_send_finished(
        &mut self,
        epoch: u64,
        thread_id: String,
        temp_id: String,
        result: Result<MessageDto, ApiError>,
    ) {
        if epoch != self.session_epoch {
            tracing::debug!(%thread_id, "dropping send result from an ended session");
            return;
        }
        self.state.busy.sending = false;
        let my_user_id = self.my_user_id();
        match result {
            Ok(dto) => {
                let confirmed = dto.into_message(&thread_id, &my_user_id);
                let (ts, text) = (confirmed.created_at, confirmed.content.clone());
                if let Some(log) = self.open_threads.get_mut(&thread_id) {
                    log.confirm_send(&temp_id, confirmed);
                }
                self.touch_summary(&thread_id, Some(&text), ts, false);
            }
            Err(e) => {
                tracing::warn!(%thread_id, error = %e, "send failed");
                if let Some(log) = self.open_threads.get_mut(&thread_id) {
                    log.fail_send(&temp_id, e.to_string());
                }
            }
        }
        self.emit_state();
    }

    fn on_threads_fetched(&mut self, epoch: u64, result: Result<Vec<ThreadDto>, ApiError>) {
        if epoch != self.session_epoch {
            tracing::debug!("dropping thread list from an ended session");
            return;
        }
        self.state.busy.refreshing_threads = false;
        match result {
            Ok(dtos) => {
                let mut list: Vec<_> = dtos.into_iter().map(ThreadDto::into_summary).collect();
                for summary in &mut list {
                    // A thread the user is looking at has nothing unread.
                    if self.open_threads.contains_key(&summary.thread_id) {
                        summary.unread_count = 0;
                    }
                }
                list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                self.state.thread_list = list;

                // Backfill peer info the open views were missing.
                for log in self.open_threads.values_mut() {
                    if let Some(summary) = self
                        .state
                        .thread_list
                        .iter()
                        .find(|s| s.thread_id == log.thread_id)
                    {
                        if !summary.peer_id.is_empty() {
                            log.peer_id = Some(summary.peer_id.clone());
                        }
                        if summary.peer_name.is_some() {
                            log.peer_name = summary.peer_name.clone();
                        }
                    }
                }
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(error = %e, "thread list refresh failed");
                // Keep whatever list we had; an error is not an empty inbox.
                self.toast(format!("Couldn't refresh chats: {e}"));
            }
        }
    }

    fn on_notifications_fetched(
        &mut self,
        epoch: u64,
        result: Result<Vec<NotificationDto>, ApiError>,
    ) {
        if epoch != self.session_epoch {
            tracing::debug!("dropping notifications from an ended session");
            return;
        }
        match result {
            Ok(dtos) => {
                let mut items: Vec<_> = dtos.into_iter().map(NotificationDto::into_item).collect();
                items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                self.state.notifications = items;
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(error = %e, "notifications refresh failed");
                self.toast(format!("Couldn't load notifications: {e}"));
            }
        }
    }

    fn on_realtime(&mut self, event: RealtimeEvent) {
        if self.session.is_none() {
            // Socket events racing a logout.
            return;
        }
        match event {
            RealtimeEvent::Connected => {
                tracing::info!("realtime connected; refreshing open threads");
                // The socket was down for some window; re-read the newest page
                // of every open thread to heal gaps, and the list for everything
                // else.
                self.refresh_open_threads();
                self.spawn_list_threads();
                self.state.busy.refreshing_threads = true;
                self.emit_state();
            }
            RealtimeEvent::Message(dto) => {
                let Some(thread_id) = dto.thread_id.clone() else {
                    tracing::warn!("realtime message without thread id dropped");
                    return;
                };
                let my_user_id = self.my_user_id();
                let msg = dto.into_message(&thread_id, &my_user_id);
                let (ts, text, is_mine) = (msg.created_at, msg.content.clone(), msg.is_mine);

                let inserted = match self.open_threads.get_mut(&thread_id) {
                    Some(log) => log.insert(msg),
                    None => true,
                };
                if !inserted {
                    // Duplicate delivery (reconnect replay, send echo); the
                    // list row is already up to date.
                    return;
                }
                let bump_unread =
                    !is_mine && !self.open_threads.contains_key(&thread_id);
                self.touch_summary(&thread_id, Some(&text), ts, bump_unread);
                self.emit_state();
            }
        }
    }
}

/// Canned conversation shown instead of an error screen when the very first
/// history load fails and `demo_fallback` is on. Ids are stable so repeated
/// failures don't duplicate them.
fn demo_messages(thread_id: &str, my_user_id: &str) -> Vec<ChatMessage> {
    let base = now_millis() - 10 * 60 * 1000;
    let mk = |id: &str, offset: i64, mine: bool, content: &str| ChatMessage {
        id: format!("demo-{id}"),
        thread_id: thread_id.to_string(),
        sender_id: if mine {
            my_user_id.to_string()
        } else {
            "demo-peer".to_string()
        },
        receiver_id: None,
        content: content.to_string(),
        created_at: base + offset,
        is_mine: mine,
        delivery: MessageDeliveryState::Sent,
    };
    vec![
        mk("1", 0, false, "Hi! Is this still available?"),
        mk("2", 60_000, true, "Yes, it's still available."),
        mk("3", 120_000, false, "Great. Could you do $40 shipped?"),
    ]
}
