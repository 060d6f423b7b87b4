// Session lifecycle + networking side effects.
//
// Every async side effect runs on the actor's tokio runtime and reports back
// as an `InternalEvent`; nothing here touches `self.state` from a spawned
// task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{
    ApiError, ChatTransport, MessageDto, MessagePage, NotificationDto, RestTransport, ThreadDto,
};
use crate::realtime::{spawn_socket, RealtimeHandle};
use crate::state::{AppState, AuthState, BusyState};
use crate::updates::{CoreMsg, InternalEvent, PageKind};

use super::AppCore;

pub(super) struct Session {
    pub(super) user_id: String,
    pub(super) transport: Arc<dyn ChatTransport>,
    /// None when networking is disabled; REST still goes through `transport`
    /// (which may be a test double).
    pub(super) socket: Option<RealtimeHandle>,
}

/// Stands in for the REST transport when networking is off and no test double
/// was injected. Every call fails fast with a network error, which the store
/// already knows how to render.
struct OfflineTransport;

#[async_trait]
impl ChatTransport for OfflineTransport {
    async fn fetch_page(&self, _: &str, _: Option<&str>) -> Result<MessagePage, ApiError> {
        Err(ApiError::Network("networking disabled".to_string()))
    }

    async fn send_message(&self, _: &str, _: &str) -> Result<MessageDto, ApiError> {
        Err(ApiError::Network("networking disabled".to_string()))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadDto>, ApiError> {
        Err(ApiError::Network("networking disabled".to_string()))
    }

    async fn list_notifications(&self) -> Result<Vec<NotificationDto>, ApiError> {
        Err(ApiError::Network("networking disabled".to_string()))
    }
}

impl AppCore {
    pub(super) fn start_session(&mut self, user_id: String) {
        // Tear down any existing session first.
        self.stop_session();

        tracing::info!(%user_id, "start_session");

        let override_slot = match self.transport_override.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        let transport: Arc<dyn ChatTransport> = match override_slot {
            Some(t) => t,
            None if self.network_enabled() => {
                Arc::new(RestTransport::new(self.api_base_url(), self.tokens.clone()))
            }
            None => Arc::new(OfflineTransport),
        };

        let socket = if self.network_enabled() {
            Some(spawn_socket(
                &self.runtime,
                self.ws_url(),
                self.tokens.clone(),
                self.core_sender.clone(),
            ))
        } else {
            None
        };

        self.session = Some(Session {
            user_id: user_id.clone(),
            transport,
            socket,
        });
        self.state.auth = AuthState::LoggedIn { user_id };
        self.emit_state();

        self.refresh_threads();
        self.refresh_notifications();
    }

    pub(super) fn stop_session(&mut self) {
        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = %sess.user_id, "stop_session");
            if let Some(socket) = sess.socket {
                socket.shutdown();
            }
        }
        // Listing and send results still in flight belong to the old epoch
        // and must not touch the logged-out (or next user's) state.
        self.session_epoch += 1;
        // Open fetches for a dead session must not resurrect its threads.
        let open: Vec<String> = self.open_threads.keys().cloned().collect();
        for thread_id in open {
            self.bump_generation(&thread_id);
        }
        self.open_threads.clear();

        self.state = AppState {
            rev: self.state.rev,
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            thread_list: vec![],
            open_threads: vec![],
            notifications: vec![],
            toast: self.state.toast.take(),
        };
    }

    pub(super) fn spawn_fetch_page(
        &mut self,
        thread_id: String,
        generation: u64,
        kind: PageKind,
        cursor: Option<String>,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let transport = sess.transport.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = transport.fetch_page(&thread_id, cursor.as_deref()).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PageFetched {
                thread_id,
                generation,
                kind,
                result,
            })));
        });
    }

    pub(super) fn spawn_send(&mut self, thread_id: String, temp_id: String, content: String) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let transport = sess.transport.clone();
        let tx = self.core_sender.clone();
        let epoch = self.session_epoch;
        self.runtime.spawn(async move {
            let result = transport.send_message(&thread_id, &content).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                epoch,
                thread_id,
                temp_id,
                result,
            })));
        });
    }

    pub(super) fn spawn_list_threads(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let transport = sess.transport.clone();
        let tx = self.core_sender.clone();
        let epoch = self.session_epoch;
        self.runtime.spawn(async move {
            let result = transport.list_threads().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ThreadsFetched {
                epoch,
                result,
            })));
        });
    }

    pub(super) fn spawn_list_notifications(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let transport = sess.transport.clone();
        let tx = self.core_sender.clone();
        let epoch = self.session_epoch;
        self.runtime.spawn(async move {
            let result = transport.list_notifications().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::NotificationsFetched { epoch, result },
            )));
        });
    }
}
