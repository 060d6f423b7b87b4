mod actions;
mod api;
mod core;
mod logging;
mod realtime;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use api::{ApiError, ChatTransport, MessageDto, MessagePage, NotificationDto, ThreadDto};
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Host-side auth capability. The core never stores or refreshes tokens; it
/// asks the platform for the current one at each request or socket connect,
/// so a token refreshed by the host is picked up without restarting anything.
#[uniffi::export(callback_interface)]
pub trait TokenProvider: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

pub type SharedTokenProvider = Arc<RwLock<Option<Arc<dyn TokenProvider>>>>;
pub type SharedTransportOverride = Arc<RwLock<Option<Arc<dyn ChatTransport>>>>;

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    token_provider: SharedTokenProvider,
    transport_override: SharedTransportOverride,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let token_provider: SharedTokenProvider = Arc::new(RwLock::new(None));
        let transport_override: SharedTransportOverride = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let shared_for_core = shared_state.clone();
        let core_tx_for_core = core_tx.clone();
        let tokens_for_core = token_provider.clone();
        let override_for_core = transport_override.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                override_for_core,
                tokens_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            token_provider,
            transport_override,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    pub fn set_token_provider(&self, provider: Box<dyn TokenProvider>) {
        let provider: Arc<dyn TokenProvider> = Arc::from(provider);
        match self.token_provider.write() {
            Ok(mut slot) => {
                *slot = Some(provider);
            }
            Err(poison) => {
                *poison.into_inner() = Some(provider);
            }
        }
    }
}

impl FfiApp {
    /// Replace the REST transport before `StartSession`. Takes effect at the
    /// next session start.
    pub fn set_transport_for_tests(&self, transport: Arc<dyn ChatTransport>) {
        match self.transport_override.write() {
            Ok(mut slot) => {
                *slot = Some(transport);
            }
            Err(poison) => {
                *poison.into_inner() = Some(transport);
            }
        }
    }

    pub fn inject_realtime_message_for_tests(&self, dto: MessageDto) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::Realtime(RealtimeEvent::Message(dto)),
        )));
    }

    pub fn inject_realtime_connected_for_tests(&self) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::Realtime(RealtimeEvent::Connected),
        )));
    }
}
