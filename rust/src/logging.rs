//! Logging setup, one sink per platform: logcat on Android
//! (paranoid-android), os_log plus an on-disk fallback on iOS
//! (tracing-oslog), plain stderr fmt everywhere else (desktop, tests).
//!
//! Called exactly once, at the top of `FfiApp::new()`.

const DEFAULT_FILTER: &str = "shedx_core=debug,reqwest=info,tokio_tungstenite=info,info";

pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let logcat = paranoid_android::layer("shedx")
            .with_filter(tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::registry().with(logcat).try_init();
    }

    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        // os_log filtering can hide debug output; `<data_dir>/shedx.log` is
        // always retrievable from the simulator filesystem.
        let _ = std::fs::create_dir_all(data_dir);
        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(data_dir).join("shedx.log"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            });

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
            .with(tracing_oslog::OsLogger::new("app.shedx.chat", "default"))
            .with(file_layer)
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| DEFAULT_FILTER.into()),
            )
            .try_init();
    }
}
