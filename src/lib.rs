pub mod api;
pub mod core;

pub use crate::core::capture::CaptureScheduler;
pub use crate::core::config::{CaptureConfig, SchedulerConfig};
pub use crate::api::extractor::SlideExtractor;

/// 初始化日志，可重复调用
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("slide_sentinel"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        // 已初始化（或宿主装了别的 logger）时忽略
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    }
}
