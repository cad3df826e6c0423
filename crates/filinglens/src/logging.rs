use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Honors the CLI flag first, then the `FILINGLENS_VERBOSE` environment
/// toggle.
pub fn init(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
    if enabled {
        verbose("verbose logging enabled");
    }
}

pub fn env_flag() -> bool {
    matches!(
        env::var("FILINGLENS_VERBOSE")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn stage(stage: &str, message: impl AsRef<str>) {
    eprintln!("[filinglens::{}] {}", stage, message.as_ref());
}

pub fn verbose(message: impl AsRef<str>) {
    if VERBOSE.load(Ordering::Relaxed) {
        eprintln!("[filinglens::verbose] {}", message.as_ref());
    }
}
