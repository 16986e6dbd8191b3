//! Global panic hook installed once at process start.
//!
//! This hook does not call `process::exit` itself: the
//! single-instance lock (`crate::lock::InstanceLock`) releases on unwind
//! via its `Drop` impl, and the workspace's `panic = "unwind"` profile
//! setting exists specifically so that unwind happens instead of an
//! abort. `main` determines the process exit code from however far the
//! unwind propagates, not from this hook.

use std::panic;
use tracing::error;

/// Install a panic hook that logs the panic location and message via
/// `tracing::error!` before delegating to whatever hook was previously
/// installed (normally the default hook, which prints a backtrace when
/// `RUST_BACKTRACE=1`).
pub fn install_panic_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "<no message>".to_string()
        };

        error!(location = %location, message = %message, "panic: order management core is unwinding");

        default_hook(panic_info);
    }));

    tracing::info!("panic handler installed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installing_twice_replaces_the_hook_without_panicking() {
        install_panic_handler();
        install_panic_handler();
    }
}
