//! `SafetyContext`: the explicit, test-injectable replacement for
//! process-wide dry-run/kill-switch/safe-mode globals. `safe_mode` is
//! the one flag that can flip at runtime -- the reconciler sets it on
//! an invariant violation -- so it lives behind an `AtomicBool` shared
//! with whoever else observes it; `dry_run`/`kill_switch`/`live_armed`
//! are fixed for the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stable, machine-readable tags attached to every engine-produced
/// `CycleReport` reason.
pub mod reason_code {
    pub const GATED_KILL_SWITCH: &str = "gated_kill_switch";
    pub const GATED_SAFE_MODE: &str = "gated_safe_mode";
    pub const GATED_NOT_LIVE_ARMED: &str = "gated_not_live_armed";
    pub const ACTION_DEDUPED: &str = "action_deduped";
    pub const IDEMPOTENCY_DUPLICATE: &str = "idempotency_duplicate";
    pub const IDEMPOTENCY_CONFLICT: &str = "idempotency_conflict";
    pub const VALIDATION_FAILED: &str = "local_validation";
    pub const SUBMITTED: &str = "submitted";
    pub const REJECTED: &str = "rejected";
    pub const UNKNOWN_OUTCOME: &str = "unknown_outcome";
    pub const CANCELED: &str = "canceled";
    pub const CANCEL_ALREADY_FILLED: &str = "cancel_already_filled";
    pub const CANCEL_ALREADY_CANCELED: &str = "cancel_already_canceled";
    pub const CANCEL_NOT_FOUND: &str = "cancel_not_found";
    pub const CANCEL_UNKNOWN: &str = "cancel_unknown";
}

#[derive(Clone)]
pub struct SafetyContext {
    pub dry_run: bool,
    pub kill_switch: bool,
    pub live_armed: bool,
    safe_mode: Arc<AtomicBool>,
}

impl SafetyContext {
    pub fn new(dry_run: bool, kill_switch: bool, safe_mode: bool, live_armed: bool) -> Self {
        Self { dry_run, kill_switch, live_armed, safe_mode: Arc::new(AtomicBool::new(safe_mode)) }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.dry_run, config.kill_switch, config.safe_mode, config.is_live_armed())
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    /// Set by the reconciler on an invariant violation. Never cleared
    /// automatically -- recovery is an operator action.
    pub fn set_safe_mode(&self, value: bool) {
        self.safe_mode.store(value, Ordering::Release);
    }

    /// New submits are blocked by `kill_switch` or `safe_mode`; cancels
    /// and reads remain allowed under `safe_mode`.
    pub fn blocks_new_submits(&self) -> bool {
        self.kill_switch || self.safe_mode()
    }

    pub fn blocks_all_writes(&self) -> bool {
        self.kill_switch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_mode_flip_is_observed_through_clones() {
        let ctx = SafetyContext::new(true, false, false, false);
        let clone = ctx.clone();
        assert!(!clone.blocks_new_submits());
        ctx.set_safe_mode(true);
        assert!(clone.blocks_new_submits());
    }

    #[test]
    fn kill_switch_blocks_regardless_of_safe_mode() {
        let ctx = SafetyContext::new(true, true, false, false);
        assert!(ctx.blocks_new_submits());
        assert!(ctx.blocks_all_writes());
    }
}
