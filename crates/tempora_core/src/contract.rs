//! # Contract Violation Reporting
//!
//! Every fatal assertion in the crate funnels through [`violation`]:
//!
//! 1. The violation is logged with `tracing::error!`.
//! 2. The registered hook (if any) sees it. A hook may record telemetry or
//!    call `std::process::abort()`.
//! 3. The calling thread panics with the violation's message.
//!
//! Call sites check before they mutate, so unwinding out of a violation
//! never leaves a half-updated cycler, pipeline or lock behind.

use parking_lot::RwLock;

use crate::error::ContractViolation;

/// Signature of a violation hook.
pub type ViolationHook = fn(&ContractViolation);

static HOOK: RwLock<Option<ViolationHook>> = parking_lot::const_rwlock(None);

/// Installs `hook`, replacing any previous one.
pub fn set_violation_hook(hook: ViolationHook) {
    *HOOK.write() = Some(hook);
}

/// Removes the installed hook.
pub fn clear_violation_hook() {
    *HOOK.write() = None;
}

/// Reports `violation` and panics.
///
/// Registry and lock-graph guards are released before this is called. A
/// cycler's own lock may still be held, so a hook must not touch cyclers.
#[cold]
#[track_caller]
pub(crate) fn violation(violation: ContractViolation) -> ! {
    tracing::error!(%violation, "contract violation");
    let hook = *HOOK.read();
    if let Some(hook) = hook {
        hook(&violation);
    }
    panic!("{violation}");
}
