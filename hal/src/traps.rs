//! # Protection-Violation Traps
//!
//! Routes `SIGSEGV` to a single registered callback. The callback receives
//! the faulting address and decides whether the faulting instruction should
//! be retried or the signal escalated to the default (fatal) disposition.
//!
//! ## States
//! - **Uninstalled**: default OS handling (or whatever was there before)
//! - **Installed**: between [`install`] and the drop of the returned [`TrapGuard`]

use core::fmt;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::{last_errno, HalError, HalResult, VirtAddr};

/// What the trampoline does once the callback returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    /// The fault was resolved; resume the faulting instruction
    Resume,
    /// Restore default handling and re-raise the signal
    Escalate,
}

/// Fault callback type.
///
/// Runs in signal context: it must not allocate, lock, or log.
pub type FaultCallback = fn(VirtAddr) -> TrapAction;

static CALLBACK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Keeps the trap installed; dropping it restores the previous disposition
pub struct TrapGuard {
    previous: libc::sigaction,
}

impl fmt::Debug for TrapGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapGuard").finish_non_exhaustive()
    }
}

impl Drop for TrapGuard {
    fn drop(&mut self) {
        // SAFETY: `previous` was filled in by the kernel in `install`.
        let rc = unsafe { libc::sigaction(libc::SIGSEGV, &self.previous, ptr::null_mut()) };
        if rc == -1 {
            log::warn!("failed to restore previous SIGSEGV disposition (errno {})", last_errno());
        }
        CALLBACK.store(ptr::null_mut(), Ordering::Release);
        log::trace!("fault trap uninstalled");
    }
}

/// Is a callback currently installed?
#[cfg(test)]
pub(crate) fn is_installed() -> bool {
    !CALLBACK.load(Ordering::Acquire).is_null()
}

/// Install `callback` as the process-wide protection-violation handler
pub fn install(callback: FaultCallback) -> HalResult<TrapGuard> {
    CALLBACK
        .compare_exchange(
            ptr::null_mut(),
            callback as *mut (),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| HalError::TrapBusy)?;

    let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) = trampoline;

    // SAFETY: a zeroed sigaction is a valid starting point; every field the
    // kernel reads is set below.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO;
    let mut previous: libc::sigaction = unsafe { mem::zeroed() };

    // SAFETY: both structs are valid for the duration of the calls.
    let rc = unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGSEGV, &action, &mut previous)
    };

    if rc == -1 {
        let errno = last_errno();
        CALLBACK.store(ptr::null_mut(), Ordering::Release);
        return Err(HalError::TrapInstall { errno });
    }

    log::trace!("fault trap installed");
    Ok(TrapGuard { previous })
}

/// Restore default handling for `signal` and raise it.
///
/// From inside a handler the raised signal stays pending until the handler
/// returns, at which point the default action terminates the process.
pub fn escalate(signal: libc::c_int) {
    // SAFETY: signal and raise are async-signal-safe.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
}

extern "C" fn trampoline(
    signal: libc::c_int,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    let callback = CALLBACK.load(Ordering::Acquire);
    if callback.is_null() || info.is_null() {
        escalate(signal);
        return;
    }

    // SAFETY: only `FaultCallback` values are ever stored in CALLBACK.
    let callback: FaultCallback = unsafe { mem::transmute::<*mut (), FaultCallback>(callback) };
    // SAFETY: the kernel passes a valid siginfo for SA_SIGINFO handlers.
    let address = VirtAddr::from_ptr(unsafe { (*info).si_addr() });

    match callback(address) {
        TrapAction::Resume => {}
        TrapAction::Escalate => escalate(signal),
    }
}
