//! # Fault Handler
//!
//! Turns protection violations inside loadable segments into freshly
//! materialized pages. The active [`LoaderContext`] is published through a
//! process-wide pointer for the duration of a [`FaultHandler`] guard; the
//! trap callback has no other way to reach it.
//!
//! Everything reachable from [`on_fault`] is signal-safe: atomics, one
//! mapping, one copy. Text output happens later, when the journal is drained.

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use lazyload_hal::{console, traps, HalError, TrapAction, TrapGuard, VirtAddr};

use crate::context::LoaderContext;
use crate::journal::JournalEvent;
use crate::pager::{self, Materialized, PagerError};
use crate::LoadResult;

static ACTIVE: AtomicPtr<LoaderContext> = AtomicPtr::new(ptr::null_mut());

/// Installed fault handler; uninstalls on drop
#[derive(Debug)]
pub struct FaultHandler<'ctx> {
    trap: Option<TrapGuard>,
    _ctx: PhantomData<&'ctx LoaderContext>,
}

impl<'ctx> FaultHandler<'ctx> {
    /// Route protection violations to `ctx` until the guard is dropped
    pub fn install(ctx: &'ctx LoaderContext) -> LoadResult<Self> {
        let raw = (ctx as *const LoaderContext).cast_mut();
        ACTIVE
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HalError::TrapBusy)?;

        let trap = match traps::install(on_fault) {
            Ok(trap) => trap,
            Err(err) => {
                ACTIVE.store(ptr::null_mut(), Ordering::Release);
                return Err(err.into());
            }
        };

        log::debug!("fault handler installed");
        Ok(Self {
            trap: Some(trap),
            _ctx: PhantomData,
        })
    }
}

impl Drop for FaultHandler<'_> {
    fn drop(&mut self) {
        // Restore the disposition before the context pointer goes away.
        drop(self.trap.take());
        ACTIVE.store(ptr::null_mut(), Ordering::Release);
        log::debug!("fault handler uninstalled");
    }
}

/// Is a context currently published to the handler?
#[cfg(test)]
fn is_active() -> bool {
    !ACTIVE.load(Ordering::Acquire).is_null()
}

/// Handle one fault against `ctx`.
///
/// Returns `Ok(None)` when no loadable segment claims `addr`; counters are
/// untouched in that case.
pub fn resolve_fault(
    ctx: &LoaderContext,
    addr: VirtAddr,
) -> Result<Option<Materialized>, PagerError> {
    let Some(segment) = ctx.segment_for(addr) else {
        return Ok(None);
    };

    ctx.metrics().record_fault();
    ctx.journal().record(JournalEvent::Fault { address: addr });

    pager::materialize(ctx, segment, addr).map(Some)
}

/// Trap callback
fn on_fault(addr: VirtAddr) -> TrapAction {
    let ctx = ACTIVE.load(Ordering::Acquire);
    if ctx.is_null() {
        return TrapAction::Escalate;
    }
    // SAFETY: ACTIVE only holds a context borrowed by a live FaultHandler.
    let ctx = unsafe { &*ctx };

    match resolve_fault(ctx, addr) {
        Ok(Some(_)) => TrapAction::Resume,
        Ok(None) => TrapAction::Escalate,
        Err(PagerError::Map(_)) => {
            console::fatal("mmap failed while materializing page", Some(addr.as_u64()))
        }
        Err(PagerError::SourceRange { .. }) => {
            console::fatal("segment bytes lie outside the image", Some(addr.as_u64()))
        }
    }
}
