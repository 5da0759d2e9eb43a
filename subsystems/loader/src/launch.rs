//! # Entry Resolver & Launcher
//!
//! Picks the transfer target, installs the fault handler and calls into the
//! image. Nothing of the image is resident beforehand: the first instruction
//! fetch at the entry point is itself the first fault.

use core::mem;

use lazyload_hal::VirtAddr;

use crate::context::LoaderContext;
use crate::fault::FaultHandler;
use crate::LoadResult;

/// Where control would go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResolution {
    /// The declared entry point
    Reachable {
        /// Entry address
        entry: VirtAddr,
        /// Index of the loadable segment holding it, if any
        segment: Option<usize>,
    },
    /// No loadable segment, or (when required) none holding the entry
    Unreachable,
}

/// Result of a launch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The image ran and returned
    Returned {
        /// Value returned by the entry function
        status: i32,
    },
    /// Execution was skipped
    Unreachable,
}

/// Resolve the entry point.
///
/// Any loadable segment makes the declared entry reachable; whether a
/// segment actually contains it is reported but only enforced when
/// `require_entry_in_segment` is set.
pub fn resolve_entry(ctx: &LoaderContext) -> EntryResolution {
    let elf = ctx.elf();
    if elf.loadable().next().is_none() {
        return EntryResolution::Unreachable;
    }

    let entry = elf.header.entry_point();
    let segment = elf
        .loadable()
        .find(|(_, ph)| ph.contains(entry))
        .map(|(index, _)| index);

    if segment.is_none() && ctx.config().require_entry_in_segment {
        return EntryResolution::Unreachable;
    }
    EntryResolution::Reachable { entry, segment }
}

/// Transfer control to the image and report what happened.
///
/// An image without a reachable entry is reported and skipped before its
/// class and machine are checked against the host. The fault handler is
/// live only while the image runs; the journal is drained to the log after
/// it returns.
pub fn run(ctx: &LoaderContext) -> LoadResult<LaunchOutcome> {
    let entry = match resolve_entry(ctx) {
        EntryResolution::Reachable { entry, segment } => {
            match segment {
                Some(index) => log::debug!("entry {entry} lies in segment {index}"),
                None => log::warn!("entry {entry} lies outside every loadable segment"),
            }
            entry
        }
        EntryResolution::Unreachable => {
            log::info!("Entry point address is out of bounds.");
            return Ok(LaunchOutcome::Unreachable);
        }
    };

    // Only an image that would actually run has to match the host.
    ctx.elf().header.ensure_runnable()?;

    let handler = FaultHandler::install(ctx)?;
    log::info!("Entry point address is: {entry}");

    // SAFETY: the handler materializes the image's pages as they are
    // touched; the image is trusted to follow the C calling convention.
    let status = unsafe { enter(entry) };

    drop(handler);
    ctx.journal().drain_to_log();
    log::info!("User _start return value = {status}");

    Ok(LaunchOutcome::Returned { status })
}

/// Call `entry` as `extern "C" fn() -> i32`
unsafe fn enter(entry: VirtAddr) -> i32 {
    // SAFETY: caller guarantees `entry` is executable once faulted in.
    let start = unsafe { mem::transmute::<usize, extern "C" fn() -> i32>(entry.as_usize()) };
    start()
}
