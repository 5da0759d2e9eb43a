//! # Page Materializer
//!
//! Creates one page of a segment on first touch. Runs inside the fault
//! handler: arithmetic, one mapping, one copy and atomic updates only.

use core::ptr;

use lazyload_hal::{HalError, ProtectionFlags, VirtAddr};

use crate::context::LoaderContext;
use crate::elf::ProgramHeader;
use crate::journal::JournalEvent;

/// Page materialization errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PagerError {
    /// The page could not be mapped
    #[error(transparent)]
    Map(#[from] HalError),
    /// The segment's file bytes are not in the image buffer
    #[error("file range {offset:#x}+{len:#x} lies outside the image")]
    SourceRange {
        /// File offset of the copy
        offset: u64,
        /// Bytes to copy
        len: u64,
    },
}

/// What one materialization did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    /// Base of the new page
    pub base: VirtAddr,
    /// File bytes copied into it
    pub copied: usize,
    /// Is this the page holding the segment's last byte?
    pub last_page: bool,
    /// Unused tail bytes counted for this page
    pub fragmentation: u64,
}

/// Map the page containing `fault` and fill it from `segment`.
///
/// The page receives the part of `[p_vaddr, p_vaddr + p_filesz)` that falls
/// inside it; everything else stays zero.
pub fn materialize(
    ctx: &LoaderContext,
    segment: &ProgramHeader,
    fault: VirtAddr,
) -> Result<Materialized, PagerError> {
    let page = ctx.page_size() as u64;
    let base = fault.align_down(page);
    let limit = base.as_u64().saturating_add(page);

    // SAFETY: `base` lies in a loadable segment; the loader owns that range.
    let dest = unsafe {
        ctx.mapper()
            .map_fixed(base, ctx.page_size(), ProtectionFlags::RWX)?
    };

    let copy_start = base.as_u64().max(segment.p_vaddr);
    let copy_end = limit.min(segment.file_end().as_u64());
    let mut copied = 0;
    if copy_start < copy_end {
        let len = copy_end - copy_start;
        let offset = segment.p_offset + (copy_start - segment.p_vaddr);
        let source = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(usize::try_from(len).ok()?)?))
            .and_then(|range| ctx.image().bytes().get(range))
            .ok_or(PagerError::SourceRange { offset, len })?;

        // SAFETY: `dest` points at a fresh page of `page` bytes and
        // `copy_start - base + len <= page`.
        unsafe {
            ptr::copy_nonoverlapping(
                source.as_ptr(),
                dest.as_ptr().add((copy_start - base.as_u64()) as usize),
                source.len(),
            );
        }
        copied = source.len();
    }

    ctx.metrics().record_page_allocation();

    // p_memsz > 0 here: `fault` is inside the segment
    let end = segment.end().as_u64();
    let last_page = VirtAddr::new(end - 1).align_down(page) == base;
    let mut fragmentation = 0;
    if last_page {
        fragmentation = (page - end % page) % page;
        if fragmentation > 0 {
            let cumulative = ctx.metrics().record_fragmentation(fragmentation);
            ctx.journal()
                .record(JournalEvent::Fragmentation { cumulative });
        }
    }

    Ok(Materialized {
        base,
        copied,
        last_page,
        fragmentation,
    })
}
