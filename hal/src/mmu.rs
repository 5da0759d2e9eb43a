//! # MMU Abstraction
//!
//! Page size discovery and fixed-address anonymous mappings on the host.

use core::ptr::NonNull;

use bitflags::bitflags;
use spin::Once;

use crate::{last_errno, HalError, HalResult, VirtAddr};

bitflags! {
    /// Memory protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtectionFlags: u32 {
        /// Read access
        const READ = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Execute access
        const EXECUTE = 1 << 2;
        /// Read + Write
        const RW = Self::READ.bits() | Self::WRITE.bits();
        /// Read + Execute
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
        /// Read + Write + Execute
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl ProtectionFlags {
    /// Translate into `PROT_*` bits for `mmap`
    pub fn to_prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.contains(Self::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(Self::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(Self::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// Creates page mappings on behalf of the loader.
///
/// Implementations are called from inside the protection-violation handler,
/// so they must not allocate, lock, or log.
pub trait PageMapper: Send + Sync {
    /// Page granularity of this mapper in bytes (a power of two)
    fn page_size(&self) -> usize;

    /// Create `len` bytes of zero-filled anonymous memory at exactly `base`,
    /// replacing whatever was mapped there.
    ///
    /// Returns the pointer through which the new memory is written. For the
    /// host mapper this is `base` itself.
    ///
    /// # Safety
    /// Any existing mapping in `[base, base + len)` is destroyed. The caller
    /// must own that range.
    unsafe fn map_fixed(
        &self,
        base: VirtAddr,
        len: usize,
        prot: ProtectionFlags,
    ) -> HalResult<NonNull<u8>>;
}

impl<T: PageMapper + ?Sized> PageMapper for std::sync::Arc<T> {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    unsafe fn map_fixed(
        &self,
        base: VirtAddr,
        len: usize,
        prot: ProtectionFlags,
    ) -> HalResult<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { (**self).map_fixed(base, len, prot) }
    }
}

static PAGE_SIZE: Once<usize> = Once::new();

/// Query (once) the platform page size
pub fn page_size() -> HalResult<usize> {
    let size = *PAGE_SIZE.call_once(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(raw).unwrap_or(0)
    });

    if size == 0 || !size.is_power_of_two() {
        return Err(HalError::PageSizeUnavailable);
    }
    Ok(size)
}

/// The host's `mmap`-backed mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMmu {
    page_size: usize,
}

impl HostMmu {
    /// Create a mapper using the platform page size
    pub fn new() -> HalResult<Self> {
        Ok(Self {
            page_size: page_size()?,
        })
    }
}

impl PageMapper for HostMmu {
    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn map_fixed(
        &self,
        base: VirtAddr,
        len: usize,
        prot: ProtectionFlags,
    ) -> HalResult<NonNull<u8>> {
        if !base.is_aligned(self.page_size as u64) {
            return Err(HalError::InvalidAddress(base));
        }

        // SAFETY: MAP_FIXED over a range the caller owns.
        let mapped = unsafe {
            libc::mmap(
                base.as_mut_ptr(),
                len,
                prot.to_prot(),
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_FIXED,
                -1,
                0,
            )
        };

        if mapped == libc::MAP_FAILED {
            return Err(HalError::MapFailed {
                addr: base,
                len,
                errno: last_errno(),
            });
        }

        NonNull::new(mapped.cast::<u8>()).ok_or(HalError::InvalidAddress(base))
    }
}
