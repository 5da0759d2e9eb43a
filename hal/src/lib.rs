//! # Lazyload HAL - Host Abstraction Layer
//!
//! This crate wraps the handful of operating system services the loader
//! depends on, so the loader itself never touches `libc` directly.
//!
//! ## Services
//!
//! - **Addresses**: [`VirtAddr`], an architecture-independent virtual address
//! - **MMU**: host page size and fixed-address anonymous mappings ([`mmu`])
//! - **Traps**: protection-violation delivery to a registered callback ([`traps`])
//! - **Console**: raw, signal-safe diagnostics ([`console`])
//! - **Arch**: identity of the host machine ([`arch`])

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod arch;
pub mod console;
pub mod mmu;
pub mod traps;

use core::fmt;

pub use mmu::{HostMmu, PageMapper, ProtectionFlags};
pub use traps::{TrapAction, TrapGuard};

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// A fixed anonymous mapping could not be created
    #[error("mmap of {len:#x} bytes at {addr} failed (errno {errno})")]
    MapFailed {
        /// Requested base address
        addr: VirtAddr,
        /// Requested length
        len: usize,
        /// OS error number
        errno: i32,
    },
    /// The protection-violation handler could not be installed
    #[error("sigaction failed (errno {errno})")]
    TrapInstall {
        /// OS error number
        errno: i32,
    },
    /// Another fault callback is already installed
    #[error("a fault handler is already installed")]
    TrapBusy,
    /// The platform did not report a usable page size
    #[error("page size could not be determined")]
    PageSizeUnavailable,
    /// Address is invalid or not aligned
    #[error("invalid address {0}")]
    InvalidAddress(VirtAddr),
}

/// Read the calling thread's `errno`
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Virtual address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u64);

static_assertions::assert_eq_size!(VirtAddr, u64);

impl VirtAddr {
    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create an address from a raw pointer
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Get the address as a host pointer-sized integer
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address down to the given alignment (power of two)
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Align the address up to the given alignment (power of two)
    ///
    /// Returns `None` if the result does not fit in the address space.
    #[inline]
    pub const fn align_up(self, align: u64) -> Option<Self> {
        match self.0.checked_add(align - 1) {
            Some(raw) => Some(Self(raw & !(align - 1))),
            None => None,
        }
    }

    /// Add an offset to the address
    #[inline]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Convert to a raw pointer
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }

    /// Convert to a raw mutable pointer
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
