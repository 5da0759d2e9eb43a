//! # Host Architecture Identity
//!
//! Constants describing the machine the loader runs on, used to reject
//! images that could not execute natively.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// ELF `e_machine` value of the host
        pub const HOST_ELF_MACHINE: u16 = 62;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "x86_64";
    } else if #[cfg(target_arch = "aarch64")] {
        /// ELF `e_machine` value of the host
        pub const HOST_ELF_MACHINE: u16 = 183;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "aarch64";
    } else if #[cfg(target_arch = "riscv64")] {
        /// ELF `e_machine` value of the host
        pub const HOST_ELF_MACHINE: u16 = 243;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "riscv64";
    } else if #[cfg(target_arch = "x86")] {
        /// ELF `e_machine` value of the host
        pub const HOST_ELF_MACHINE: u16 = 3;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "x86";
    } else if #[cfg(target_arch = "arm")] {
        /// ELF `e_machine` value of the host
        pub const HOST_ELF_MACHINE: u16 = 40;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "arm";
    } else {
        /// ELF `e_machine` value of the host (unknown)
        pub const HOST_ELF_MACHINE: u16 = 0;
        /// Human-readable architecture name
        pub const HOST_ARCH_NAME: &str = "unknown";
    }
}

/// Width of a host pointer in bits
pub const HOST_POINTER_WIDTH: u32 = usize::BITS;

/// Is the host little-endian?
pub const HOST_LITTLE_ENDIAN: bool = cfg!(target_endian = "little");
