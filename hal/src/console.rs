//! # Raw Console
//!
//! Unbuffered output usable from inside a signal handler. Only `write(2)`
//! and `_exit(2)` are used; nothing here allocates or locks.

/// Standard error file descriptor
pub const STDERR: libc::c_int = 2;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Write all of `bytes` to `fd`, ignoring errors
pub fn write_raw(fd: libc::c_int, bytes: &[u8]) {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        // SAFETY: the pointer/length pair comes from a live slice.
        let written = unsafe { libc::write(fd, remaining.as_ptr().cast(), remaining.len()) };
        if written <= 0 {
            return;
        }
        remaining = &remaining[written as usize..];
    }
}

/// Render `value` as `0x` followed by sixteen hex digits into `buf`
pub fn format_hex(value: u64, buf: &mut [u8; 18]) -> &[u8] {
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..16 {
        let nibble = ((value >> ((15 - i) * 4)) & 0xF) as usize;
        buf[2 + i] = HEX[nibble];
    }
    &buf[..]
}

/// Write a hexadecimal value to `fd`
pub fn write_hex(fd: libc::c_int, value: u64) {
    let mut buf = [0u8; 18];
    write_raw(fd, format_hex(value, &mut buf));
}

/// Report a fatal condition and terminate immediately with status 1.
///
/// Used where unwinding or buffered output is not permitted.
pub fn fatal(message: &str, address: Option<u64>) -> ! {
    write_raw(STDERR, b"lazyload: fatal: ");
    write_raw(STDERR, message.as_bytes());
    if let Some(address) = address {
        write_raw(STDERR, b" at ");
        write_hex(STDERR, address);
    }
    write_raw(STDERR, b"\n");
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(1) }
}
