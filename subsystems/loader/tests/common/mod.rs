//! Shared fixtures: synthesized x86_64 executables on disk.

use std::io::Write;

use lazyload_loader::elf::{ET_EXEC, PT_LOAD, PT_NOTE};

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const EM_X86_64: u16 = 62;

/// One program header
pub struct Segment {
    pub kind: u32,
    pub vaddr: u64,
    pub memsz: u64,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn load(vaddr: u64, memsz: u64, data: Vec<u8>) -> Self {
        Self {
            kind: PT_LOAD,
            vaddr,
            memsz,
            data,
        }
    }

    pub fn note() -> Self {
        Self {
            kind: PT_NOTE,
            vaddr: 0,
            memsz: 0,
            data: Vec::new(),
        }
    }
}

/// Serialize an ELF64 executable with `segments`, data following the table
pub fn elf64(entry: u64, segments: &[Segment]) -> Vec<u8> {
    let table_end = EHDR_SIZE + PHDR_SIZE * segments.len();
    let mut out = vec![0u8; table_end];

    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 2; // ELFCLASS64
    out[5] = 1; // little endian
    out[6] = 1; // EV_CURRENT
    out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    out[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..32].copy_from_slice(&entry.to_le_bytes());
    out[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
    out[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, seg) in segments.iter().enumerate() {
        let offset = out.len() as u64;
        out.extend_from_slice(&seg.data);

        let at = EHDR_SIZE + i * PHDR_SIZE;
        let ph = &mut out[at..at + PHDR_SIZE];
        ph[0..4].copy_from_slice(&seg.kind.to_le_bytes());
        ph[4..8].copy_from_slice(&7u32.to_le_bytes());
        ph[8..16].copy_from_slice(&offset.to_le_bytes());
        ph[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
        ph[24..32].copy_from_slice(&seg.vaddr.to_le_bytes());
        ph[32..40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
        ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
    }

    out
}

/// Write `bytes` to a fresh temporary file
pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write image");
    file.flush().expect("flush image");
    file
}

/// `mov rax, imm64; movzx eax, byte [rax]; ret`
pub fn load_byte_and_return(address: u64) -> Vec<u8> {
    let mut code = vec![0x48, 0xB8];
    code.extend_from_slice(&address.to_le_bytes());
    code.extend_from_slice(&[0x0F, 0xB6, 0x00, 0xC3]);
    code
}

/// Reserve `len` bytes of inaccessible address space
pub fn reserve(len: usize) -> u64 {
    // SAFETY: a fresh anonymous PROT_NONE mapping at a kernel-chosen address.
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    assert_ne!(base, libc::MAP_FAILED, "reserve address space");
    base as u64
}
