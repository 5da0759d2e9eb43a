//! Test support: in-memory ELF synthesis and a recording page mapper.

use core::ptr::NonNull;

use lazyload_hal::arch::HOST_ELF_MACHINE;
use lazyload_hal::{HalError, HalResult, PageMapper, ProtectionFlags, VirtAddr};
use spin::Mutex;

use crate::elf::{ElfClass, SegmentFlags, ET_EXEC, PT_LOAD, PT_NOTE};

/// One program header to synthesize
#[derive(Debug, Clone)]
pub(crate) struct SegmentSpec {
    kind: u32,
    flags: SegmentFlags,
    vaddr: u64,
    memsz: u64,
    data: Vec<u8>,
    offset_override: Option<u64>,
}

impl SegmentSpec {
    pub(crate) fn load(vaddr: u64, memsz: u64) -> Self {
        Self {
            kind: PT_LOAD,
            flags: SegmentFlags::READ | SegmentFlags::WRITE | SegmentFlags::EXECUTE,
            vaddr,
            memsz,
            data: Vec::new(),
            offset_override: None,
        }
    }

    pub(crate) fn note() -> Self {
        Self {
            kind: PT_NOTE,
            flags: SegmentFlags::READ,
            vaddr: 0,
            memsz: 0,
            data: Vec::new(),
            offset_override: None,
        }
    }

    pub(crate) fn kind(mut self, kind: u32) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn flags(mut self, flags: SegmentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub(crate) fn file_offset_override(mut self, offset: u64) -> Self {
        self.offset_override = Some(offset);
        self
    }
}

/// Builds a minimal little-endian ELF image
#[derive(Debug, Clone)]
pub(crate) struct ElfBuilder {
    class: ElfClass,
    file_type: u16,
    machine: u16,
    entry: u64,
    segments: Vec<SegmentSpec>,
}

impl ElfBuilder {
    pub(crate) fn elf64() -> Self {
        Self {
            class: ElfClass::Elf64,
            file_type: ET_EXEC,
            machine: HOST_ELF_MACHINE,
            entry: 0,
            segments: Vec::new(),
        }
    }

    pub(crate) fn elf32() -> Self {
        Self {
            class: ElfClass::Elf32,
            ..Self::elf64()
        }
    }

    pub(crate) fn file_type(mut self, file_type: u16) -> Self {
        self.file_type = file_type;
        self
    }

    pub(crate) fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub(crate) fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub(crate) fn segment(mut self, segment: SegmentSpec) -> Self {
        self.segments.push(segment);
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let header_size = self.class.header_size();
        let ph_size = self.class.program_header_size();
        let table_end = header_size + ph_size * self.segments.len();
        let data_start = (table_end + 15) & !15;

        let mut offsets = Vec::with_capacity(self.segments.len());
        let mut payload = Vec::new();
        for seg in &self.segments {
            offsets.push((data_start + payload.len()) as u64);
            payload.extend_from_slice(&seg.data);
        }

        let mut out = vec![0u8; data_start];
        out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        out[4] = match self.class {
            ElfClass::Elf32 => 1,
            ElfClass::Elf64 => 2,
        };
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&self.file_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());

        let phnum = self.segments.len() as u16;
        match self.class {
            ElfClass::Elf32 => {
                out[24..28].copy_from_slice(&(self.entry as u32).to_le_bytes());
                out[28..32].copy_from_slice(&(header_size as u32).to_le_bytes());
                out[40..42].copy_from_slice(&(header_size as u16).to_le_bytes());
                out[42..44].copy_from_slice(&(ph_size as u16).to_le_bytes());
                out[44..46].copy_from_slice(&phnum.to_le_bytes());
            }
            ElfClass::Elf64 => {
                out[24..32].copy_from_slice(&self.entry.to_le_bytes());
                out[32..40].copy_from_slice(&(header_size as u64).to_le_bytes());
                out[52..54].copy_from_slice(&(header_size as u16).to_le_bytes());
                out[54..56].copy_from_slice(&(ph_size as u16).to_le_bytes());
                out[56..58].copy_from_slice(&phnum.to_le_bytes());
            }
        }

        for (i, seg) in self.segments.iter().enumerate() {
            let at = header_size + i * ph_size;
            let offset = seg.offset_override.unwrap_or(offsets[i]);
            let filesz = seg.data.len() as u64;
            let ph = &mut out[at..at + ph_size];
            match self.class {
                ElfClass::Elf32 => {
                    ph[0..4].copy_from_slice(&seg.kind.to_le_bytes());
                    ph[4..8].copy_from_slice(&(offset as u32).to_le_bytes());
                    ph[8..12].copy_from_slice(&(seg.vaddr as u32).to_le_bytes());
                    ph[12..16].copy_from_slice(&(seg.vaddr as u32).to_le_bytes());
                    ph[16..20].copy_from_slice(&(filesz as u32).to_le_bytes());
                    ph[20..24].copy_from_slice(&(seg.memsz as u32).to_le_bytes());
                    ph[24..28].copy_from_slice(&seg.flags.bits().to_le_bytes());
                    ph[28..32].copy_from_slice(&0x1000u32.to_le_bytes());
                }
                ElfClass::Elf64 => {
                    ph[0..4].copy_from_slice(&seg.kind.to_le_bytes());
                    ph[4..8].copy_from_slice(&seg.flags.bits().to_le_bytes());
                    ph[8..16].copy_from_slice(&offset.to_le_bytes());
                    ph[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
                    ph[24..32].copy_from_slice(&seg.vaddr.to_le_bytes());
                    ph[32..40].copy_from_slice(&filesz.to_le_bytes());
                    ph[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
                    ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
                }
            }
        }

        out.extend_from_slice(&payload);
        out
    }
}

/// Backs each requested page with heap memory and records the requests
#[derive(Debug)]
pub(crate) struct RecordingMapper {
    page_size: usize,
    fail: bool,
    pages: Mutex<Vec<(VirtAddr, ProtectionFlags, Box<[u8]>)>>,
}

impl RecordingMapper {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            page_size,
            fail: false,
            pages: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(page_size: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(page_size)
        }
    }

    /// Base addresses mapped so far, in request order
    pub(crate) fn bases(&self) -> Vec<VirtAddr> {
        self.pages.lock().iter().map(|(base, _, _)| *base).collect()
    }

    /// Protection requested for `base`
    pub(crate) fn protection(&self, base: VirtAddr) -> Option<ProtectionFlags> {
        self.pages
            .lock()
            .iter()
            .find(|(b, _, _)| *b == base)
            .map(|(_, prot, _)| *prot)
    }

    /// Copy of the contents of the page mapped at `base`
    pub(crate) fn page(&self, base: VirtAddr) -> Option<Vec<u8>> {
        self.pages
            .lock()
            .iter()
            .rev()
            .find(|(b, _, _)| *b == base)
            .map(|(_, _, bytes)| bytes.to_vec())
    }
}

impl PageMapper for RecordingMapper {
    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn map_fixed(
        &self,
        base: VirtAddr,
        len: usize,
        prot: ProtectionFlags,
    ) -> HalResult<NonNull<u8>> {
        if self.fail {
            return Err(HalError::MapFailed {
                addr: base,
                len,
                errno: 12,
            });
        }
        let mut storage = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).ok_or(HalError::InvalidAddress(base))?;
        self.pages.lock().push((base, prot, storage));
        Ok(ptr)
    }
}
