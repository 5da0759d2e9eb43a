//! # ELF Image Descriptor Parser
//!
//! Decodes the ELF header and program header table of a statically linked
//! executable held in memory.
//!
//! ## Features
//! - ELF32 and ELF64 headers (little-endian)
//! - Program header interpretation with permission flags
//! - Bounds validation of the segment table and every loadable segment
//! - Host compatibility check before launch

use bitflags::bitflags;
use lazyload_hal::arch::{HOST_ARCH_NAME, HOST_ELF_MACHINE, HOST_LITTLE_ENDIAN, HOST_POINTER_WIDTH};
use lazyload_hal::VirtAddr;

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class - 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF class - 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding - little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF type - relocatable object
pub const ET_REL: u16 = 1;

/// ELF type - executable
pub const ET_EXEC: u16 = 2;

/// ELF type - shared object / PIE
pub const ET_DYN: u16 = 3;

/// ELF type - core dump
pub const ET_CORE: u16 = 4;

/// Program header type - unused entry
pub const PT_NULL: u32 = 0;

/// Program header type - loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type - dynamic
pub const PT_DYNAMIC: u32 = 2;

/// Program header type - interpreter
pub const PT_INTERP: u32 = 3;

/// Program header type - note
pub const PT_NOTE: u32 = 4;

/// Program header type - thread-local storage
pub const PT_TLS: u32 = 7;

/// Size of the identification prefix
const EI_NIDENT: usize = 16;

/// ELF errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
    /// Invalid magic number
    #[error("not an ELF file (bad magic)")]
    InvalidMagic,
    /// Unsupported class
    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),
    /// Unsupported endianness
    #[error("unsupported data encoding {0}")]
    UnsupportedEndian(u8),
    /// Unsupported version
    #[error("unsupported ELF version {0}")]
    UnsupportedVersion(u8),
    /// Not a standalone executable
    #[error("ELF file type {0} is unsupported (need ET_EXEC)")]
    UnsupportedType(u16),
    /// Built for another machine
    #[error("ELF machine {found} cannot run on this {host} host")]
    UnsupportedMachine {
        /// `e_machine` of the image
        found: u16,
        /// Host architecture name
        host: &'static str,
    },
    /// Class does not match the host pointer width
    #[error("{bits}-bit image cannot run on a {host_bits}-bit host")]
    ClassMismatch {
        /// Image pointer width
        bits: u32,
        /// Host pointer width
        host_bits: u32,
    },
    /// Buffer too small for the header
    #[error("file too small for an ELF header")]
    BufferTooSmall,
    /// Declared program header entry size is too small
    #[error("program header entry size {0} is too small")]
    InvalidEntrySize(u16),
    /// Program header table lies outside the file
    #[error("program header table lies outside the file")]
    TableOutOfBounds,
    /// Loadable segment file range lies outside the file
    #[error("segment {index} file range lies outside the file")]
    SegmentOutOfBounds {
        /// Program header index
        index: usize,
    },
    /// Loadable segment has `p_memsz < p_filesz`
    #[error("segment {index} memory size is smaller than its file size")]
    SegmentSizeMismatch {
        /// Program header index
        index: usize,
    },
    /// Loadable segment wraps the address space
    #[error("segment {index} wraps the address space")]
    SegmentOverflow {
        /// Program header index
        index: usize,
    },
}

/// ELF file class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit objects
    Elf32,
    /// 64-bit objects
    Elf64,
}

impl ElfClass {
    fn from_ident(class: u8) -> Result<Self, ElfError> {
        match class {
            ELFCLASS32 => Ok(Self::Elf32),
            ELFCLASS64 => Ok(Self::Elf64),
            other => Err(ElfError::UnsupportedClass(other)),
        }
    }

    /// Size of the ELF header for this class
    pub const fn header_size(self) -> usize {
        match self {
            Self::Elf32 => 52,
            Self::Elf64 => 64,
        }
    }

    /// Size of one program header for this class
    pub const fn program_header_size(self) -> usize {
        match self {
            Self::Elf32 => 32,
            Self::Elf64 => 56,
        }
    }

    /// Pointer width in bits
    pub const fn bits(self) -> u32 {
        match self {
            Self::Elf32 => 32,
            Self::Elf64 => 64,
        }
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// ELF Header, normalized to 64-bit fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    /// File class
    pub class: ElfClass,
    /// Magic number and identification
    pub e_ident: [u8; EI_NIDENT],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point address
    pub e_entry: u64,
    /// Program header offset
    pub e_phoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Number of program headers
    pub e_phnum: u16,
}

impl ElfHeader {
    /// Parse the ELF header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < EI_NIDENT {
            return Err(ElfError::BufferTooSmall);
        }

        // Check magic
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }

        let class = ElfClass::from_ident(data[4])?;

        // Check endianness (little)
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian(data[5]));
        }

        // Check version
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion(data[6]));
        }

        if data.len() < class.header_size() {
            return Err(ElfError::BufferTooSmall);
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[0..EI_NIDENT]);

        let e_type = read_u16(data, 16);
        if e_type != ET_EXEC {
            return Err(ElfError::UnsupportedType(e_type));
        }

        let header = match class {
            ElfClass::Elf32 => Self {
                class,
                e_ident,
                e_type,
                e_machine: read_u16(data, 18),
                e_version: read_u32(data, 20),
                e_entry: u64::from(read_u32(data, 24)),
                e_phoff: u64::from(read_u32(data, 28)),
                e_flags: read_u32(data, 36),
                e_ehsize: read_u16(data, 40),
                e_phentsize: read_u16(data, 42),
                e_phnum: read_u16(data, 44),
            },
            ElfClass::Elf64 => Self {
                class,
                e_ident,
                e_type,
                e_machine: read_u16(data, 18),
                e_version: read_u32(data, 20),
                e_entry: read_u64(data, 24),
                e_phoff: read_u64(data, 32),
                e_flags: read_u32(data, 48),
                e_ehsize: read_u16(data, 52),
                e_phentsize: read_u16(data, 54),
                e_phnum: read_u16(data, 56),
            },
        };

        Ok(header)
    }

    /// Get entry point
    pub fn entry_point(&self) -> VirtAddr {
        VirtAddr::new(self.e_entry)
    }

    /// Can this image execute natively on the host?
    pub fn ensure_runnable(&self) -> Result<(), ElfError> {
        if self.class.bits() != HOST_POINTER_WIDTH {
            return Err(ElfError::ClassMismatch {
                bits: self.class.bits(),
                host_bits: HOST_POINTER_WIDTH,
            });
        }
        if !HOST_LITTLE_ENDIAN || self.e_machine != HOST_ELF_MACHINE {
            return Err(ElfError::UnsupportedMachine {
                found: self.e_machine,
                host: HOST_ARCH_NAME,
            });
        }
        Ok(())
    }
}

bitflags! {
    /// Segment permission flags (`p_flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegmentFlags: u32 {
        /// Execute
        const EXECUTE = 1;
        /// Write
        const WRITE = 2;
        /// Read
        const READ = 4;
    }
}

/// Program header (segment descriptor), normalized to 64-bit fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: SegmentFlags,
    /// Offset in file
    pub p_offset: u64,
    /// Virtual address
    pub p_vaddr: u64,
    /// Physical address
    pub p_paddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory
    pub p_memsz: u64,
    /// Alignment
    pub p_align: u64,
}

impl ProgramHeader {
    /// Parse one program header of `class` at `offset`
    pub fn parse(data: &[u8], offset: usize, class: ElfClass) -> Result<Self, ElfError> {
        let end = offset
            .checked_add(class.program_header_size())
            .ok_or(ElfError::TableOutOfBounds)?;
        let d = data.get(offset..end).ok_or(ElfError::TableOutOfBounds)?;

        let header = match class {
            ElfClass::Elf32 => Self {
                p_type: read_u32(d, 0),
                p_offset: u64::from(read_u32(d, 4)),
                p_vaddr: u64::from(read_u32(d, 8)),
                p_paddr: u64::from(read_u32(d, 12)),
                p_filesz: u64::from(read_u32(d, 16)),
                p_memsz: u64::from(read_u32(d, 20)),
                p_flags: SegmentFlags::from_bits_retain(read_u32(d, 24)),
                p_align: u64::from(read_u32(d, 28)),
            },
            ElfClass::Elf64 => Self {
                p_type: read_u32(d, 0),
                p_flags: SegmentFlags::from_bits_retain(read_u32(d, 4)),
                p_offset: read_u64(d, 8),
                p_vaddr: read_u64(d, 16),
                p_paddr: read_u64(d, 24),
                p_filesz: read_u64(d, 32),
                p_memsz: read_u64(d, 40),
                p_align: read_u64(d, 48),
            },
        };

        Ok(header)
    }

    /// Check if segment is loadable
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// First address of the segment
    pub fn start(&self) -> VirtAddr {
        VirtAddr::new(self.p_vaddr)
    }

    /// One past the last in-memory byte
    pub fn end(&self) -> VirtAddr {
        VirtAddr::new(self.p_vaddr.saturating_add(self.p_memsz))
    }

    /// One past the last file-backed byte
    pub fn file_end(&self) -> VirtAddr {
        VirtAddr::new(self.p_vaddr.saturating_add(self.p_filesz))
    }

    /// Does `[p_vaddr, p_vaddr + p_memsz)` contain `addr`?
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.start() && addr < self.end()
    }

    /// Get segment permissions as a string
    pub fn permissions_string(&self) -> &'static str {
        let r = self.p_flags.contains(SegmentFlags::READ);
        let w = self.p_flags.contains(SegmentFlags::WRITE);
        let x = self.p_flags.contains(SegmentFlags::EXECUTE);
        match (r, w, x) {
            (true, true, true) => "rwx",
            (true, true, false) => "rw-",
            (true, false, true) => "r-x",
            (true, false, false) => "r--",
            (false, true, true) => "-wx",
            (false, true, false) => "-w-",
            (false, false, true) => "--x",
            (false, false, false) => "---",
        }
    }

    fn validate(&self, index: usize, file_len: usize) -> Result<(), ElfError> {
        if self.p_memsz < self.p_filesz {
            return Err(ElfError::SegmentSizeMismatch { index });
        }
        if self.p_vaddr.checked_add(self.p_memsz).is_none() {
            return Err(ElfError::SegmentOverflow { index });
        }
        match self.p_offset.checked_add(self.p_filesz) {
            Some(end) if end <= file_len as u64 => Ok(()),
            _ => Err(ElfError::SegmentOutOfBounds { index }),
        }
    }
}

/// Header plus segment table of a parsed executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    /// ELF header
    pub header: ElfHeader,
    /// Program headers, in table order
    pub program_headers: Vec<ProgramHeader>,
}

impl ElfImage {
    /// Parse header and program header table from `data`
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        let header = ElfHeader::parse(data)?;
        let class = header.class;
        let count = usize::from(header.e_phnum);

        if count > 0 && usize::from(header.e_phentsize) < class.program_header_size() {
            return Err(ElfError::InvalidEntrySize(header.e_phentsize));
        }

        let table_start = usize::try_from(header.e_phoff).map_err(|_| ElfError::TableOutOfBounds)?;
        let table_len = count * usize::from(header.e_phentsize);
        match table_start.checked_add(table_len) {
            Some(end) if end <= data.len() => {}
            _ => return Err(ElfError::TableOutOfBounds),
        }

        let mut program_headers = Vec::with_capacity(count);
        for index in 0..count {
            let offset = table_start + index * usize::from(header.e_phentsize);
            let ph = ProgramHeader::parse(data, offset, class)?;
            if ph.is_loadable() {
                ph.validate(index, data.len())?;
                log::debug!(
                    "segment {}: vaddr {:#x} filesz {:#x} memsz {:#x} offset {:#x} {}",
                    index,
                    ph.p_vaddr,
                    ph.p_filesz,
                    ph.p_memsz,
                    ph.p_offset,
                    ph.permissions_string()
                );
            }
            program_headers.push(ph);
        }

        log::debug!(
            "parsed {:?} executable: entry {:#x}, {} program headers",
            class,
            header.e_entry,
            count
        );

        Ok(Self {
            header,
            program_headers,
        })
    }

    /// Iterate over loadable segments with their table index
    pub fn loadable(&self) -> impl Iterator<Item = (usize, &ProgramHeader)> + '_ {
        self.program_headers
            .iter()
            .enumerate()
            .filter(|(_, ph)| ph.is_loadable())
    }

    /// First loadable segment containing `addr`
    pub fn segment_for(&self, addr: VirtAddr) -> Option<&ProgramHeader> {
        self.program_headers
            .iter()
            .find(|ph| ph.is_loadable() && ph.contains(addr))
    }
}
