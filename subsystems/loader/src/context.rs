//! # Loader Context
//!
//! Owns everything a single load needs: the image buffer and its file
//! handle, the parsed segment table, the page mapper, the counters and the
//! fault journal. The fault handler reads it through a shared reference, so
//! nothing here is mutated after construction except through atomics.

use std::path::Path;

use lazyload_hal::{HostMmu, PageMapper, VirtAddr};

use crate::config::{LoaderConfig, MAX_JOURNAL_CAPACITY};
use crate::elf::{ElfImage, ProgramHeader};
use crate::image::Image;
use crate::journal::FaultJournal;
use crate::metrics::LoadMetrics;
use crate::LoadResult;

/// State of one load, from parse to teardown
pub struct LoaderContext {
    image: Image,
    elf: ElfImage,
    mapper: Box<dyn PageMapper>,
    page_size: usize,
    metrics: LoadMetrics,
    journal: FaultJournal,
    config: LoaderConfig,
}

impl core::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("path", &self.image.path())
            .field("entry", &self.elf.header.entry_point())
            .field("segments", &self.elf.program_headers.len())
            .field("page_size", &self.page_size)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl LoaderContext {
    /// Parse `image` and bind it to `mapper`
    pub fn new(
        image: Image,
        mapper: Box<dyn PageMapper>,
        config: LoaderConfig,
    ) -> LoadResult<Self> {
        config.validate()?;
        let elf = ElfImage::parse(image.bytes())?;
        let page_size = mapper.page_size();
        let journal_capacity = journal_capacity_for(&elf, page_size, config.journal_capacity);

        log::debug!(
            "{}: {} loadable segments, page size {:#x}, journal {}",
            image.path().display(),
            elf.loadable().count(),
            page_size,
            journal_capacity
        );

        Ok(Self {
            image,
            elf,
            mapper,
            page_size,
            metrics: LoadMetrics::new(),
            journal: FaultJournal::with_capacity(journal_capacity),
            config,
        })
    }

    /// Read the executable at `path` and prepare it for the host
    pub fn open(path: impl AsRef<Path>, config: LoaderConfig) -> LoadResult<Self> {
        config.validate()?;
        let mapper = HostMmu::new()?;
        let image = Image::read(path)?;
        Self::new(image, Box::new(mapper), config)
    }

    /// The image buffer
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Parsed header and segment table
    pub fn elf(&self) -> &ElfImage {
        &self.elf
    }

    /// Mapper used to materialize pages
    pub fn mapper(&self) -> &dyn PageMapper {
        self.mapper.as_ref()
    }

    /// Page granularity in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Counters
    pub fn metrics(&self) -> &LoadMetrics {
        &self.metrics
    }

    /// Fault journal
    pub fn journal(&self) -> &FaultJournal {
        &self.journal
    }

    /// Configuration this context was built with
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// First loadable segment containing `addr`
    pub fn segment_for(&self, addr: VirtAddr) -> Option<&ProgramHeader> {
        self.elf.segment_for(addr)
    }

    /// Release the image and close its file
    pub fn teardown(self) {
        drop(self);
    }
}

/// Pages covered by `ph`
fn pages_spanned(ph: &ProgramHeader, page: u64) -> u64 {
    if ph.p_memsz == 0 {
        return 0;
    }
    let last = ph.p_vaddr + (ph.p_memsz - 1);
    last / page - ph.p_vaddr / page + 1
}

/// Room for one fault per page plus one fragmentation record per segment,
/// never less than `minimum` and never more than [`MAX_JOURNAL_CAPACITY`]
fn journal_capacity_for(elf: &ElfImage, page_size: usize, minimum: usize) -> usize {
    let page = page_size as u64;
    let needed = elf
        .loadable()
        .map(|(_, ph)| pages_spanned(ph, page).saturating_add(1))
        .fold(0u64, u64::saturating_add);
    usize::try_from(needed)
        .unwrap_or(MAX_JOURNAL_CAPACITY)
        .min(MAX_JOURNAL_CAPACITY)
        .max(minimum)
}

impl Drop for LoaderContext {
    fn drop(&mut self) {
        self.image.close();
        log::debug!("loader context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ElfBuilder, RecordingMapper, SegmentSpec};
    use crate::LoadError;
    use std::io::Write;

    #[test]
    fn test_new_parses_segments() {
        let bytes = ElfBuilder::elf64()
            .entry(0x40_0000)
            .segment(SegmentSpec::load(0x40_0000, 4096))
            .segment(SegmentSpec::load(0x40_1000, 6000))
            .build();
        let ctx = LoaderContext::new(
            Image::from_bytes(bytes),
            Box::new(RecordingMapper::new(4096)),
            LoaderConfig::default(),
        )
        .unwrap();

        assert_eq!(ctx.page_size(), 4096);
        assert_eq!(ctx.elf().loadable().count(), 2);
        assert_eq!(ctx.journal().capacity(), 1024);
        assert_eq!(
            ctx.segment_for(VirtAddr::new(0x40_1000 + 5999)).map(|s| s.p_memsz),
            Some(6000)
        );
        assert!(ctx.segment_for(VirtAddr::new(0x40_1000 + 6000)).is_none());
    }

    #[test]
    fn test_journal_holds_every_page_of_the_image() {
        let config = LoaderConfig {
            journal_capacity: 2,
            ..LoaderConfig::default()
        };
        let bytes = ElfBuilder::elf64()
            .segment(SegmentSpec::load(0x40_0000, 8 * 4096 + 1))
            .segment(SegmentSpec::note())
            .segment(SegmentSpec::load(0x50_0800, 0x1000))
            .build();
        let ctx = LoaderContext::new(
            Image::from_bytes(bytes),
            Box::new(RecordingMapper::new(4096)),
            config,
        )
        .unwrap();

        // 9 + 2 pages, one fragmentation record per segment
        assert_eq!(ctx.journal().capacity(), 13);
        for page in 0..9u64 {
            crate::fault::resolve_fault(&ctx, VirtAddr::new(0x40_0000 + page * 4096)).unwrap();
        }
        crate::fault::resolve_fault(&ctx, VirtAddr::new(0x50_0800)).unwrap();
        crate::fault::resolve_fault(&ctx, VirtAddr::new(0x50_1000)).unwrap();
        assert_eq!(ctx.journal().dropped(), 0);
        assert_eq!(ctx.metrics().faults(), 11);
    }

    #[test]
    fn test_rejects_shared_object() {
        let bytes = ElfBuilder::elf64()
            .file_type(crate::elf::ET_DYN)
            .segment(SegmentSpec::load(0x1000, 0x1000))
            .build();
        let mapper = std::sync::Arc::new(RecordingMapper::new(4096));
        let result = LoaderContext::new(
            Image::from_bytes(bytes),
            Box::new(mapper.clone()),
            LoaderConfig::default(),
        );
        assert!(matches!(
            result,
            Err(LoadError::Elf(crate::elf::ElfError::UnsupportedType(3)))
        ));
        assert!(mapper.bases().is_empty());
    }

    #[test]
    fn test_open_reads_file_and_closes_on_teardown() {
        let bytes = ElfBuilder::elf64()
            .segment(SegmentSpec::load(0x40_0000, 4096).data(vec![0xC3]))
            .build();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let ctx = LoaderContext::open(file.path(), LoaderConfig::default()).unwrap();
        assert!(ctx.image().is_open());
        assert_eq!(ctx.image().bytes(), bytes.as_slice());
        assert_eq!(ctx.page_size(), lazyload_hal::mmu::page_size().unwrap());
        ctx.teardown();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LoaderConfig {
            journal_capacity: crate::config::MAX_JOURNAL_CAPACITY + 1,
            ..LoaderConfig::default()
        };
        let bytes = ElfBuilder::elf64().build();
        let result = LoaderContext::new(
            Image::from_bytes(bytes),
            Box::new(RecordingMapper::new(4096)),
            config,
        );
        assert!(matches!(result, Err(LoadError::Config(_))));
    }
}
