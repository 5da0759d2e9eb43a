//! # Fault Journal
//!
//! Fixed-capacity event record filled by the fault handler and drained into
//! the logger once the loaded image has returned. Recording never allocates
//! and never locks, so it is usable from signal context; the slots are
//! allocated up front when the journal is created.

use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use lazyload_hal::VirtAddr;

const KIND_FAULT: u8 = 1;
const KIND_FRAGMENTATION: u8 = 2;

/// One recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    /// A fault resolved to a loadable segment
    Fault {
        /// Faulting address
        address: VirtAddr,
    },
    /// A segment's final page was materialized with unused tail bytes
    Fragmentation {
        /// Cumulative fragmentation after this page, in bytes
        cumulative: u64,
    },
}

impl JournalEvent {
    fn encode(self) -> (u8, u64) {
        match self {
            Self::Fault { address } => (KIND_FAULT, address.as_u64()),
            Self::Fragmentation { cumulative } => (KIND_FRAGMENTATION, cumulative),
        }
    }

    fn decode(kind: u8, value: u64) -> Option<Self> {
        match kind {
            KIND_FAULT => Some(Self::Fault {
                address: VirtAddr::new(value),
            }),
            KIND_FRAGMENTATION => Some(Self::Fragmentation { cumulative: value }),
            _ => None,
        }
    }

    /// Emit this event through the logger
    pub fn log(&self) {
        match self {
            Self::Fault { address } => log::info!("Page fault at address {address}"),
            Self::Fragmentation { cumulative } => log::info!(
                "Internal fragmentation calculated for last page: {} KB",
                cumulative / 1024
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    kind: AtomicU8,
    value: AtomicU64,
}

/// Single-writer event journal
#[derive(Debug)]
pub struct FaultJournal {
    slots: Box<[Slot]>,
    len: AtomicUsize,
    dropped: AtomicU64,
}

impl FaultJournal {
    /// Create a journal holding up to `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Maximum number of retained events
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Is the journal empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events that did not fit
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append an event. Signal-safe.
    pub fn record(&self, event: JournalEvent) {
        let index = self.len.load(Ordering::Relaxed);
        let Some(slot) = self.slots.get(index) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let (kind, value) = event.encode();
        slot.value.store(value, Ordering::Relaxed);
        slot.kind.store(kind, Ordering::Relaxed);
        self.len.store(index + 1, Ordering::Release);
    }

    /// Snapshot of the retained events, oldest first
    pub fn events(&self) -> Vec<JournalEvent> {
        self.slots[..self.len()]
            .iter()
            .filter_map(|slot| {
                JournalEvent::decode(
                    slot.kind.load(Ordering::Relaxed),
                    slot.value.load(Ordering::Relaxed),
                )
            })
            .collect()
    }

    /// Log every retained event, then forget them
    pub fn drain_to_log(&self) {
        for event in self.events() {
            event.log();
        }
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("fault journal full: {dropped} events not recorded");
        }
        self.len.store(0, Ordering::Release);
    }
}
