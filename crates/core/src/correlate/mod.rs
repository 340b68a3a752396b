//! Classification of access records against the firmware layout.
//!
//! Every record is looked up in the [`LayoutIndex`], tagged, and checked for
//! being a duplicate of a recent access through a redundant hardware path.
//! Classification never drops or reorders records.

use std::collections::VecDeque;

use tracing::trace;

use crate::capture::instructions;
use crate::config::TraceConfig;
use crate::layout::LayoutIndex;
use crate::model::{AccessRecord, ClassifiedAccess, Direction, EntryId};

/// Tag for accesses made with a quad I/O read instruction.
pub const TAG_QSPI: &str = "QSPI";
/// Tag for reads matching the crypto co-processor fetch size.
pub const TAG_CCP: &str = "CCP";
/// Tag for write accesses.
pub const TAG_WRITE: &str = "write";

/// Stateful classifier; feed records in capture order.
#[derive(Debug)]
pub struct Correlator<'a> {
    index: &'a LayoutIndex,
    ccp_read_size: Option<u32>,
    duplicates: DuplicateDetector,
}

impl<'a> Correlator<'a> {
    pub fn new(index: &'a LayoutIndex, config: &TraceConfig) -> Self {
        Self {
            index,
            ccp_read_size: config.ccp_read_size,
            duplicates: DuplicateDetector::new(config),
        }
    }

    /// Classify the next record.
    pub fn classify<'r>(&mut self, record: &'r AccessRecord) -> ClassifiedAccess<'r>
    where
        'a: 'r,
    {
        let entries = self.index.query(record.address);
        let mut access =
            ClassifiedAccess { record, entries, duplicate_of: None, tags: self.tags(record) };
        access.duplicate_of = self.duplicates.check(&access);
        if let Some(original) = access.duplicate_of {
            trace!(seq = record.sequence_index, original, "duplicate access");
        }
        access
    }

    fn tags(&self, record: &AccessRecord) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if instructions::is_quad_read(record.opcode) {
            tags.push(TAG_QSPI);
        }
        match record.direction {
            Direction::Read if self.ccp_read_size == Some(record.length) => tags.push(TAG_CCP),
            Direction::Write => tags.push(TAG_WRITE),
            Direction::Read => {}
        }
        tags
    }
}

/// Classify `records` lazily, preserving their order.
pub fn classify<'a, I>(records: I, index: &'a LayoutIndex, config: &TraceConfig) -> Classify<'a, I::IntoIter>
where
    I: IntoIterator<Item = &'a AccessRecord>,
{
    Classify { records: records.into_iter(), correlator: Correlator::new(index, config) }
}

/// Iterator returned by [`classify`].
#[derive(Debug)]
pub struct Classify<'a, I> {
    records: I,
    correlator: Correlator<'a>,
}

impl<'a, I> Iterator for Classify<'a, I>
where
    I: Iterator<Item = &'a AccessRecord>,
{
    type Item = ClassifiedAccess<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(self.correlator.classify(record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

/// What makes two accesses equivalent: same direction and type, same offset
/// inside their entry (or the same absolute address in the Unknown area).
#[derive(Debug, Clone, PartialEq, Eq)]
struct DuplicateKey {
    direction: Direction,
    type_tag: String,
    offset: u64,
}

impl DuplicateKey {
    fn of(access: &ClassifiedAccess<'_>) -> Self {
        let address = u64::from(access.record.address);
        let offset = match access.primary() {
            Some(entry) => address - u64::from(entry.start),
            None => address,
        };
        Self { direction: access.record.direction, type_tag: access.type_tag().to_string(), offset }
    }
}

#[derive(Debug)]
struct Original {
    sequence_index: u64,
    timestamp: f64,
    key: DuplicateKey,
    entry: Option<EntryId>,
    source_id: Option<u32>,
    copies: u32,
}

/// Remembers recent original accesses and matches later equivalents to them.
#[derive(Debug)]
struct DuplicateDetector {
    window_s: f64,
    max_copies: u32,
    history_len: usize,
    history: VecDeque<Original>,
}

impl DuplicateDetector {
    fn new(config: &TraceConfig) -> Self {
        Self {
            window_s: config.duplicate_window_us / 1e6,
            max_copies: config.max_duplicate_multiplicity.max(1),
            history_len: config.duplicate_history.max(1),
            history: VecDeque::new(),
        }
    }

    /// Sequence index of the original `access` duplicates, registering it as a
    /// new original otherwise.
    fn check(&mut self, access: &ClassifiedAccess<'_>) -> Option<u64> {
        let now = access.record.timestamp;
        while self.history.front().is_some_and(|orig| now - orig.timestamp > self.window_s) {
            self.history.pop_front();
        }

        let key = DuplicateKey::of(access);
        let primary = access.primary();
        let entry = primary.map(|entry| entry.id);
        let source_id = primary.and_then(|entry| entry.source_id);

        let matched = self.history.iter_mut().rev().find(|orig| {
            orig.key == key && (orig.entry == entry || orig.source_id != source_id)
        });
        if let Some(orig) = matched {
            if orig.copies < self.max_copies {
                orig.copies += 1;
                return Some(orig.sequence_index);
            }
        }

        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(Original {
            sequence_index: access.record.sequence_index,
            timestamp: now,
            key,
            entry,
            source_id,
            copies: 1,
        });
        None
    }
}
