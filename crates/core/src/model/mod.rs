//! Core data model for captured bus transactions, firmware entries, and the
//! rows produced by aggregation.
//!
//! Records and classified accesses are created once per run and never mutated
//! afterwards; every later stage consumes them by reference.

use serde::{Deserialize, Serialize};

/// Type tag used for any address not claimed by a firmware entry.
pub const UNKNOWN_AREA: &str = "Unknown area";

/// Direction of a flash transaction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
}

/// One decoded bus transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// 0-based position in capture order.
    pub sequence_index: u64,
    /// Capture-relative start time in seconds.
    pub timestamp: f64,
    /// Time of the last byte belonging to this transaction, in seconds.
    pub end_timestamp: f64,
    /// Offset into the flash address space.
    pub address: u32,
    /// Number of data bytes transferred.
    pub length: u32,
    pub direction: Direction,
    /// Flash instruction opcode that started the transaction.
    pub opcode: u8,
    /// Data bytes when visible in the export; empty otherwise.
    #[serde(with = "serde_bytes_compat")]
    pub raw_payload: Vec<u8>,
}

impl AccessRecord {
    /// Transfer duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end_timestamp - self.timestamp
    }

    /// First address past the transferred bytes.
    pub fn end_address(&self) -> u64 {
        u64::from(self.address) + u64::from(self.length)
    }
}

/// Encode payloads as a MessagePack binary blob instead of an array of integers.
mod serde_bytes_compat {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a byte buffer")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// A named, typed, address-ranged structure inside the flash image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    pub start: u32,
    pub size: u32,
    /// Logical kind, e.g. `Directory: $PSP` or `PSP_FW_BOOT_LOADER`.
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_tag: Option<String>,
    /// Redundant copy (ROM half, die) this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
}

impl FirmwareEntry {
    pub fn new(start: u32, size: u32, type_tag: impl Into<String>) -> Self {
        Self { start, size, type_tag: type_tag.into(), info_tag: None, source_id: None }
    }

    /// Builder-style helper to attach an info tag.
    pub fn with_info(mut self, info_tag: impl Into<String>) -> Self {
        self.info_tag = Some(info_tag.into());
        self
    }

    /// Builder-style helper to attach a source id.
    pub fn with_source(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Exclusive end of the range, widened so entries touching 4 GiB do not wrap.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.size)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && u64::from(address) < self.end()
    }
}

/// Stable position of an entry inside a [`crate::layout::LayoutIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u32);

/// Borrowed view of an indexed entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryRef<'a> {
    pub id: EntryId,
    pub entry: &'a FirmwareEntry,
}

impl std::ops::Deref for EntryRef<'_> {
    type Target = FirmwareEntry;

    fn deref(&self) -> &Self::Target {
        self.entry
    }
}

/// An access record together with its classification.
#[derive(Debug, Clone)]
pub struct ClassifiedAccess<'a> {
    pub record: &'a AccessRecord,
    /// Every entry containing the address, most specific first. Empty means
    /// the access hit the Unknown area.
    pub entries: Vec<EntryRef<'a>>,
    /// Sequence index of the original access this one duplicates.
    pub duplicate_of: Option<u64>,
    pub tags: Vec<&'static str>,
}

impl<'a> ClassifiedAccess<'a> {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// Entry used for grouping and duplicate detection.
    pub fn primary(&self) -> Option<EntryRef<'a>> {
        self.entries.first().copied()
    }

    pub fn type_tag(&self) -> &'a str {
        match self.primary_entry() {
            Some(entry) => entry.type_tag.as_str(),
            None => UNKNOWN_AREA,
        }
    }

    pub fn info_tag(&self) -> Option<&'a str> {
        self.primary_entry().and_then(|entry| entry.info_tag.as_deref())
    }

    fn primary_entry(&self) -> Option<&'a FirmwareEntry> {
        self.entries.first().map(|entry| entry.entry)
    }
}

/// Contiguous run of classified accesses sharing a grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessGroup {
    pub first_sequence_index: u64,
    pub lowest_address: u32,
    /// Highest access end minus `lowest_address`.
    pub address_range_size: u64,
    pub type_tag: String,
    pub info_tag: Option<String>,
    /// Tags collected from the members, in first-seen order.
    pub tags: Vec<String>,
    /// Set when a collapse merged accesses that were not an exact continuation.
    pub is_fuzzy_collapse: bool,
    pub member_count: usize,
    /// Members plus suppressed duplicates; only present when suppression ran.
    pub multiplicity: Option<u32>,
    /// Display start time in seconds (normalized when requested).
    pub start_timestamp: f64,
    /// Display end time in seconds (normalized when requested).
    pub end_timestamp: f64,
    /// Seconds since the previous group ended, measured on raw timestamps.
    pub latency: Option<f64>,
    /// Idle microseconds before this group, when above the delay threshold.
    pub preceding_delay: Option<f64>,
}

impl AccessGroup {
    /// First address past the highest access in the group.
    pub fn highest_address(&self) -> u64 {
        u64::from(self.lowest_address) + self.address_range_size
    }
}

/// Synthetic gap notation between two groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelayMarker {
    pub microseconds: f64,
}

/// One element of the final display sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TraceRow {
    Delay(DelayMarker),
    Group(AccessGroup),
}

impl TraceRow {
    pub fn as_group(&self) -> Option<&AccessGroup> {
        match self {
            TraceRow::Group(group) => Some(group),
            TraceRow::Delay(_) => None,
        }
    }
}
