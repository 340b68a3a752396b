//! Aggregation of classified accesses into display rows.
//!
//! One streaming pass applies every view option at once: duplicate
//! suppression, grouping (raw, overview or collapse), delay-gap detection and
//! timestamp normalization. Gaps are measured on raw timestamps between
//! consecutive records, whether or not the earlier one is suppressed, so
//! neither suppression nor normalization changes where delays fall.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::config::{TraceConfig, ViewOptions};
use crate::correlate;
use crate::layout::LayoutIndex;
use crate::model::{AccessGroup, AccessRecord, ClassifiedAccess, DelayMarker, EntryId, TraceRow};

/// How consecutive accesses are merged into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingMode {
    /// One group per access.
    Raw,
    /// Merge runs sharing type, info tag and firmware entry.
    Overview,
    /// Merge runs sharing the type tag only; inexact merges are flagged.
    Collapse,
}

impl GroupingMode {
    /// Collapse wins over overview, being the coarser of the two.
    pub fn from_options(options: &ViewOptions) -> Self {
        if options.collapse {
            GroupingMode::Collapse
        } else if options.overview {
            GroupingMode::Overview
        } else {
            GroupingMode::Raw
        }
    }
}

/// State of the group currently being extended.
#[derive(Debug)]
struct OpenGroup {
    /// Position of the group in `rows`.
    row: usize,
    entry: Option<EntryId>,
    /// End address of the most recent member.
    last_end: u64,
}

/// Streaming aggregator; push accesses in capture order, then `finish`.
#[derive(Debug)]
pub struct Aggregator {
    mode: GroupingMode,
    suppress_duplicates: bool,
    normalize: bool,
    delay_threshold_us: f64,
    holder_window_s: f64,
    rows: Vec<TraceRow>,
    open: Option<OpenGroup>,
    /// Raw end time of the record pushed last, suppressed or not.
    prev_end: Option<f64>,
    /// Largest idle gap in front of suppressed duplicates since the last survivor.
    pending_delay: Option<f64>,
    /// Raw start time of the first surviving access.
    origin: Option<f64>,
    /// Row holding each recent original, for folding suppressed duplicates.
    holders: HashMap<u64, usize>,
    holder_order: VecDeque<(u64, f64)>,
    dropped_duplicates: u64,
}

impl Aggregator {
    pub fn new(options: &ViewOptions, config: &TraceConfig) -> Self {
        Self {
            mode: GroupingMode::from_options(options),
            suppress_duplicates: options.no_duplicates,
            normalize: options.normalize_timestamps,
            delay_threshold_us: config.delay_threshold_us,
            holder_window_s: config.duplicate_window_us / 1e6,
            rows: Vec::new(),
            open: None,
            prev_end: None,
            pending_delay: None,
            origin: None,
            holders: HashMap::new(),
            holder_order: VecDeque::new(),
            dropped_duplicates: 0,
        }
    }

    pub fn mode(&self) -> GroupingMode {
        self.mode
    }

    pub fn push(&mut self, access: &ClassifiedAccess<'_>) {
        let record = access.record;
        let gap_s = self.prev_end.map(|end| record.timestamp - end);
        let delay_us = gap_s.map(|gap| gap * 1e6).filter(|gap| *gap > self.delay_threshold_us);
        self.prev_end = Some(record.end_timestamp);

        if self.suppress_duplicates {
            if let Some(original) = access.duplicate_of {
                self.fold_duplicate(original);
                // Idle time before a hidden duplicate is reported before the next survivor.
                if let Some(delay) = delay_us {
                    self.pending_delay = Some(self.pending_delay.map_or(delay, |held| held.max(delay)));
                }
                return;
            }
        }

        let delay_us = match (delay_us, self.pending_delay.take()) {
            (Some(own), Some(held)) => Some(own.max(held)),
            (own, held) => own.or(held),
        };
        let origin = *self.origin.get_or_insert(record.timestamp);

        let joined = delay_us.is_none() && self.try_join(access);
        if !joined {
            if let Some(microseconds) = delay_us {
                self.rows.push(TraceRow::Delay(DelayMarker { microseconds }));
            }
            self.open_group(access, gap_s, delay_us, origin);
        }

        if self.suppress_duplicates {
            if let Some(open) = &self.open {
                self.remember_holder(record, open.row);
            }
        }
    }

    pub fn finish(self) -> Vec<TraceRow> {
        if self.dropped_duplicates > 0 {
            debug!(
                dropped = self.dropped_duplicates,
                "suppressed duplicates whose original was no longer tracked"
            );
        }
        self.rows
    }

    fn try_join(&mut self, access: &ClassifiedAccess<'_>) -> bool {
        let Some(open) = self.open.as_mut() else { return false };
        let Some(TraceRow::Group(group)) = self.rows.get_mut(open.row) else { return false };
        let entry = access.primary().map(|entry| entry.id);
        let record = access.record;

        let fuzzy = match self.mode {
            GroupingMode::Raw => return false,
            GroupingMode::Overview => {
                if group.type_tag != access.type_tag()
                    || group.info_tag.as_deref() != access.info_tag()
                    || open.entry != entry
                {
                    return false;
                }
                false
            }
            GroupingMode::Collapse => {
                if group.type_tag != access.type_tag() {
                    return false;
                }
                u64::from(record.address) > open.last_end
                    || group.info_tag.as_deref() != access.info_tag()
                    || open.entry != entry
            }
        };

        let high = group.highest_address().max(record.end_address());
        group.lowest_address = group.lowest_address.min(record.address);
        group.address_range_size = high - u64::from(group.lowest_address);
        group.member_count += 1;
        if let Some(multiplicity) = group.multiplicity.as_mut() {
            *multiplicity += 1;
        }
        group.is_fuzzy_collapse |= fuzzy;
        group.end_timestamp = display_time(record.end_timestamp, self.normalize, self.origin);
        for tag in &access.tags {
            if !group.tags.iter().any(|known| known == tag) {
                group.tags.push((*tag).to_string());
            }
        }
        open.last_end = record.end_address();
        true
    }

    fn open_group(
        &mut self,
        access: &ClassifiedAccess<'_>,
        latency: Option<f64>,
        preceding_delay: Option<f64>,
        origin: f64,
    ) {
        let record = access.record;
        let origin = self.normalize.then_some(origin);
        let group = AccessGroup {
            first_sequence_index: record.sequence_index,
            lowest_address: record.address,
            address_range_size: u64::from(record.length),
            type_tag: access.type_tag().to_string(),
            info_tag: access.info_tag().map(str::to_string),
            tags: access.tags.iter().map(|tag| (*tag).to_string()).collect(),
            is_fuzzy_collapse: false,
            member_count: 1,
            multiplicity: self.suppress_duplicates.then_some(1),
            start_timestamp: display_time(record.timestamp, self.normalize, origin),
            end_timestamp: display_time(record.end_timestamp, self.normalize, origin),
            latency,
            preceding_delay,
        };
        self.open = Some(OpenGroup {
            row: self.rows.len(),
            entry: access.primary().map(|entry| entry.id),
            last_end: record.end_address(),
        });
        self.rows.push(TraceRow::Group(group));
    }

    fn remember_holder(&mut self, record: &AccessRecord, row: usize) {
        while self
            .holder_order
            .front()
            .is_some_and(|(_, time)| record.timestamp - time > self.holder_window_s)
        {
            if let Some((seq, _)) = self.holder_order.pop_front() {
                self.holders.remove(&seq);
            }
        }
        self.holders.insert(record.sequence_index, row);
        self.holder_order.push_back((record.sequence_index, record.timestamp));
    }

    fn fold_duplicate(&mut self, original: u64) {
        let group = self
            .holders
            .get(&original)
            .and_then(|&row| self.rows.get_mut(row))
            .and_then(|row| match row {
                TraceRow::Group(group) => Some(group),
                TraceRow::Delay(_) => None,
            });
        match group {
            Some(group) => {
                if let Some(multiplicity) = group.multiplicity.as_mut() {
                    *multiplicity += 1;
                }
            }
            None => self.dropped_duplicates += 1,
        }
    }
}

fn display_time(time: f64, normalize: bool, origin: Option<f64>) -> f64 {
    match (normalize, origin) {
        (true, Some(origin)) => time - origin,
        _ => time,
    }
}

/// Aggregate `accesses` in one pass.
pub fn aggregate<'a, I>(accesses: I, options: &ViewOptions, config: &TraceConfig) -> Vec<TraceRow>
where
    I: IntoIterator<Item = ClassifiedAccess<'a>>,
{
    let mut aggregator = Aggregator::new(options, config);
    for access in accesses {
        aggregator.push(&access);
    }
    aggregator.finish()
}

/// Classify and aggregate `records` against `index` in one streaming pass.
pub fn trace<'a>(
    records: &'a [AccessRecord],
    index: &'a LayoutIndex,
    options: &ViewOptions,
    config: &TraceConfig,
) -> Vec<TraceRow> {
    aggregate(correlate::classify(records, index, config), options, config)
}
