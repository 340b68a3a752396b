//! ASCII table rendering of trace rows.

use psptrace_core::aggregate::GroupingMode;
use psptrace_core::config::ViewOptions;
use psptrace_core::model::{AccessGroup, DelayMarker, TraceRow};

use crate::commands::{hex_address, hex_size, nanoseconds};

/// Position of the `Type` column, which carries delay markers.
const TYPE_COLUMN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub title: &'static str,
    pub align: Align,
}

const fn left(title: &'static str) -> Column {
    Column { title, align: Align::Left }
}

const fn right(title: &'static str) -> Column {
    Column { title, align: Align::Right }
}

/// Plain text table with a boxed header.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Append a row; missing cells are left blank and extra cells dropped.
    pub fn push_row(&mut self, mut cells: Vec<String>) {
        cells.resize(self.columns.len(), String::new());
        self.rows.push(cells);
    }

    pub fn push_blank(&mut self) {
        self.push_row(Vec::new());
    }

    pub fn render(&self) -> String {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                self.rows
                    .iter()
                    .map(|row| row[idx].chars().count())
                    .chain(std::iter::once(column.title.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let border = {
            let mut line = String::from("+");
            for width in &widths {
                line.push_str(&"-".repeat(width + 2));
                line.push('+');
            }
            line.push('\n');
            line
        };

        let mut out = border.clone();
        let titles: Vec<String> = self.columns.iter().map(|c| c.title.to_string()).collect();
        out.push_str(&self.line(&titles, &widths, true));
        out.push_str(&border);
        for row in &self.rows {
            out.push_str(&self.line(row, &widths, false));
        }
        out.push_str(&border);
        out
    }

    fn line(&self, cells: &[String], widths: &[usize], header: bool) -> String {
        let mut line = String::from("|");
        for ((cell, &width), column) in cells.iter().zip(widths).zip(&self.columns) {
            let padded = match (header, column.align) {
                (true, _) | (false, Align::Left) => format!(" {cell:<width$} "),
                (false, Align::Right) => format!(" {cell:>width$} "),
            };
            line.push_str(&padded);
            line.push('|');
        }
        line.push('\n');
        line
    }
}

/// Columns of the per-access and collapsed views.
pub fn access_columns(verbose: bool) -> Vec<Column> {
    let mut columns = vec![right("No."), left("Address"), left("Size"), left("Type"), left("Info")];
    if verbose {
        columns.extend([
            right("Start [ns]"),
            right("End [ns]"),
            right("Duration [ns]"),
            right("Latency [ns]"),
        ]);
    }
    columns
}

/// Columns of the overview.
pub fn overview_columns(verbose: bool) -> Vec<Column> {
    let mut columns =
        vec![right("No."), left("Lowest access"), left("Range"), left("Type"), left("Info")];
    if verbose {
        columns.extend([right("Start [ns]"), left("Highest access")]);
    }
    columns
}

/// Info column: info tag, access tags, collapse markers and multiplicity.
pub fn info_cell(group: &AccessGroup, mode: GroupingMode) -> String {
    let mut parts: Vec<String> = group.info_tag.iter().cloned().collect();
    parts.extend(group.tags.iter().cloned());
    if mode == GroupingMode::Collapse && group.member_count > 1 {
        parts.push("[c]".to_string());
        if group.is_fuzzy_collapse {
            parts.push("~".to_string());
        }
    }
    if let Some(multiplicity) = group.multiplicity {
        parts.push(format!("x{multiplicity}"));
    }
    parts.join(" ")
}

pub fn delay_cell(marker: &DelayMarker) -> String {
    format!("~ {} µs delay ~", marker.microseconds as u64)
}

fn access_cells(group: &AccessGroup, mode: GroupingMode, verbose: bool) -> Vec<String> {
    let mut cells = vec![
        group.first_sequence_index.to_string(),
        hex_address(u64::from(group.lowest_address)),
        hex_size(group.address_range_size),
        group.type_tag.clone(),
        info_cell(group, mode),
    ];
    if verbose {
        cells.extend([
            nanoseconds(group.start_timestamp),
            nanoseconds(group.end_timestamp),
            nanoseconds(group.end_timestamp - group.start_timestamp),
            group.latency.map(nanoseconds).unwrap_or_default(),
        ]);
    }
    cells
}

fn overview_cells(group: &AccessGroup, verbose: bool) -> Vec<String> {
    let mut cells = vec![
        group.first_sequence_index.to_string(),
        hex_address(u64::from(group.lowest_address)),
        hex_address(group.address_range_size),
        group.type_tag.clone(),
        info_cell(group, GroupingMode::Overview),
    ];
    if verbose {
        cells.extend([nanoseconds(group.start_timestamp), hex_address(group.highest_address())]);
    }
    cells
}

/// Render trace rows the way the selected view lays them out.
pub fn render_trace(rows: &[TraceRow], options: &ViewOptions, verbose: bool) -> String {
    let mode = GroupingMode::from_options(options);
    let overview = mode == GroupingMode::Overview;
    let columns = if overview { overview_columns(verbose) } else { access_columns(verbose) };
    let mut table = Table::new(columns);

    for row in rows {
        match row {
            TraceRow::Delay(marker) => {
                let mut cells = vec![String::new(); TYPE_COLUMN];
                cells.push(delay_cell(marker));
                table.push_blank();
                table.push_row(cells);
                table.push_blank();
            }
            TraceRow::Group(group) if overview => table.push_row(overview_cells(group, verbose)),
            TraceRow::Group(group) => table.push_row(access_cells(group, mode, verbose)),
        }
    }
    table.render()
}
