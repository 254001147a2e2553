//! Table formatting for CLI output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

/// Builder for UTF8 tables with bold headers.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn add_cells(mut self, row: Vec<Cell>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Text bar of `width` cells filled in proportion to `value` in `[0, 1]`.
pub fn progress_bar(value: f64, width: usize) -> String {
    let filled = ((value * width as f64) as isize).clamp(0, width as isize) as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

/// One metric row: name, bar, value, and a target column when a threshold
/// applies.
pub fn metric_row(name: &str, value: f64, threshold: Option<f64>) -> Vec<Cell> {
    let (status, color) = match threshold {
        Some(t) if value >= t => ("✓", Some(Color::Green)),
        Some(_) => ("✗", Some(Color::Red)),
        None => ("", None),
    };
    let mut status = Cell::new(status);
    if let Some(color) = color {
        status = status.fg(color).add_attribute(Attribute::Bold);
    }

    vec![
        status,
        Cell::new(name),
        Cell::new(progress_bar(value, 20)),
        Cell::new(format!("{value:.3}")).set_alignment(CellAlignment::Right),
        Cell::new(threshold.map(|t| format!("{t:.2}")).unwrap_or_default())
            .set_alignment(CellAlignment::Right),
    ]
}

/// Two-column key/value table.
pub fn create_key_value_table(title: (&str, &str), rows: Vec<(String, String)>) -> String {
    rows.into_iter()
        .fold(
            TableBuilder::new().set_headers(vec![title.0, title.1]),
            |table, (key, value)| table.add_row(vec![key, value]),
        )
        .build()
}
