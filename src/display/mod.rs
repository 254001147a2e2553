//! Styled terminal output: tables, progress bars and themed status lines.

pub mod help;
pub mod progress;
pub mod tables;
pub mod theme;

pub use help::{create_help_text, format_command_description, format_help_section};
pub use progress::{create_progress_bar, create_spinner, with_spinner};
pub use tables::{TableBuilder, create_key_value_table, metric_row, progress_bar};
pub use theme::{THEME, Theme};
