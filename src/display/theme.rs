//! Terminal styling shared by the CLI and the eval reporter.

use console::Style;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::sync::LazyLock;

/// Global theme instance.
pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::default);

#[derive(Debug, Clone)]
pub struct Theme {
    /// Thresholds met, tests passed
    pub pass: Style,
    /// Thresholds missed, tests failed
    pub fail: Style,
    pub warning: Style,
    pub header: Style,
    /// Metric values
    pub number: Style,
    pub dim: Style,
    pub path: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            pass: Style::new().green().bright(),
            fail: Style::new().red().bright(),
            warning: Style::new().yellow().bright(),
            header: Style::new().cyan().bold(),
            number: Style::new().cyan(),
            dim: Style::new().dim(),
            path: Style::new().magenta(),
        }
    }
}

impl Theme {
    pub fn pass_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("✓ {text}")
        } else {
            format!("{} {}", "✓".green(), self.pass.apply_to(text))
        }
    }

    pub fn fail_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("✗ {text}")
        } else {
            format!("{} {}", "✗".red(), self.fail.apply_to(text))
        }
    }

    pub fn warning_with_icon(&self, text: &str) -> String {
        if Self::should_disable_colors() {
            format!("⚠ {text}")
        } else {
            format!("{} {}", "⚠".yellow(), self.warning.apply_to(text))
        }
    }

    /// Pass or fail line depending on `ok`.
    pub fn verdict(&self, ok: bool, text: &str) -> String {
        if ok {
            self.pass_with_icon(text)
        } else {
            self.fail_with_icon(text)
        }
    }

    /// `NO_COLOR` set or stdout redirected.
    pub fn should_disable_colors() -> bool {
        std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal()
    }

    pub fn apply<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if Self::should_disable_colors() {
            text.to_string()
        } else {
            style.apply_to(text).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_contains_text() {
        let theme = Theme::default();
        assert!(theme.verdict(true, "3/3 passed").contains("3/3 passed"));
        assert!(theme.verdict(false, "1/3 passed").contains("1/3 passed"));
    }
}
