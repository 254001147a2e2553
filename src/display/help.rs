//! Long help text for the CLI.

use crate::display::theme::Theme;
use console::style;

/// Section title followed by indented content lines.
pub fn format_help_section(title: &str, content: &str, indent: bool) -> String {
    let mut output = String::new();

    if Theme::should_disable_colors() {
        output.push_str(&format!("{title}\n"));
    } else {
        output.push_str(&format!("{}\n", style(title).cyan().bold()));
    }

    for line in content.lines() {
        if line.trim().is_empty() {
            output.push('\n');
        } else if indent && !line.starts_with("    ") {
            output.push_str(&format!("    {line}\n"));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }

    output
}

pub fn create_help_text() -> String {
    let mut help = String::new();

    let quick_start = r#"$ nornic-search init                         # Write .nornic/settings.toml
$ nornic-search devices                      # Show compute backends
$ nornic-search eval --corpus corpus.json    # Grade search quality"#;
    help.push_str(&format_help_section("QUICK START", quick_start, true));
    help.push('\n');

    let examples = r#"# Evaluate with a separate suite and stricter thresholds
$ nornic-search eval --corpus corpus.json --suite suite.json --threshold p10=0.6,mrr=0.7

# Evaluate a running server and keep the report
$ nornic-search eval --url http://localhost:7474 --output compact --save report.json

# Force the CPU backend for one run
$ NORNIC_GPU__BACKEND=cpu nornic-search eval --corpus corpus.json"#;
    help.push_str(&format_help_section("EXAMPLES", examples, true));
    help.push('\n');

    let exit_codes = r#"0  all test cases met their thresholds
1  at least one test case failed
6  configuration error"#;
    help.push_str(&format_help_section("EXIT CODES", exit_codes, true));

    help
}

pub fn format_command_description(name: &str, description: &str) -> String {
    if Theme::should_disable_colors() {
        format!("{name:16} {description}")
    } else {
        format!("{:16} {}", style(name).green(), description)
    }
}
