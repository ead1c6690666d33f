//! Output formatting

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and marked status lines
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn render_table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).to_string()
}

/// Print rows as a table, or a dimmed notice when there are none
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No results".dimmed());
    } else {
        println!("{}", render_table(rows));
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

pub fn print_failure(message: &str) {
    println!("{} {}", "✗".red(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled)]
    struct Row {
        name: &'static str,
        cost: u64,
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_table_has_header_and_rows() {
        let table = render_table(vec![
            Row {
                name: "light",
                cost: 1_500,
            },
            Row {
                name: "super",
                cost: 1_500,
            },
        ]);
        let lines: Vec<&str> = table.lines().filter(|l| l.contains('|')).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("name") && lines[0].contains("cost"));
        assert!(table.contains("super"));
    }
}
