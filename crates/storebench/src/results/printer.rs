//! Terminal rendering of the results table.

use crate::config::{Backend, Operation, WorkloadShape};
use crate::results::format::format_cell;
use crate::results::{Cell, ResultsTable};
use comfy_table::{
    Attribute, Cell as TableCell, Color, ContentArrangement, Table, presets::UTF8_FULL,
};
use owo_colors::OwoColorize;

/// Formats and prints the results table.
pub struct ResultsPrinter {
    /// Whether color output is enabled.
    color: bool,
}

impl ResultsPrinter {
    /// Create a new printer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Build the backend x (shape, operation) table.
    pub fn render(&self, results: &ResultsTable) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let mut header = vec![TableCell::new("Backend").add_attribute(Attribute::Bold)];
        for shape in WorkloadShape::all() {
            for operation in [Operation::Write, Operation::Read] {
                header.push(
                    TableCell::new(format!("{shape} {operation}")).add_attribute(Attribute::Bold),
                );
            }
        }
        table.set_header(header);

        for backend in Backend::all() {
            let mut row = vec![TableCell::new(backend.name()).add_attribute(Attribute::Bold)];
            for shape in WorkloadShape::all() {
                for operation in [Operation::Write, Operation::Read] {
                    row.push(self.cell(results.cell(backend, shape, operation)));
                }
            }
            table.add_row(row);
        }

        table
    }

    fn cell(&self, cell: &Cell) -> TableCell {
        let text = TableCell::new(format_cell(cell));
        if !self.color {
            return text;
        }
        match cell {
            Cell::Millis(_) => text.fg(Color::Cyan),
            Cell::Failed(_) => text.fg(Color::Red),
            Cell::Pending | Cell::NoData => text.fg(Color::DarkGrey),
        }
    }

    /// Print the table followed by the failure listing.
    pub fn print(&self, results: &ResultsTable) {
        println!();
        if self.color {
            println!("{}", "Results".bold());
        } else {
            println!("Results");
        }
        println!("{}", self.render(results));
        self.print_failures(results);
    }

    /// Print one line per failed cell with its error kind.
    pub fn print_failures(&self, results: &ResultsTable) {
        let failures = results.failures();
        if failures.is_empty() {
            return;
        }

        println!();
        if self.color {
            println!("{}", "Errors".bold());
        } else {
            println!("Errors");
        }
        for (backend, shape, operation, failure) in failures {
            let label = format!("{backend} / {shape} / {operation}");
            if self.color {
                println!(
                    "  {} [{}] {}",
                    label.bold(),
                    failure.kind.red(),
                    failure.message.dimmed()
                );
            } else {
                println!("  {label} [{}] {}", failure.kind, failure.message);
            }
        }
    }

    /// Note printed when worker results were still outstanding.
    pub fn print_pending_note(&self, pending: usize) {
        if pending == 0 {
            return;
        }
        let note = format!("{pending} worker measurement(s) did not report back");
        if self.color {
            println!("{}", note.yellow());
        } else {
            println!("{note}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::results::{Failure, TestOutcome};

    fn sample_table() -> ResultsTable {
        let mut table = ResultsTable::new();
        table.merge(
            TestOutcome::new(Backend::Opfs, WorkloadShape::SingleFile)
                .with_write(Cell::Millis(12.5))
                .with_read(Cell::Millis(3.25)),
        );
        table.merge(TestOutcome::failed(
            Backend::OpfsSync,
            WorkloadShape::SingleFile,
            Failure::new(ErrorKind::BackendUnavailable, "no sync handles"),
        ));
        table
    }

    #[test]
    fn render_shows_values_and_markers() {
        let rendered = ResultsPrinter::new(false).render(&sample_table()).to_string();
        assert!(rendered.contains("12.50 ms"));
        assert!(rendered.contains("3.25 ms"));
        assert!(rendered.contains("N/A"));
        assert!(rendered.contains('-'));
        assert!(rendered.contains("Cache API"));
    }

    #[test]
    fn print_does_not_panic() {
        ResultsPrinter::new(true).print(&sample_table());
        ResultsPrinter::new(false).print(&ResultsTable::new());
        ResultsPrinter::new(true).print_pending_note(2);
    }
}
