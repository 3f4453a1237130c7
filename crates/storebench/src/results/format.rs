//! Number formatting utilities.

use crate::config::KIB;
use crate::results::Cell;

/// Format a duration in milliseconds with two fractional digits.
pub fn format_millis(ms: f64) -> String {
    format!("{ms:.2} ms")
}

/// Display text for a table cell.
pub fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Pending => "-".to_string(),
        Cell::Millis(ms) => format_millis(*ms),
        Cell::NoData => "no data".to_string(),
        Cell::Failed(_) => "N/A".to_string(),
    }
}

/// Format a byte count with binary units.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: usize) -> String {
    const MB: usize = KIB * KIB;
    if bytes >= MB && bytes % MB == 0 {
        format!("{} MiB", bytes / MB)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::results::Failure;

    #[test]
    fn millis_have_two_decimals() {
        assert_eq!(format_millis(1.0), "1.00 ms");
        assert_eq!(format_millis(12.345_6), "12.35 ms");
        assert_eq!(format_millis(0.004), "0.00 ms");
    }

    #[test]
    fn cells_render_markers() {
        assert_eq!(format_cell(&Cell::Pending), "-");
        assert_eq!(format_cell(&Cell::NoData), "no data");
        assert_eq!(
            format_cell(&Cell::Failed(Failure::new(ErrorKind::NotFound, "gone"))),
            "N/A"
        );
        assert_eq!(format_cell(&Cell::Millis(3.5)), "3.50 ms");
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(100 * KIB * KIB), "100 MiB");
        assert_eq!(format_bytes(KIB), "1 KiB");
        assert_eq!(format_bytes(10), "10 B");
    }
}
