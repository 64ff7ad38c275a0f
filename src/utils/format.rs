//! Human-readable formatting.

const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// Format a byte count with decimal units, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1_000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1_000.0;
    let mut unit = 0;
    while value >= 1_000.0 && unit < UNITS.len() - 1 {
        value /= 1_000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1_500), "1.5 KB");
        assert_eq!(format_size(2_000_000), "2.0 MB");
        assert_eq!(format_size(3_200_000_000), "3.2 GB");
    }
}
