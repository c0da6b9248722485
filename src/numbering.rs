//! Year-scoped invoice number allocation.
//!
//! Numbers look like `INV/2026/00042`: a configurable prefix, the issue
//! year, and a 5-digit sequence that restarts at 1 each year. Allocation
//! scans the numbers already in the store instead of keeping a counter,
//! so externally deleted or imported invoices never cause a reuse. The
//! store's uniqueness constraint stays the final arbiter for races.

/// Build the full number for a given year and sequence value.
pub fn format_number(prefix: &str, year: i32, seq: u32) -> String {
    format!("{prefix}/{year}/{seq:05}")
}

/// Allocate the next unused number for `year` given every number
/// currently in the store. Numbers under other prefixes or years are
/// ignored, as are malformed suffixes left behind by imports.
pub fn next_number<'a, I>(prefix: &str, year: i32, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let scope = format!("{prefix}/{year}/");
    let max_seq = existing
        .into_iter()
        .filter_map(|number| number.strip_prefix(scope.as_str()))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    format_number(prefix, year, max_seq + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_of_a_year() {
        assert_eq!(next_number("INV", 2026, []), "INV/2026/00001");
    }

    #[test]
    fn allocates_past_the_maximum() {
        let existing = ["INV/2026/00001", "INV/2026/00007", "INV/2026/00003"];
        assert_eq!(
            next_number("INV", 2026, existing),
            "INV/2026/00008"
        );
    }

    #[test]
    fn sequence_restarts_each_year() {
        let existing = ["INV/2025/00041", "INV/2025/00042"];
        assert_eq!(next_number("INV", 2026, existing), "INV/2026/00001");
        assert_eq!(next_number("INV", 2025, existing), "INV/2025/00043");
    }

    #[test]
    fn other_prefixes_and_garbage_are_ignored() {
        let existing = [
            "QUO/2026/00099",
            "INV/2026/abc",
            "INV/2026/00002",
            "legacy-17",
        ];
        assert_eq!(next_number("INV", 2026, existing), "INV/2026/00003");
    }

    #[test]
    fn padding_survives_large_sequences() {
        assert_eq!(format_number("INV", 2026, 123456), "INV/2026/123456");
        assert_eq!(format_number("INV", 2026, 9), "INV/2026/00009");
    }
}
