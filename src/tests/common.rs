//! Shared helpers for building CSV fixtures.

/// Escape a field for CSV output, quoting when it contains a comma,
/// quote, or line terminator.
pub(crate) fn escape_csv_field(field: &str) -> String {
    if field.is_empty()
        || field.contains(',')
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r')
    {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Build a CSV string from headers and rows with `\n` line endings.
pub(crate) fn create_csv(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut csv = String::new();

    csv.push_str(
        &headers
            .iter()
            .map(|h| escape_csv_field(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    csv.push('\n');

    for row in rows {
        csv.push_str(
            &row.iter()
                .map(|f| escape_csv_field(f))
                .collect::<Vec<_>>()
                .join(","),
        );
        csv.push('\n');
    }

    csv
}
