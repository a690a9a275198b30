//! Natural-language rendering of result sets.

use querent_core::table::ResultSet;

/// Values listed inline before an answer switches to a table.
const INLINE_VALUES: usize = 10;

/// Formats `result` as a short answer.
///
/// - no rows: a fixed sentence
/// - one cell: `The result is 3.`
/// - one column: the values inline, when there are only a few
/// - otherwise: a pipe-separated table
///
/// Truncated results always end with a note saying how many rows are shown.
pub fn format_answer(result: &ResultSet) -> String {
    if result.is_empty() {
        return "The query returned no rows.".to_string();
    }

    let mut answer = if result.row_count() == 1 && result.columns.len() == 1 {
        format!("The result is {}.", result.rows[0][0])
    } else if result.columns.len() == 1 && result.row_count() <= INLINE_VALUES {
        let values: Vec<String> = result.rows.iter().map(|row| row[0].to_string()).collect();
        format!(
            "Found {} {} for {}: {}.",
            values.len(),
            plural(values.len(), "value", "values"),
            result.columns[0],
            values.join(", ")
        )
    } else {
        render_table(result)
    };

    if result.truncated {
        answer.push_str(&format!(
            "\n(Showing the first {} {}; the full result was larger.)",
            result.row_count(),
            plural(result.row_count(), "row", "rows")
        ));
    }
    answer
}

fn render_table(result: &ResultSet) -> String {
    let mut lines = Vec::with_capacity(result.row_count() + 2);
    lines.push(format!(
        "Found {} {}:",
        result.row_count(),
        plural(result.row_count(), "row", "rows")
    ));
    lines.push(result.columns.join(" | "));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        lines.push(cells.join(" | "));
    }
    lines.join("\n")
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querent_core::table::Value;

    #[test]
    fn test_scalar_answer() {
        let result = ResultSet::scalar("len", Value::Int(3));
        assert_eq!(format_answer(&result), "The result is 3.");
    }

    #[test]
    fn test_empty_answer() {
        let result = ResultSet::new(vec!["name".into()], Vec::new());
        assert_eq!(format_answer(&result), "The query returned no rows.");
    }

    #[test]
    fn test_single_column_inline() {
        let result = ResultSet::new(
            vec!["city".into()],
            vec![vec![Value::Text("Oslo".into())], vec![Value::Text("Rome".into())]],
        );
        assert_eq!(format_answer(&result), "Found 2 values for city: Oslo, Rome.");
    }

    #[test]
    fn test_table_with_truncation_note() {
        let rows = (0..5)
            .map(|i| vec![Value::Int(i), Value::Text(format!("n{i}"))])
            .collect();
        let result = ResultSet::new(vec!["id".into(), "name".into()], rows).cap_rows(2);
        let answer = format_answer(&result);
        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines[0], "Found 2 rows:");
        assert_eq!(lines[1], "id | name");
        assert_eq!(lines[2], "0 | n0");
        assert_eq!(lines[3], "1 | n1");
        assert!(lines[4].contains("first 2 rows"));
    }
}
