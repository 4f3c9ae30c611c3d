//! Turns table rows into one-line chunks of `field: value` segments.

use crate::tabular_parser::TabularData;

/// Separator between `field: value` segments within a row.
pub const FIELD_SEPARATOR: &str = ".";

/// Flatten every row of `table` into a chunk, in row order.
///
/// Rows whose cells are all missing produce no chunk, since an empty chunk
/// would carry nothing to embed.
pub fn flatten_rows(table: &TabularData) -> Vec<String> {
    table
        .rows
        .iter()
        .map(|row| flatten_row(&table.headers, row))
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Join the present cells of one row as `name: value` in column order.
pub fn flatten_row(headers: &[String], row: &[Option<String>]) -> String {
    headers
        .iter()
        .zip(row.iter())
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .map(|v| format!("{}: {}", name.trim(), v.trim()))
        })
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular_parser::parse_delimited_text;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_cell_is_omitted() {
        let row = vec![Some("Alice".to_string()), None, Some("Pune".to_string())];
        assert_eq!(
            flatten_row(&headers(&["name", "age", "city"]), &row),
            "name: Alice.city: Pune"
        );
    }

    #[test]
    fn test_names_and_values_are_trimmed() {
        let row = vec![Some("  Ring ".to_string()), Some("1200\t".to_string())];
        assert_eq!(
            flatten_row(&headers(&[" product", "price  "]), &row),
            "product: Ring.price: 1200"
        );
    }

    #[test]
    fn test_one_chunk_per_row_in_order() {
        let table = parse_delimited_text(
            "order_id,status,eta\nA-100,shipped,2 days\nA-101,,\nA-102,pending,NaN\n",
            b',',
        )
        .unwrap();

        let chunks = flatten_rows(&table);
        assert_eq!(
            chunks,
            vec![
                "order_id: A-100.status: shipped.eta: 2 days".to_string(),
                "order_id: A-101".to_string(),
                "order_id: A-102.status: pending".to_string(),
            ]
        );
    }

    #[test]
    fn test_fully_missing_row_yields_no_chunk() {
        let table = TabularData {
            headers: headers(&["a", "b"]),
            rows: vec![vec![None, None], vec![Some("1".to_string()), None]],
        };
        assert_eq!(flatten_rows(&table), vec!["a: 1".to_string()]);
    }
}
