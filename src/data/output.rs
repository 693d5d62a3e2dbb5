use anyhow::Result;

use super::RowWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Plain,
    Json,
    Csv,
}

fn cell(row: &[String], col: usize) -> &str {
    row.get(col).map_or("", String::as_str)
}

fn row_object(window: &RowWindow, row: &[String]) -> serde_json::Value {
    let obj: serde_json::Map<String, serde_json::Value> = window
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            (
                name.clone(),
                serde_json::Value::String(cell(row, i).to_string()),
            )
        })
        .collect();
    serde_json::Value::Object(obj)
}

/// Renders the whole window: an aligned grid, CSV with a header record, or a
/// JSON array of objects keyed by column name.
pub fn render_window(window: &RowWindow, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(render_grid(window)),
        OutputFormat::Csv => {
            let mut wtr = csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(Vec::new());
            wtr.write_record(&window.columns)?;
            for row in &window.rows {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
            Ok(String::from_utf8(wtr.into_inner()?)?)
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = window
                .rows
                .iter()
                .map(|row| row_object(window, row))
                .collect();
            let mut out = serde_json::to_string_pretty(&rows)?;
            out.push('\n');
            Ok(out)
        }
    }
}

fn render_grid(window: &RowWindow) -> String {
    let num_cols = window
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(window.columns.len()))
        .max()
        .unwrap_or(0);
    if num_cols == 0 {
        return String::new();
    }

    let widths: Vec<usize> = (0..num_cols)
        .map(|col| {
            window
                .rows
                .iter()
                .map(|row| cell(row, col).chars().count())
                .chain(std::iter::once(cell(&window.columns, col).chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |row: &[String]| {
        let cells: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(col, &width)| format!("{:<width$}", cell(row, col), width = width))
            .collect();
        let mut line = cells.join(" | ");
        line.truncate(line.trim_end().len());
        line.push('\n');
        line
    };

    let mut out = line(window.columns.as_slice());
    let rule: Vec<String> = widths.iter().map(|&width| "-".repeat(width)).collect();
    out.push_str(&rule.join("-+-"));
    out.push('\n');
    for row in &window.rows {
        out.push_str(&line(row.as_slice()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn window() -> RowWindow {
        RowWindow {
            columns: vec!["name".to_string(), "age".to_string()],
            rows: vec![
                vec!["Alice".to_string(), "30".to_string()],
                vec!["Bob".to_string(), "25".to_string()],
            ],
        }
    }

    #[test]
    fn csv_quotes_embedded_commas() {
        let w = RowWindow {
            columns: vec!["name".to_string(), "bio".to_string()],
            rows: vec![vec!["Alice".to_string(), "likes cats, dogs".to_string()]],
        };
        assert_eq!(
            render_window(&w, OutputFormat::Csv).unwrap(),
            "name,bio\nAlice,\"likes cats, dogs\"\n"
        );
    }

    #[test]
    fn json_fills_short_rows() {
        let w = RowWindow {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec!["1".to_string()]],
        };
        let rendered = render_window(&w, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[0]["a"], "1");
        assert_eq!(value[0]["b"], "");
    }

    #[test]
    fn grid_aligns_columns() {
        assert_eq!(
            render_window(&window(), OutputFormat::Plain).unwrap(),
            "name  | age\n------+----\nAlice | 30\nBob   | 25\n"
        );
    }

    #[test]
    fn grid_pads_ragged_rows() {
        let w = RowWindow {
            columns: vec!["a".to_string()],
            rows: vec![vec!["1".to_string(), "extra".to_string()]],
        };
        assert_eq!(
            render_window(&w, OutputFormat::Plain).unwrap(),
            "a |\n--+------\n1 | extra\n"
        );
    }

    #[test]
    fn csv_includes_header() {
        assert_eq!(
            render_window(&window(), OutputFormat::Csv).unwrap(),
            "name,age\nAlice,30\nBob,25\n"
        );
    }

    #[test]
    fn json_array_of_objects() {
        let rendered = render_window(&window(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[1]["name"], "Bob");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_window_renders_nothing() {
        assert_eq!(
            render_window(&RowWindow::default(), OutputFormat::Plain).unwrap(),
            ""
        );
    }
}
