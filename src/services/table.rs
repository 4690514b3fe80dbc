//! Raw tabular input and the canonical observation record.
//!
//! Uploaded files, the sample CSV and provider responses all become a
//! [`RawTable`] before normalization: a header row plus loosely typed cells.
//! Nothing here interprets column meaning; that is the schema normalizer's job.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::pipeline::PipelineError;

/// Canonical column names, in output order.
pub const CANONICAL_COLUMNS: [&str; 6] = [
    "date",
    "temperature",
    "humidity",
    "pressure",
    "wind_speed",
    "precipitation",
];

/// Cell values treated as undefined when reading text input.
const MISSING_TOKENS: [&str; 10] = [
    "na", "n/a", "nan", "null", "none", "-", "--", "?", "#n/a", "missing",
];

/// One row of the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Observation {
    /// Calendar day (ISO 8601)
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Atmospheric pressure in hPa
    pub pressure: f64,
    /// Wind speed (non-negative)
    pub wind_speed: f64,
    /// Precipitation in mm (non-negative)
    pub precipitation: f64,
}

/// A loosely typed cell as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    /// Build a cell from source text, mapping blanks and NA tokens to `Empty`.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || MISSING_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    /// Numeric view of the cell; unparsable or non-finite values are `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Textual view of the cell, used for date parsing.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(v) if v.fract() == 0.0 => Some(format!("{}", *v as i64)),
            Cell::Number(v) => Some(v.to_string()),
            Cell::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// Header names plus rows of cells. Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    /// Build a table, padding or truncating rows to the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    /// Cells of column `idx`, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Cell> {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Parse an uploaded file. `filename` selects the reader by extension;
    /// files without an extension are treated as delimited text.
    pub fn from_bytes(bytes: &[u8], filename: Option<&str>) -> Result<Self, PipelineError> {
        let extension = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        let text = decode_text(bytes);
        let table = match extension.as_deref() {
            None | Some("csv") | Some("txt") | Some("tsv") | Some("dat") => {
                Self::from_delimited(&text)?
            }
            Some("json") => Self::from_json(&text)?,
            Some(other) => {
                return Err(PipelineError::Parse(format!(
                    "Unsupported file format: {}. Use CSV, TXT, TSV or JSON files.",
                    other
                )))
            }
        };

        if table.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        Ok(table)
    }

    /// Parse delimited text, sniffing `,` `;` or tab from the header line.
    pub fn from_delimited(text: &str) -> Result<Self, PipelineError> {
        let text = text.trim_start_matches('\u{feff}');
        let Some(header_line) = text.lines().find(|l| !l.trim().is_empty()) else {
            return Err(PipelineError::EmptyInput);
        };
        let delimiter = sniff_delimiter(header_line);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::Parse(format!("Could not read header row: {}", e)))?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if h.is_empty() {
                    format!("Column{}", i + 1)
                } else {
                    h.to_string()
                }
            })
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| PipelineError::Parse(format!("Malformed row: {}", e)))?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(Cell::from_text).collect());
        }

        Ok(Self::new(headers, rows))
    }

    /// Parse JSON: an array of row objects, or an object of columns (either
    /// arrays or `{index: value}` maps).
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| PipelineError::Parse(format!("Invalid JSON: {}", e)))?;

        match value {
            serde_json::Value::Array(items) => {
                let mut headers: Vec<String> = Vec::new();
                for item in &items {
                    if let serde_json::Value::Object(map) = item {
                        for key in map.keys() {
                            if !headers.contains(key) {
                                headers.push(key.clone());
                            }
                        }
                    }
                }
                let rows = items
                    .iter()
                    .filter_map(|item| item.as_object())
                    .map(|map| {
                        headers
                            .iter()
                            .map(|h| map.get(h).map(json_cell).unwrap_or(Cell::Empty))
                            .collect()
                    })
                    .collect();
                Ok(Self::new(headers, rows))
            }
            serde_json::Value::Object(columns) => {
                let headers: Vec<String> = columns.keys().cloned().collect();
                let cols: Vec<Vec<Cell>> = columns
                    .values()
                    .map(|col| match col {
                        serde_json::Value::Array(values) => values.iter().map(json_cell).collect(),
                        serde_json::Value::Object(indexed) => {
                            indexed.values().map(json_cell).collect()
                        }
                        other => vec![json_cell(other)],
                    })
                    .collect();
                let n_rows = cols.iter().map(Vec::len).max().unwrap_or(0);
                let rows = (0..n_rows)
                    .map(|r| {
                        cols.iter()
                            .map(|c| c.get(r).cloned().unwrap_or(Cell::Empty))
                            .collect()
                    })
                    .collect();
                Ok(Self::new(headers, rows))
            }
            _ => Err(PipelineError::Parse(
                "JSON must be an array of records or an object of columns".to_string(),
            )),
        }
    }

    /// Tabulate canonical records (provider fetches, the sample dataset).
    pub fn from_observations(records: &[Observation]) -> Self {
        let headers = CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = records
            .iter()
            .map(|r| {
                vec![
                    Cell::Text(r.date.format("%Y-%m-%d").to_string()),
                    Cell::Number(r.temperature),
                    Cell::Number(r.humidity),
                    Cell::Number(r.pressure),
                    Cell::Number(r.wind_speed),
                    Cell::Number(r.precipitation),
                ]
            })
            .collect();
        Self::new(headers, rows)
    }
}

/// Whether `label` names one of the non-target canonical columns.
pub fn is_reserved_label(label: &str) -> bool {
    CANONICAL_COLUMNS[..5].contains(&label)
}

/// Serialize forecast rows as CSV, labelling the target column `target_label`.
/// A label that repeats an earlier column drops the target column so every
/// header stays unique.
pub fn observations_to_csv(rows: &[Observation], target_label: &str) -> Result<String, csv::Error> {
    let width = if is_reserved_label(target_label) { 5 } else { 6 };
    let mut writer = csv::Writer::from_writer(Vec::new());
    let headers = [
        "date",
        "temperature",
        "humidity",
        "pressure",
        "wind_speed",
        target_label,
    ];
    writer.write_record(&headers[..width])?;
    for row in rows {
        let record = [
            row.date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", row.temperature),
            format!("{:.2}", row.humidity),
            format!("{:.2}", row.pressure),
            format!("{:.2}", row.wind_speed),
            format!("{:.2}", row.precipitation),
        ];
        writer.write_record(&record[..width])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Decode as UTF-8, falling back to Latin-1 for legacy spreadsheet exports.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!("Input is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn sniff_delimiter(header_line: &str) -> u8 {
    [b',', b';', b'\t', b'|']
        .into_iter()
        .max_by_key(|d| header_line.bytes().filter(|b| b == d).count())
        .filter(|d| header_line.bytes().any(|b| b == *d))
        .unwrap_or(b',')
}

fn json_cell(value: &serde_json::Value) -> Cell {
    match value {
        serde_json::Value::Null => Cell::Empty,
        serde_json::Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
        serde_json::Value::String(s) => Cell::from_text(s),
        serde_json::Value::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_from_text_missing_tokens() {
        assert_eq!(Cell::from_text("  "), Cell::Empty);
        assert_eq!(Cell::from_text("NaN"), Cell::Empty);
        assert_eq!(Cell::from_text("N/A"), Cell::Empty);
        assert_eq!(Cell::from_text(" 4.2 "), Cell::Text("4.2".to_string()));
    }

    #[test]
    fn test_cell_as_number() {
        assert_eq!(Cell::Text("3.5".to_string()).as_number(), Some(3.5));
        assert_eq!(Cell::Text("abc".to_string()).as_number(), None);
        assert_eq!(Cell::Number(f64::NAN).as_number(), None);
        assert_eq!(Cell::Empty.as_number(), None);
    }

    #[test]
    fn test_from_delimited_comma() {
        let table =
            RawTable::from_delimited("date,rain\n2024-01-01,1.5\n2024-01-02,\n").unwrap();
        assert_eq!(table.headers, vec!["date", "rain"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][1], Cell::Empty);
    }

    #[test]
    fn test_from_delimited_sniffs_semicolon() {
        let table = RawTable::from_delimited("Datum;Regen;Temp\n01.02.2024;0,0;3\n").unwrap();
        assert_eq!(table.headers.len(), 3);
        assert_eq!(table.rows[0][0], Cell::Text("01.02.2024".to_string()));
    }

    #[test]
    fn test_from_delimited_pads_short_rows() {
        let table = RawTable::from_delimited("a,b,c\n1,2\n").unwrap();
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][2], Cell::Empty);
    }

    #[test]
    fn test_from_delimited_names_blank_headers() {
        let table = RawTable::from_delimited(",rain\n2024-01-01,1\n").unwrap();
        assert_eq!(table.headers[0], "Column1");
    }

    #[test]
    fn test_from_json_records() {
        let table = RawTable::from_json(
            r#"[{"date": "2024-01-01", "rain": 1.0}, {"date": "2024-01-02", "rain": null, "wind": 3}]"#,
        )
        .unwrap();
        assert_eq!(table.headers, vec!["date", "rain", "wind"]);
        assert_eq!(table.rows[0][2], Cell::Empty);
        assert_eq!(table.rows[1][1], Cell::Empty);
        assert_eq!(table.rows[1][2], Cell::Number(3.0));
    }

    #[test]
    fn test_from_json_columns() {
        let table = RawTable::from_json(r#"{"rain": [1, 2, 3], "temp": {"0": 20, "1": 21}}"#)
            .unwrap();
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2][1], Cell::Empty);
    }

    #[test]
    fn test_from_json_rejects_scalars() {
        assert!(matches!(
            RawTable::from_json("42"),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn test_from_bytes_empty_input() {
        assert!(matches!(
            RawTable::from_bytes(b"date,rain\n", Some("data.csv")),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(
            RawTable::from_bytes(b"", Some("data.csv")),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn test_from_bytes_unsupported_extension() {
        assert!(matches!(
            RawTable::from_bytes(b"%PDF-1.4", Some("report.pdf")),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn test_from_bytes_latin1_fallback() {
        let bytes = b"temp (\xb0C),rain\n20,1\n";
        let table = RawTable::from_bytes(bytes, Some("legacy.csv")).unwrap();
        assert_eq!(table.headers[0], "temp (°C)");
    }

    #[test]
    fn test_from_observations_roundtrip_shape() {
        let records = vec![Observation {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            temperature: 30.0,
            humidity: 80.0,
            pressure: 1008.0,
            wind_speed: 4.0,
            precipitation: 12.5,
        }];
        let table = RawTable::from_observations(&records);
        assert_eq!(table.headers, CANONICAL_COLUMNS.to_vec());
        assert_eq!(table.rows[0][0], Cell::Text("2024-06-01".to_string()));
        assert_eq!(table.rows[0][5].as_number(), Some(12.5));
    }

    #[test]
    fn test_observations_to_csv_relabels_target() {
        let rows = vec![Observation {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            temperature: 30.0,
            humidity: 80.0,
            pressure: 1008.0,
            wind_speed: 4.0,
            precipitation: 12.456,
        }];
        let csv = observations_to_csv(&rows, "rainfall").unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("date,temperature,humidity,pressure,wind_speed,rainfall")
        );
        assert_eq!(lines.next(), Some("2024-06-01,30.00,80.00,1008.00,4.00,12.46"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_observations_to_csv_keeps_headers_unique() {
        let rows = vec![Observation {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            temperature: 30.0,
            humidity: 80.0,
            pressure: 1008.0,
            wind_speed: 4.0,
            precipitation: 12.0,
        }];
        let csv = observations_to_csv(&rows, "temperature").unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("date,temperature,humidity,pressure,wind_speed"));
        assert_eq!(lines.next(), Some("2024-06-01,30.00,80.00,1008.00,4.00"));
        assert!(is_reserved_label("date"));
        assert!(!is_reserved_label("precipitation"));
    }
}
