//! Schema normalizer.
//!
//! Maps an arbitrarily shaped [`RawTable`] onto the canonical
//! `{date, temperature, humidity, pressure, wind_speed, precipitation}` frame:
//!
//! 1. strip unit annotations from known headers
//! 2. find (or synthesize) the date column, parse it day-first, sort by date;
//!    separate year/month/day columns are combined into one date
//! 3. find the precipitation column (by name, else the first numeric column)
//! 4. match or synthesize temperature / humidity / pressure / wind_speed
//! 5. coerce everything to numbers and fill leftover gaps with column means
//!
//! Only three conditions are fatal: an empty table, a table without any
//! numeric column, and an explicit `date` column none of whose values parse.
//! Every other irregularity is repaired and recorded in the
//! [`NormalizationReport`] so callers can surface it.

use chrono::{DateTime, Datelike, Duration, Month, NaiveDate, NaiveDateTime};
use rand::Rng;
use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::sample_normal;
use crate::services::frame::{coerce_numeric, Frame};
use crate::services::pipeline::PipelineError;
use crate::services::table::{Cell, RawTable};

/// Header rewrites applied before any column matching.
const UNIT_HEADERS: [(&str, &str); 5] = [
    ("temperature (°c)", "temperature"),
    ("humidity (%)", "humidity"),
    ("pressure (hpa)", "pressure"),
    ("wind_speed (m/s)", "wind_speed"),
    ("precipitation (mm)", "precipitation"),
];

const DATE_TOKENS: [&str; 5] = ["date", "time", "day", "year", "month"];
const PRECIPITATION_TOKENS: [&str; 3] = ["precip", "rain", "rainfall"];

/// Exact (folded) headers of split date columns.
const YEAR_HEADERS: [&str; 2] = ["year", "yr"];
const MONTH_HEADERS: [&str; 2] = ["month", "mon"];
const DAY_HEADERS: [&str; 3] = ["day", "dom", "day_of_month"];

/// Accepted calendar years. Anything outside is treated as unparsable.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

/// First day of the synthesized index when the input carries no dates.
const SYNTHETIC_EPOCH: (i32, u32, u32) = (2023, 1, 1);

/// Auxiliary weather columns: name, header tokens, synthesis mean and spread.
struct Auxiliary {
    name: &'static str,
    tokens: &'static [&'static str],
    mean: f64,
    std_dev: f64,
    bounds: (f64, f64),
}

const AUXILIARIES: [Auxiliary; 4] = [
    Auxiliary {
        name: "temperature",
        tokens: &["temperature", "temp"],
        mean: 25.0,
        std_dev: 5.0,
        bounds: (f64::NEG_INFINITY, f64::INFINITY),
    },
    Auxiliary {
        name: "humidity",
        tokens: &["humidity", "humid"],
        mean: 70.0,
        std_dev: 10.0,
        bounds: (0.0, 100.0),
    },
    Auxiliary {
        name: "pressure",
        tokens: &["pressure"],
        mean: 1013.0,
        std_dev: 5.0,
        bounds: (f64::NEG_INFINITY, f64::INFINITY),
    },
    Auxiliary {
        name: "wind_speed",
        tokens: &["wind_speed", "windspeed", "wind"],
        mean: 10.0,
        std_dev: 3.0,
        bounds: (0.0, f64::INFINITY),
    },
];

const NUMERIC_COLUMNS: [&str; 5] = [
    "temperature",
    "humidity",
    "pressure",
    "wind_speed",
    "precipitation",
];

/// Where the date index came from.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    /// A column whose name contains a date-like token
    NamedColumn(String),
    /// The first column, whose values all parse as dates
    FirstColumn(String),
    /// Year, month and (optionally) day columns combined
    Components(Vec<String>),
    /// No usable dates; a daily sequence was generated
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

impl ColumnRename {
    fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Everything the normalizer repaired, for transparent reporting.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NormalizationReport {
    pub date_source: DateSource,
    /// Source column used as precipitation
    pub precipitation_source: String,
    /// True when no precipitation-like header existed and the first numeric
    /// column was used instead
    pub precipitation_inferred: bool,
    pub renamed: Vec<ColumnRename>,
    /// Canonical columns generated from a Normal distribution
    pub synthesized: Vec<String>,
    /// Non-canonical columns dropped from the output
    pub ignored_columns: Vec<String>,
    /// Rows dropped because their date did not parse
    pub dropped_rows: usize,
    /// Rows dropped because their date repeated an earlier row
    pub duplicate_dates: usize,
    /// Undefined canonical cells filled with the column mean
    pub filled_cells: usize,
    pub warnings: Vec<String>,
}

/// Normalizer output: a dated frame with exactly the five canonical numeric
/// columns, sorted, duplicate-free and without undefined cells.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub frame: Frame,
    pub report: NormalizationReport,
}

/// Normalize `raw` onto the canonical schema.
pub fn normalize<R: Rng + ?Sized>(
    raw: &RawTable,
    rng: &mut R,
) -> Result<NormalizedTable, PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let mut warnings = Vec::new();
    let mut renamed = Vec::new();

    let headers: Vec<String> = raw
        .headers
        .iter()
        .map(|h| {
            let stripped = strip_units(h);
            if stripped != *h {
                renamed.push(ColumnRename::new(h, &stripped));
            }
            stripped
        })
        .collect();

    // --- Date index ---------------------------------------------------------
    let (date_cols, date_source, parsed_dates) = resolve_dates(raw, &headers, &mut warnings)?;

    let mut dated_rows: Vec<(NaiveDate, usize)> = Vec::with_capacity(raw.rows.len());
    let mut dropped_rows = 0;
    for (row_idx, date) in parsed_dates.into_iter().enumerate() {
        match date {
            Some(d) => dated_rows.push((d, row_idx)),
            None => dropped_rows += 1,
        }
    }
    if dropped_rows > 0 {
        tracing::warn!("Dropped {} rows with unparsable dates", dropped_rows);
        warnings.push(format!(
            "{} rows had unparsable dates and were skipped",
            dropped_rows
        ));
    }

    // Stable sort keeps the first of any duplicate date in source order.
    dated_rows.sort_by_key(|(d, _)| *d);
    let before = dated_rows.len();
    dated_rows.dedup_by_key(|(d, _)| *d);
    let duplicate_dates = before - dated_rows.len();
    if duplicate_dates > 0 {
        tracing::warn!("Dropped {} rows with duplicate dates", duplicate_dates);
        warnings.push(format!(
            "{} rows repeated an earlier date; the first occurrence was kept",
            duplicate_dates
        ));
    }

    // --- Numeric coercion ---------------------------------------------------
    let mut frame = Frame::with_index(dated_rows.iter().map(|(d, _)| *d).collect());
    let mut source_columns: Vec<(String, ColumnKind)> = Vec::new();
    for (col_idx, header) in headers.iter().enumerate() {
        if date_cols.contains(&col_idx) {
            continue;
        }
        let cells: Vec<&Cell> = dated_rows.iter().map(|(_, r)| &raw.rows[*r][col_idx]).collect();
        let values = coerce_numeric(cells.iter().map(|c| source_text(c)).collect());
        let kind = classify(&cells, &values);

        let name = unique_name(&frame, header);
        if name != *header {
            renamed.push(ColumnRename::new(header, &name));
        }
        frame.insert(&name, values);
        source_columns.push((name, kind));
    }

    // --- Precipitation ------------------------------------------------------
    let (precipitation_source, precipitation_inferred) =
        resolve_precipitation(&source_columns)?;
    if precipitation_inferred {
        tracing::info!("Using '{}' as precipitation data", precipitation_source);
        warnings.push(format!(
            "No precipitation column found; using '{}' as precipitation data",
            precipitation_source
        ));
    }
    if precipitation_source != "precipitation" {
        // A non-numeric column already called "precipitation" loses to the chosen source.
        if frame.remove("precipitation") {
            tracing::warn!("Discarding non-numeric 'precipitation' column");
        }
        if frame.rename(&precipitation_source, "precipitation") {
            renamed.push(ColumnRename::new(&precipitation_source, "precipitation"));
        }
    }

    // --- Auxiliary columns --------------------------------------------------
    let mut synthesized = Vec::new();
    let mut claimed: Vec<String> = vec![precipitation_source.clone(), "precipitation".to_string()];
    for aux in &AUXILIARIES {
        let matched = source_columns
            .iter()
            .map(|(name, _)| name)
            .find(|name| !claimed.contains(name) && header_matches(name, aux.tokens))
            .cloned();

        match matched {
            Some(source) => {
                if source != aux.name && frame.rename(&source, aux.name) {
                    renamed.push(ColumnRename::new(&source, aux.name));
                }
                claimed.push(source);
                claimed.push(aux.name.to_string());
            }
            None => {
                let values = (0..frame.len())
                    .map(|_| {
                        let v = sample_normal(rng, aux.mean, aux.std_dev);
                        Some(v.clamp(aux.bounds.0, aux.bounds.1))
                    })
                    .collect();
                frame.insert(aux.name, values);
                claimed.push(aux.name.to_string());
                tracing::info!("Generated synthetic '{}' data", aux.name);
                synthesized.push(aux.name.to_string());
            }
        }
    }
    if !synthesized.is_empty() {
        warnings.push(format!(
            "Synthesized missing columns: {}",
            synthesized.join(", ")
        ));
    }

    // --- Canonical shape ----------------------------------------------------
    let ignored_columns: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|name| !NUMERIC_COLUMNS.contains(name))
        .map(str::to_string)
        .collect();
    frame.retain_columns(&NUMERIC_COLUMNS);

    let mut filled_cells = 0;
    for name in NUMERIC_COLUMNS {
        let Some(values) = frame.column(name) else {
            continue;
        };
        let fill = frame.mean(name).unwrap_or(0.0);
        let mut missing = 0;
        let filled: Vec<Option<f64>> = values
            .iter()
            .map(|v| match v {
                Some(x) if x.is_finite() => Some(*x),
                _ => {
                    missing += 1;
                    Some(fill)
                }
            })
            .collect();
        if missing > 0 {
            filled_cells += missing;
            frame.insert(name, filled);
        }
    }
    if filled_cells > 0 {
        tracing::warn!("Filled {} undefined cells with column means", filled_cells);
        warnings.push(format!(
            "{} missing or non-numeric values were replaced by column means",
            filled_cells
        ));
    }

    tracing::info!(
        rows = frame.len(),
        synthesized = synthesized.len(),
        "Normalized input table"
    );

    Ok(NormalizedTable {
        frame,
        report: NormalizationReport {
            date_source,
            precipitation_source,
            precipitation_inferred,
            renamed,
            synthesized,
            ignored_columns,
            dropped_rows,
            duplicate_dates,
            filled_cells,
            warnings,
        },
    })
}

/// How a source column looked before coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    /// Every non-empty cell is numeric (and at least one exists)
    Numeric,
    /// Some cells are numeric, others are not
    Mixed,
    /// No numeric cells at all
    Text,
}

/// Cell contents as text for the numeric cast.
fn source_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Text(s) => Some(s.clone()),
        Cell::Number(v) => Some(v.to_string()),
        Cell::Empty => None,
    }
}

fn classify(cells: &[&Cell], values: &[Option<f64>]) -> ColumnKind {
    let non_empty = cells.iter().filter(|c| !c.is_empty()).count();
    let numeric = values.iter().filter(|v| v.is_some()).count();
    if numeric == 0 {
        ColumnKind::Text
    } else if numeric == non_empty {
        ColumnKind::Numeric
    } else {
        ColumnKind::Mixed
    }
}

fn strip_units(header: &str) -> String {
    let trimmed = header.trim();
    let lower = trimmed.to_lowercase();
    UNIT_HEADERS
        .iter()
        .find(|(with_unit, _)| *with_unit == lower)
        .map(|(_, bare)| bare.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Lowercased header with spaces and hyphens folded to underscores.
fn fold_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn header_matches(header: &str, tokens: &[&str]) -> bool {
    let folded = fold_header(header);
    tokens.iter().any(|t| folded.contains(t))
}

/// `header`, or `header.N` if the frame already holds that name.
fn unique_name(frame: &Frame, header: &str) -> String {
    if !frame.has_column(header) {
        return header.to_string();
    }
    (1..)
        .map(|n| format!("{}.{}", header, n))
        .find(|candidate| !frame.has_column(candidate))
        .unwrap_or_else(|| header.to_string())
}

fn resolve_precipitation(
    columns: &[(String, ColumnKind)],
) -> Result<(String, bool), PipelineError> {
    let named = |exact: bool| {
        columns.iter().find(|(name, kind)| {
            *kind != ColumnKind::Text
                && if exact {
                    name == "precipitation"
                } else {
                    header_matches(name, &PRECIPITATION_TOKENS)
                }
        })
    };
    if let Some((name, _)) = named(true).or_else(|| named(false)) {
        return Ok((name.clone(), false));
    }
    if let Some((name, _)) = columns.iter().find(|(_, kind)| *kind == ColumnKind::Numeric) {
        return Ok((name.clone(), true));
    }
    if let Some((name, _)) = columns.iter().find(|(_, kind)| *kind == ColumnKind::Mixed) {
        return Ok((name.clone(), true));
    }
    Err(PipelineError::NoNumericColumns)
}

/// Column positions of split year/month/day fields.
struct DateComponents {
    year: usize,
    month: usize,
    day: Option<usize>,
}

impl DateComponents {
    fn find(headers: &[String]) -> Option<Self> {
        let position = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&fold_header(h).as_str()))
        };
        Some(Self {
            year: position(&YEAR_HEADERS)?,
            month: position(&MONTH_HEADERS)?,
            day: position(&DAY_HEADERS),
        })
    }

    fn columns(&self) -> Vec<usize> {
        [Some(self.year), Some(self.month), self.day]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Date of one row; a missing day column means the 1st of the month.
    fn date(&self, row: &[Cell]) -> Option<NaiveDate> {
        let year = i32::try_from(whole_number(&row[self.year])?).ok()?;
        let month = month_number(&row[self.month])?;
        let day = match self.day {
            Some(idx) => u32::try_from(whole_number(&row[idx])?).ok()?,
            None => 1,
        };
        NaiveDate::from_ymd_opt(year, month, day).filter(|d| YEAR_RANGE.contains(&d.year()))
    }
}

fn whole_number(cell: &Cell) -> Option<i64> {
    cell.as_number()
        .filter(|v| v.fract() == 0.0 && v.abs() < 1e6)
        .map(|v| v as i64)
}

/// Month as 1-12, from a number or an English month name.
fn month_number(cell: &Cell) -> Option<u32> {
    if let Some(m) = whole_number(cell) {
        return u32::try_from(m).ok().filter(|m| (1..=12).contains(m));
    }
    cell.as_text()?
        .trim()
        .parse::<Month>()
        .ok()
        .map(|m| m.number_from_month())
}

/// True when fewer than half of the parsed dates are distinct.
fn mostly_repeated(parsed: &[Option<NaiveDate>]) -> bool {
    let mut dates: Vec<NaiveDate> = parsed.iter().flatten().copied().collect();
    let total = dates.len();
    dates.sort();
    dates.dedup();
    total > 1 && dates.len() * 2 <= total
}

/// Pick the date column(s) and parse them. Returns the source column
/// indexes, the source description and one parsed date per input row.
fn resolve_dates(
    raw: &RawTable,
    headers: &[String],
    warnings: &mut Vec<String>,
) -> Result<(Vec<usize>, DateSource, Vec<Option<NaiveDate>>), PipelineError> {
    let components = DateComponents::find(headers);
    let component_cols = components.as_ref().map(DateComponents::columns).unwrap_or_default();

    for (idx, header) in headers.iter().enumerate() {
        if component_cols.contains(&idx) || !header_matches(header, &DATE_TOKENS) {
            continue;
        }
        let parse_with = |allow_bare_year: bool| -> Vec<Option<NaiveDate>> {
            raw.column(idx)
                .map(|c| c.as_text().and_then(|s| parse_date(&s, allow_bare_year)))
                .collect()
        };
        let parsed = parse_with(false);
        if parsed.iter().any(Option::is_some) {
            return Ok((vec![idx], DateSource::NamedColumn(header.clone()), parsed));
        }
        let years = parse_with(true);
        if years.iter().any(Option::is_some) {
            if !mostly_repeated(&years) {
                return Ok((vec![idx], DateSource::NamedColumn(header.clone()), years));
            }
            tracing::warn!("Column '{}' holds repeated bare years, not dates", header);
            warnings.push(format!(
                "Column '{}' only holds years that repeat across rows; it was not used as the date",
                header
            ));
            continue;
        }
        if header.trim().eq_ignore_ascii_case("date") {
            return Err(PipelineError::UndecodableDates {
                column: header.clone(),
            });
        }
        tracing::warn!("Column '{}' looks like a date but does not parse", header);
        warnings.push(format!(
            "Column '{}' has a date-like name but no parsable dates",
            header
        ));
    }

    if let Some(components) = &components {
        let parsed: Vec<Option<NaiveDate>> =
            raw.rows.iter().map(|row| components.date(row)).collect();
        if parsed.iter().any(Option::is_some) {
            let names = components
                .columns()
                .into_iter()
                .map(|idx| headers[idx].clone())
                .collect();
            return Ok((component_cols, DateSource::Components(names), parsed));
        }
        tracing::warn!("Year/month/day columns do not form valid dates");
        warnings.push("Year, month and day columns did not form valid dates".to_string());
    }

    let first: Vec<&Cell> = raw.column(0).collect();
    let non_empty = first.iter().filter(|c| !c.is_empty()).count();
    if non_empty > 0 && !component_cols.contains(&0) {
        let parsed: Vec<Option<NaiveDate>> = first
            .iter()
            .map(|c| c.as_text().and_then(|s| parse_date(&s, false)))
            .collect();
        if parsed.iter().filter(|d| d.is_some()).count() == non_empty {
            return Ok((
                vec![0],
                DateSource::FirstColumn(headers[0].clone()),
                parsed,
            ));
        }
    }

    tracing::warn!("No date column found, creating a synthetic daily index");
    warnings.push("No date column found; a synthetic daily date column was created".to_string());
    let (y, m, d) = SYNTHETIC_EPOCH;
    let start = NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
    let dates = (0..raw.rows.len())
        .map(|i| Some(start + Duration::days(i as i64)))
        .collect();
    Ok((Vec::new(), DateSource::Synthesized, dates))
}

/// Date-time layouts tried before plain dates.
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

/// Plain date layouts, day-first before month-first.
const DATE_FORMATS: [&str; 16] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%a, %d %b %Y",
    "%A, %d %B %Y",
];

/// Two-digit-year layouts, day-first.
const SHORT_YEAR_FORMATS: [&str; 4] = ["%d/%m/%y", "%d-%m-%y", "%d.%m.%y", "%m/%d/%y"];

/// Parse a date flexibly, preferring day-first interpretations.
///
/// `allow_bare_year` accepts a lone four-digit year (1800–2200) as 1 January;
/// only enabled for columns whose header already says they hold dates.
/// Years outside 1000-9999 are rejected.
pub fn parse_date(raw: &str, allow_bare_year: bool) -> Option<NaiveDate> {
    parse_any_date(raw, allow_bare_year).filter(|d| YEAR_RANGE.contains(&d.year()))
}

fn parse_any_date(raw: &str, allow_bare_year: bool) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    if has_short_year(s) {
        for fmt in SHORT_YEAR_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Some(d);
            }
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    // Year-month, e.g. "2024-03"
    if let Some((y, m)) = s.split_once('-') {
        if y.len() == 4 && (1..=2).contains(&m.len()) {
            if let (Ok(y), Ok(m)) = (y.parse::<i32>(), m.parse::<u32>()) {
                if let Some(d) = NaiveDate::from_ymd_opt(y, m, 1) {
                    return Some(d);
                }
            }
        }
    }

    if allow_bare_year && s.len() == 4 {
        if let Ok(year) = s.parse::<i32>() {
            if (1800..=2200).contains(&year) {
                return NaiveDate::from_ymd_opt(year, 1, 1);
            }
        }
    }

    None
}

/// True for `dd/mm/yy`-shaped strings, whose last segment is a 2-digit year.
fn has_short_year(s: &str) -> bool {
    let parts: Vec<&str> = s.split(['/', '-', '.']).collect();
    parts.len() == 3
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && parts[2].len() == 2
        && parts[0].len() <= 2
}
