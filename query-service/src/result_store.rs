//! Paged views and exports over materialized query results.
//!
//! Everything here reads a stored [`QueryResult`] and never writes it back.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};

use common::errors::{AppError, AppResult};
use common::models::{ExportFormat, QueryResult, Row, SortDirection};
use common::response::Pagination;

use crate::store::MetadataStore;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 1000;

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Page selection and optional sort key.
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct PageRequest {
    /// 1-based page number. Pages past the end clamp to the last page.
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub sort_column: Option<String>,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_column: None,
            sort_direction: SortDirection::Asc,
        }
    }
}

/// One page of a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResultPage {
    pub result_id: String,
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    pub pagination: Pagination,
}

/// Orders two cells: numerically when both read as numbers, otherwise by
/// their text. The text comparison is byte-wise and not locale aware.
pub fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(as_number), b.and_then(as_number)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => cell_text(a).cmp(&cell_text(b)),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Text form of a cell as it appears in exports.
pub fn cell_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Sorts (stable) and slices a stored result.
pub fn paginate(result: &QueryResult, req: &PageRequest) -> AppResult<ResultPage> {
    let page_size = req.page_size.min(MAX_PAGE_SIZE);
    let pagination = Pagination::new(req.page, page_size, result.rows.len() as u64);

    let start = pagination.offset().min(result.rows.len());
    let end = (start + pagination.page_size as usize).min(result.rows.len());

    let rows = match &req.sort_column {
        Some(column) => {
            if !result.columns.iter().any(|c| c == column) {
                return Err(AppError::Validation(format!(
                    "unknown sort column: {}",
                    column
                )));
            }
            let mut sorted: Vec<&Row> = result.rows.iter().collect();
            sorted.sort_by(|a, b| {
                let ord = compare_cells(a.get(column), b.get(column));
                match req.sort_direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
            sorted[start..end].iter().map(|r| (*r).clone()).collect()
        }
        None => result.rows[start..end].to_vec(),
    };

    Ok(ResultPage {
        result_id: result.id.clone(),
        columns: result.columns.clone(),
        column_types: result.column_types.clone(),
        rows,
        pagination,
    })
}

/// Encodes a stored result in the requested format.
pub fn export(result: &QueryResult, format: ExportFormat) -> AppResult<Vec<u8>> {
    match format {
        ExportFormat::Csv => export_csv(result),
        ExportFormat::Json => export_json(result),
    }
}

/// CSV with a header row. Every field is quoted and embedded quotes are doubled.
pub fn export_csv(result: &QueryResult) -> AppResult<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(&result.columns).map_err(csv_error)?;
    for row in &result.rows {
        let record: Vec<String> = result
            .columns
            .iter()
            .map(|c| cell_text(row.get(c)))
            .collect();
        wtr.write_record(&record).map_err(csv_error)?;
    }

    wtr.into_inner()
        .map_err(|e| AppError::Internal(format!("csv export failed: {}", e.error())))
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::Internal(format!("csv export failed: {}", e))
}

/// `{columns, row_count, data}`.
pub fn export_json(result: &QueryResult) -> AppResult<Vec<u8>> {
    let body = json!({
        "columns": result.columns,
        "row_count": result.rows.len(),
        "data": result.rows,
    });
    serde_json::to_vec_pretty(&body).map_err(|e| AppError::Internal(e.to_string()))
}

/// Result lookups by id.
#[derive(Clone)]
pub struct ResultStore {
    store: Arc<dyn MetadataStore>,
}

impl ResultStore {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, result_id: &str) -> AppResult<QueryResult> {
        self.store.get_result(result_id).await
    }

    pub async fn paginate(&self, result_id: &str, req: &PageRequest) -> AppResult<ResultPage> {
        let result = self.store.get_result(result_id).await?;
        paginate(&result, req)
    }

    pub async fn export(&self, result_id: &str, format: ExportFormat) -> AppResult<Vec<u8>> {
        let result = self.store.get_result(result_id).await?;
        tracing::debug!(result_id, format = format.extension(), rows = result.row_count, "exporting result");
        export(&result, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn result_with(rows: Vec<Row>) -> QueryResult {
        let now = Utc::now();
        QueryResult {
            id: "r1".into(),
            query_id: "q1".into(),
            columns: vec!["id".into(), "name".into()],
            column_types: vec!["INT4".into(), "TEXT".into()],
            row_count: rows.len(),
            rows,
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    fn row(id: Value, name: &str) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), id);
        r.insert("name".into(), json!(name));
        r
    }

    fn sample(n: i64) -> QueryResult {
        result_with((1..=n).map(|i| row(json!(i), &format!("n{}", i % 4))).collect())
    }

    #[test]
    fn test_pages_cover_every_row_once() {
        let result = sample(23);
        let mut seen = Vec::new();
        let first = paginate(&result, &PageRequest { page_size: 5, ..Default::default() }).unwrap();
        assert_eq!(first.pagination.total_pages, 5);
        for page in 1..=first.pagination.total_pages {
            let req = PageRequest { page, page_size: 5, ..Default::default() };
            seen.extend(paginate(&result, &req).unwrap().rows);
        }
        assert_eq!(seen, result.rows);
    }

    #[test]
    fn test_page_past_end_clamps_to_last() {
        let result = sample(23);
        let req = PageRequest { page: 40, page_size: 5, ..Default::default() };
        let page = paginate(&result, &req).unwrap();
        assert_eq!(page.pagination.page, 5);
        assert_eq!(page.rows.len(), 3);
        assert!(!page.pagination.has_next);
        assert!(page.pagination.has_prev);
    }

    #[test]
    fn test_numeric_sort_beats_lexical() {
        let result = result_with(vec![
            row(json!("10"), "a"),
            row(json!(9), "b"),
            row(json!("100"), "c"),
        ]);
        let req = PageRequest { sort_column: Some("id".into()), ..Default::default() };
        let names: Vec<_> = paginate(&result, &req)
            .unwrap()
            .rows
            .iter()
            .map(|r| r["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("b"), json!("a"), json!("c")]);
    }

    #[test]
    fn test_sorted_pages_concatenate_in_order_and_are_stable() {
        let result = sample(17);
        let mut seen = Vec::new();
        for page in 1..=4 {
            let req = PageRequest {
                page,
                page_size: 5,
                sort_column: Some("name".into()),
                sort_direction: SortDirection::Desc,
            };
            seen.extend(paginate(&result, &req).unwrap().rows);
        }
        assert_eq!(seen.len(), 17);
        for pair in seen.windows(2) {
            let ord = compare_cells(pair[0].get("name"), pair[1].get("name"));
            assert_ne!(ord, Ordering::Less);
            if ord == Ordering::Equal {
                // ties keep their original order
                assert!(pair[0]["id"].as_i64() < pair[1]["id"].as_i64());
            }
        }
    }

    #[test]
    fn test_unknown_sort_column_is_rejected() {
        let req = PageRequest { sort_column: Some("nope".into()), ..Default::default() };
        assert!(matches!(paginate(&sample(3), &req), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_csv_quotes_everything() {
        let result = result_with(vec![row(json!(1), "say \"hi\", bob"), row(Value::Null, "x")]);
        let csv = String::from_utf8(export_csv(&result).unwrap()).unwrap();
        assert_eq!(
            csv,
            "\"id\",\"name\"\n\"1\",\"say \"\"hi\"\", bob\"\n\"\",\"x\"\n"
        );
    }

    #[test]
    fn test_csv_parses_back_to_rows() {
        let result = result_with(vec![row(json!(1), "a,b"), row(json!(2), "q\"q")]);
        let bytes = export_csv(&result).unwrap();
        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let header: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, result.columns);
        let records: Vec<Vec<String>> = rdr
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(records.len(), result.rows.len());
        for (record, row) in records.iter().zip(&result.rows) {
            let expected: Vec<String> =
                result.columns.iter().map(|c| cell_text(row.get(c))).collect();
            assert_eq!(record, &expected);
        }
    }

    #[test]
    fn test_json_export_data_matches_rows() {
        let result = sample(4);
        let bytes = export(&result, ExportFormat::Json).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["row_count"], json!(4));
        assert_eq!(parsed["columns"], json!(["id", "name"]));
        let data: Vec<Row> = serde_json::from_value(parsed["data"].clone()).unwrap();
        assert_eq!(data, result.rows);
    }
}
