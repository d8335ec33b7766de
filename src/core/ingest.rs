use crate::core::Project;
use crate::domain::model::ItemError;
use crate::utils::error::{FailureKind, OrchestratorError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;

pub const REQUIRED_COLUMNS: [&str; 5] = ["project_id", "project_name", "latitude", "longitude", "city"];

/// 建案 CSV 解析結果：可建立的建案與解析階段被拒絕的列
#[derive(Debug, Default)]
pub struct ParsedRows {
    pub total_rows: usize,
    pub projects: Vec<Project>,
    pub errors: Vec<ItemError>,
}

struct ColumnIndex {
    project_id: usize,
    project_name: usize,
    latitude: usize,
    longitude: usize,
    city: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let position = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    OrchestratorError::validation(format!(
                        "CSV header is missing required column '{}' (expected {})",
                        name,
                        REQUIRED_COLUMNS.join(",")
                    ))
                })
        };

        Ok(Self {
            project_id: position("project_id")?,
            project_name: position("project_name")?,
            latitude: position("latitude")?,
            longitude: position("longitude")?,
            city: position("city")?,
        })
    }
}

fn field<'r>(record: &'r StringRecord, index: usize) -> &'r str {
    record.get(index).unwrap_or("").trim()
}

fn parse_row(record: &StringRecord, columns: &ColumnIndex, line: usize) -> std::result::Result<Project, ItemError> {
    let project_id = field(record, columns.project_id);
    let project_name = field(record, columns.project_name);
    let city = field(record, columns.city);

    let item_id = if project_id.is_empty() {
        format!("row {}", line)
    } else {
        project_id.to_string()
    };

    if project_id.is_empty() || project_name.is_empty() || city.is_empty() {
        return Err(ItemError::new(
            item_id,
            FailureKind::Validation,
            format!(
                "Row with project_id {}: Missing required fields",
                if project_id.is_empty() { "unknown" } else { project_id }
            ),
        ));
    }

    let latitude = field(record, columns.latitude).parse::<f64>();
    let longitude = field(record, columns.longitude).parse::<f64>();
    let invalid_coordinates = || {
        ItemError::new(
            item_id.clone(),
            FailureKind::Validation,
            format!("Row with project_id {}: Invalid latitude or longitude values", project_id),
        )
    };

    match (latitude, longitude) {
        (Ok(latitude), Ok(longitude)) => {
            Project::new(project_id, project_name, latitude, longitude, city)
                .map_err(|_| invalid_coordinates())
        }
        _ => Err(invalid_coordinates()),
    }
}

/// 解析建案 CSV；標頭不分大小寫、順序不限，多餘欄位忽略
pub fn parse_project_rows<R: Read>(reader: R) -> Result<ParsedRows> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = ColumnIndex::from_headers(&headers)?;

    let mut parsed = ParsedRows::default();

    for (index, record) in rdr.records().enumerate() {
        // 第 1 行是標頭
        let line = index + 2;
        parsed.total_rows += 1;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                parsed.errors.push(ItemError::new(
                    format!("row {}", line),
                    FailureKind::Validation,
                    format!("Error parsing row: {}", e),
                ));
                continue;
            }
        };

        match parse_row(&record, &columns, line) {
            Ok(project) => parsed.projects.push(project),
            Err(err) => {
                tracing::debug!("Rejected row {}: {}", line, err.message);
                parsed.errors.push(err);
            }
        }
    }

    tracing::debug!(
        "Parsed {} rows: {} valid, {} rejected",
        parsed.total_rows,
        parsed.projects.len(),
        parsed.errors.len()
    );

    Ok(parsed)
}

fn looks_like_header(first_cell: &str) -> bool {
    let is_numeric = !first_cell.is_empty() && first_cell.chars().all(|c| c.is_ascii_digit());
    !(first_cell.starts_with("PROJ") || is_numeric)
}

/// 讀取建案代碼清單（第一欄）。第一列若不像代碼則視為標頭略過
pub fn parse_project_ids<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut ids = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record?;
        let first = record.get(0).unwrap_or("").trim_start_matches('\u{feff}').trim();

        if index == 0 && looks_like_header(first) {
            continue;
        }
        if !first.is_empty() {
            ids.push(first.to_string());
        }
    }

    Ok(ids)
}
