use crate::core::{Highlight, Storage};
use crate::utils::error::Result;

/// 下游依賴這個欄位順序與標籤，不可更動
pub const EXPORT_HEADER: &str = "POI Type,name,address,Distance (km),step1_score";

pub const DEFAULT_EXPORT_FILENAME: &str = "location-highlights-results.csv";

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

// 已知類型原樣輸出；未知標籤含分隔字元時才加引號
fn poi_type_cell(highlight: &Highlight) -> String {
    let tag = highlight.poi_type.as_str();
    if tag.contains([',', '"', '\n', '\r']) {
        quote(tag)
    } else {
        tag.to_string()
    }
}

fn number(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

pub fn export_highlights(highlights: &[Highlight]) -> String {
    let mut lines = Vec::with_capacity(highlights.len() + 1);
    lines.push(EXPORT_HEADER.to_string());

    for highlight in highlights {
        lines.push(format!(
            "{},{},{},{},{}",
            poi_type_cell(highlight),
            quote(&highlight.name),
            quote(&highlight.address),
            number(highlight.distance_km),
            number(highlight.step1_score),
        ));
    }

    lines.join("\n")
}

/// 匯出並寫入儲存空間，回傳寫入的檔名
pub async fn write_export<S: Storage>(
    storage: &S,
    filename: &str,
    highlights: &[Highlight],
) -> Result<String> {
    let csv = export_highlights(highlights);
    tracing::debug!(
        "Writing {} highlights ({} bytes) to {}",
        highlights.len(),
        csv.len(),
        filename
    );
    storage.write_file(filename, csv.as_bytes()).await?;
    Ok(filename.to_string())
}
