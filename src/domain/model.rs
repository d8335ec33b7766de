use crate::utils::error::{FailureKind, OrchestratorError, Result};
use crate::utils::validation::{validate_coordinate, validate_non_empty_string, Validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 已登記的建案，座標在建立後不再變動
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub project_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
}

impl Project {
    /// 去除字串欄位前後空白後驗證，驗證失敗時不會碰到 Registry
    pub fn new(
        project_id: impl AsRef<str>,
        project_name: impl AsRef<str>,
        latitude: f64,
        longitude: f64,
        city: impl AsRef<str>,
    ) -> Result<Self> {
        let project = Self {
            project_id: project_id.as_ref().trim().to_string(),
            project_name: project_name.as_ref().trim().to_string(),
            latitude,
            longitude,
            city: city.as_ref().trim().to_string(),
        };
        project.validate()?;
        Ok(project)
    }
}

impl Validate for Project {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("project_id", &self.project_id)?;
        validate_non_empty_string("project_name", &self.project_name)?;
        validate_non_empty_string("city", &self.city)?;
        validate_coordinate("latitude", self.latitude, -90.0, 90.0)?;
        validate_coordinate("longitude", self.longitude, -180.0, 180.0)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// POI 類型標籤；引擎回傳未知的標籤時原樣保留
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PoiType {
    School,
    Hospital,
    ShoppingMall,
    Market,
    Park,
    MetroStation,
    Hotel,
    RailwayStation,
    College,
    TouristAttraction,
    GolfCourse,
    Airport,
    Other(String),
}

impl PoiType {
    pub fn as_str(&self) -> &str {
        match self {
            PoiType::School => "school",
            PoiType::Hospital => "hospital",
            PoiType::ShoppingMall => "shopping_mall",
            PoiType::Market => "market",
            PoiType::Park => "park",
            PoiType::MetroStation => "metro_station",
            PoiType::Hotel => "hotel",
            PoiType::RailwayStation => "railway_station",
            PoiType::College => "college",
            PoiType::TouristAttraction => "tourist_attraction",
            PoiType::GolfCourse => "golf_course",
            PoiType::Airport => "airport",
            PoiType::Other(tag) => tag,
        }
    }
}

impl From<String> for PoiType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "school" => PoiType::School,
            "hospital" => PoiType::Hospital,
            "shopping_mall" => PoiType::ShoppingMall,
            "market" => PoiType::Market,
            "park" => PoiType::Park,
            "metro_station" => PoiType::MetroStation,
            "hotel" => PoiType::Hotel,
            "railway_station" => PoiType::RailwayStation,
            "college" => PoiType::College,
            "tourist_attraction" => PoiType::TouristAttraction,
            "golf_course" => PoiType::GolfCourse,
            "airport" => PoiType::Airport,
            _ => PoiType::Other(tag),
        }
    }
}

impl From<PoiType> for String {
    fn from(poi_type: PoiType) -> Self {
        poi_type.as_str().to_string()
    }
}

impl fmt::Display for PoiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Poi,
    Recreation,
    Transportation,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub poi_type: PoiType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distance_km: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub step1_score: f64,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub driving_distance: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_count: Option<u32>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from_cache: bool,
}

// 引擎從資料庫欄位組出亮點，欄位可能是 null
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// 引擎以空字串表示「沒有行車距離」
fn empty_string_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HighlightCounts {
    pub poi_count: usize,
    pub golf_count: usize,
    pub airport_count: usize,
}

impl HighlightCounts {
    pub fn from_highlights(highlights: &[Highlight]) -> Self {
        Self {
            poi_count: highlights
                .iter()
                .filter(|h| h.category == Category::Poi)
                .count(),
            golf_count: highlights
                .iter()
                .filter(|h| h.poi_type == PoiType::GolfCourse)
                .count(),
            airport_count: highlights
                .iter()
                .filter(|h| h.poi_type == PoiType::Airport)
                .count(),
        }
    }
}

/// 引擎 `--single` 的成功回應
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_location: Option<Location>,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
    #[serde(default)]
    pub total_highlights: usize,
    #[serde(default)]
    pub poi_count: usize,
    #[serde(default)]
    pub golf_count: usize,
    #[serde(default)]
    pub airport_count: usize,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub cache_age_days: Option<i64>,
}

/// 引擎 `--multiple` 回應中每個成功建案的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub highlights_count: usize,
    #[serde(default)]
    pub poi_count: usize,
    #[serde(default)]
    pub golf_count: usize,
    #[serde(default)]
    pub airport_count: usize,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub cache_age_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedProject {
    pub project_id: String,
    pub error: String,
    /// 由引擎客戶端依錯誤文字分類後填入
    #[serde(skip)]
    pub kind: FailureKind,
}

/// 引擎 `--multiple` 的成功回應
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineBatchReport {
    #[serde(rename = "totalProjects", default)]
    pub total_projects: usize,
    #[serde(rename = "processedCount", default)]
    pub processed_count: usize,
    #[serde(rename = "cachedCount", default)]
    pub cached_count: usize,
    #[serde(rename = "failedCount", default)]
    pub failed_count: usize,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
    #[serde(default)]
    pub processed_projects: Vec<ProjectSummary>,
    #[serde(default)]
    pub cached_projects: Vec<ProjectSummary>,
    #[serde(default)]
    pub failed_projects: Vec<FailedProject>,
}

/// Result Cache 中保存的上一次引擎回應與處理時間
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReport {
    pub processed_at: DateTime<Utc>,
    pub report: EngineReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedProject {
    pub project_id: String,
    pub project_name: Option<String>,
    pub highlights: Vec<Highlight>,
    #[serde(flatten)]
    pub counts: HighlightCounts,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_days: Option<i64>,
}

impl CompletedProject {
    pub fn fresh(project: &Project, report: EngineReport) -> Self {
        let counts = HighlightCounts::from_highlights(&report.highlights);
        Self {
            project_id: project.project_id.clone(),
            project_name: Some(project.project_name.clone()),
            highlights: report.highlights,
            counts,
            from_cache: false,
            cache_age_days: None,
        }
    }

    pub fn cached(project: &Project, report: EngineReport, age_days: i64) -> Self {
        let highlights: Vec<Highlight> = report
            .highlights
            .into_iter()
            .map(|h| Highlight {
                from_cache: true,
                ..h
            })
            .collect();
        let counts = HighlightCounts::from_highlights(&highlights);
        Self {
            project_id: project.project_id.clone(),
            project_name: Some(project.project_name.clone()),
            highlights,
            counts,
            from_cache: true,
            cache_age_days: Some(age_days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingResult {
    NotFound { project_id: String },
    Completed(CompletedProject),
}

impl ProcessingResult {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessingResult::NotFound { .. })
    }

    pub fn completed(&self) -> Option<&CompletedProject> {
        match self {
            ProcessingResult::Completed(completed) => Some(completed),
            ProcessingResult::NotFound { .. } => None,
        }
    }
}

/// 批次中單筆失敗，一律帶著出錯項目的識別碼
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub item_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ItemError {
    pub fn new(item_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(item_id: impl Into<String>, err: &OrchestratorError) -> Self {
        Self::new(item_id, err.failure_kind(), err.to_string())
    }
}

pub const PREVIEW_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub total_projects: usize,
    pub processed_count: usize,
    pub cached_count: usize,
    pub failed_count: usize,
    pub succeeded: Vec<CompletedProject>,
    pub failures: Vec<ItemError>,
}

impl BatchOutcome {
    pub fn new(total_projects: usize) -> Self {
        Self {
            total_projects,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, completed: CompletedProject) {
        if completed.from_cache {
            self.cached_count += 1;
        } else {
            self.processed_count += 1;
        }
        self.succeeded.push(completed);
    }

    pub fn record_failure(&mut self, failure: ItemError) {
        self.failed_count += 1;
        self.failures.push(failure);
    }

    /// 所有成功建案的亮點，依 step1_score 由高到低排序（同分時維持輸入順序）
    pub fn highlights(&self) -> Vec<Highlight> {
        let mut all: Vec<Highlight> = self
            .succeeded
            .iter()
            .flat_map(|p| p.highlights.iter().cloned())
            .collect();
        all.sort_by(|a, b| b.step1_score.total_cmp(&a.step1_score));
        all
    }

    pub fn preview(&self) -> Vec<Highlight> {
        let mut all = self.highlights();
        all.truncate(PREVIEW_LIMIT);
        all
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total_projects: self.total_projects,
            processed_count: self.processed_count,
            cached_count: self.cached_count,
            failed_count: self.failed_count,
            total_highlights: self.succeeded.iter().map(|p| p.highlights.len()).sum(),
            highlights: self.preview(),
            processed_projects: self
                .succeeded
                .iter()
                .filter(|p| !p.from_cache)
                .map(|p| p.project_id.clone())
                .collect(),
            cached_projects: self
                .succeeded
                .iter()
                .filter(|p| p.from_cache)
                .map(|p| p.project_id.clone())
                .collect(),
            failed_projects: self.failures.clone(),
        }
    }
}

/// 對外輸出的批次摘要，欄位名稱沿用引擎的批次格式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    #[serde(rename = "totalProjects")]
    pub total_projects: usize,
    #[serde(rename = "processedCount")]
    pub processed_count: usize,
    #[serde(rename = "cachedCount")]
    pub cached_count: usize,
    #[serde(rename = "failedCount")]
    pub failed_count: usize,
    #[serde(rename = "totalHighlights")]
    pub total_highlights: usize,
    pub highlights: Vec<Highlight>,
    pub processed_projects: Vec<String>,
    pub cached_projects: Vec<String>,
    pub failed_projects: Vec<ItemError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreationOutcome {
    pub total_rows: usize,
    pub created_count: usize,
    pub skipped_count: usize,
    pub rejected_count: usize,
    pub errors: Vec<ItemError>,
}
