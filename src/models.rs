use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_QUERY_CHARS: usize = 200;
pub const MAX_SEARCH_QUERIES: usize = 3;
pub const DEFAULT_QUERY_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Book,
    Clothing,
    Electronics,
    Furniture,
    Tools,
    General,
}

impl ObjectType {
    pub const ALL: [ObjectType; 6] = [
        ObjectType::Book,
        ObjectType::Clothing,
        ObjectType::Electronics,
        ObjectType::Furniture,
        ObjectType::Tools,
        ObjectType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Book => "book",
            ObjectType::Clothing => "clothing",
            ObjectType::Electronics => "electronics",
            ObjectType::Furniture => "furniture",
            ObjectType::Tools => "tools",
            ObjectType::General => "general",
        }
    }

    pub fn from_label(input: &str) -> Option<Self> {
        let label = input.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|object_type| object_type.as_str() == label)
    }
}

/// Raised when a vision response does not describe a usable analysis.
#[derive(Debug, Error, PartialEq)]
pub enum ClassificationError {
    #[error("unknown object_type `{0}`")]
    UnknownObjectType(String),
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("expected 1 to 3 search queries, got {0}")]
    QueryCount(usize),
    #[error("search query #{index} is blank")]
    BlankQuery { index: usize },
    #[error("search query #{index} is longer than 200 characters")]
    QueryTooLong { index: usize },
    #[error("{field} confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { field: &'static str, value: f64 },
}

impl ClassificationError {
    /// Points a per-query error at its position in the response.
    fn at_query(self, index: usize) -> Self {
        match self {
            ClassificationError::BlankQuery { .. } => ClassificationError::BlankQuery { index },
            ClassificationError::QueryTooLong { .. } => ClassificationError::QueryTooLong { index },
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    query: String,
    confidence: f64,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, confidence: f64) -> Result<Self, ClassificationError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ClassificationError::BlankQuery { index: 0 });
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(ClassificationError::QueryTooLong { index: 0 });
        }
        check_confidence("query", confidence)?;
        Ok(Self { query, confidence })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Structured output of the vision step. Only constructible through the
/// validating constructors, so downstream code can rely on its invariants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    object_type: ObjectType,
    description: String,
    search_queries: Vec<SearchQuery>,
    confidence: f64,
}

impl AnalysisResult {
    pub fn new(
        object_type: ObjectType,
        description: impl Into<String>,
        search_queries: Vec<SearchQuery>,
        confidence: f64,
    ) -> Result<Self, ClassificationError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ClassificationError::EmptyDescription);
        }
        if search_queries.is_empty() || search_queries.len() > MAX_SEARCH_QUERIES {
            return Err(ClassificationError::QueryCount(search_queries.len()));
        }
        check_confidence("analysis", confidence)?;
        Ok(Self {
            object_type,
            description,
            search_queries,
            confidence,
        })
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn search_queries(&self) -> &[SearchQuery] {
        &self.search_queries
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Loosely-typed analysis as returned by the vision model.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnalysis {
    pub object_type: String,
    pub description: String,
    pub search_queries: Vec<RawSearchQuery>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchQuery {
    pub query: String,
    #[serde(default = "default_query_confidence")]
    pub confidence: f64,
}

fn default_query_confidence() -> f64 {
    DEFAULT_QUERY_CONFIDENCE
}

impl TryFrom<RawAnalysis> for AnalysisResult {
    type Error = ClassificationError;

    fn try_from(raw: RawAnalysis) -> Result<Self, Self::Error> {
        let object_type = ObjectType::from_label(&raw.object_type)
            .ok_or_else(|| ClassificationError::UnknownObjectType(raw.object_type.clone()))?;
        if raw.search_queries.is_empty() || raw.search_queries.len() > MAX_SEARCH_QUERIES {
            return Err(ClassificationError::QueryCount(raw.search_queries.len()));
        }
        let queries = raw
            .search_queries
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                SearchQuery::new(item.query, item.confidence).map_err(|err| err.at_query(index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        AnalysisResult::new(object_type, raw.description, queries, raw.confidence)
    }
}

fn check_confidence(field: &'static str, value: f64) -> Result<(), ClassificationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ClassificationError::ConfidenceOutOfRange { field, value })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Abebooks,
    Vinted,
    Leboncoin,
}

impl Marketplace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Abebooks => "abebooks",
            Marketplace::Vinted => "vinted",
            Marketplace::Leboncoin => "leboncoin",
        }
    }

    pub fn from_id(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "abebooks" => Some(Marketplace::Abebooks),
            "vinted" => Some(Marketplace::Vinted),
            "leboncoin" => Some(Marketplace::Leboncoin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketplaceLink {
    marketplace: Marketplace,
    query: String,
    url: String,
}

impl MarketplaceLink {
    pub(crate) fn new(marketplace: Marketplace, query: String, url: String) -> Self {
        Self {
            marketplace,
            query,
            url,
        }
    }

    pub fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct SearchResponse {
    pub request_id: String,
    pub analysis: AnalysisResult,
    pub marketplace_links: Vec<MarketplaceLink>,
    pub processing_time_seconds: f64,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub detail: String,
    pub error_type: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(object_type: &str, queries: &[&str], confidence: f64) -> RawAnalysis {
        RawAnalysis {
            object_type: object_type.to_string(),
            description: "Roman policier".to_string(),
            search_queries: queries
                .iter()
                .map(|q| RawSearchQuery {
                    query: q.to_string(),
                    confidence: DEFAULT_QUERY_CONFIDENCE,
                })
                .collect(),
            confidence,
        }
    }

    #[test]
    fn raw_analysis_converts_when_valid() {
        let analysis = AnalysisResult::try_from(raw("Book", &["livre policier"], 0.9))
            .expect("valid analysis");
        assert_eq!(analysis.object_type(), ObjectType::Book);
        assert_eq!(analysis.search_queries().len(), 1);
        assert_eq!(analysis.search_queries()[0].query(), "livre policier");
    }

    #[test]
    fn raw_analysis_rejects_unknown_category() {
        let err = AnalysisResult::try_from(raw("vehicle", &["voiture"], 0.9)).unwrap_err();
        assert_eq!(err, ClassificationError::UnknownObjectType("vehicle".into()));
    }

    #[test]
    fn raw_analysis_enforces_query_cardinality() {
        let none = AnalysisResult::try_from(raw("general", &[], 0.5)).unwrap_err();
        assert_eq!(none, ClassificationError::QueryCount(0));
        let four = AnalysisResult::try_from(raw("general", &["a", "b", "c", "d"], 0.5)).unwrap_err();
        assert_eq!(four, ClassificationError::QueryCount(4));
    }

    #[test]
    fn raw_analysis_rejects_blank_and_long_queries() {
        let blank = AnalysisResult::try_from(raw("tools", &["perceuse", "   "], 0.5)).unwrap_err();
        assert_eq!(blank, ClassificationError::BlankQuery { index: 1 });

        let long = "é".repeat(MAX_QUERY_CHARS + 1);
        let err = AnalysisResult::try_from(raw("tools", &[long.as_str()], 0.5)).unwrap_err();
        assert_eq!(err, ClassificationError::QueryTooLong { index: 0 });

        let exact = "é".repeat(MAX_QUERY_CHARS);
        assert!(AnalysisResult::try_from(raw("tools", &[exact.as_str()], 0.5)).is_ok());
    }

    #[test]
    fn confidence_must_be_in_unit_range() {
        let err = AnalysisResult::try_from(raw("general", &["lampe"], 1.2)).unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::ConfidenceOutOfRange { field: "analysis", .. }
        ));
        assert!(SearchQuery::new("lampe", -0.1).is_err());
    }

    #[test]
    fn search_query_confidence_defaults_when_missing() {
        let parsed: RawSearchQuery = serde_json::from_str(r#"{"query":"chaise"}"#).unwrap();
        assert_eq!(parsed.confidence, DEFAULT_QUERY_CONFIDENCE);
    }

    #[test]
    fn description_must_not_be_blank() {
        let queries = vec![SearchQuery::new("chaise", 0.8).unwrap()];
        let err = AnalysisResult::new(ObjectType::Furniture, "  ", queries, 0.8).unwrap_err();
        assert_eq!(err, ClassificationError::EmptyDescription);
    }

    #[test]
    fn marketplace_serializes_lowercase() {
        let link = MarketplaceLink::new(
            Marketplace::Vinted,
            "veste".into(),
            "https://www.vinted.fr/catalog?search_text=veste".into(),
        );
        let value = serde_json::to_value(&link).unwrap();
        assert_eq!(value["marketplace"], "vinted");
        assert_eq!(Marketplace::from_id("LEBONCOIN"), Some(Marketplace::Leboncoin));
        assert_eq!(Marketplace::from_id("ebay"), None);
    }
}
