//! Threshold classification over somatic cell count
//!
//! The criteria table is static and versioned with the code. It is checked
//! once when constructed so that lookups can never fall through.

use crate::error::PredictionError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Unit of the somatic cell count thresholds
pub const SCC_UNIT: &str = "개/ml";

/// One class of the threshold table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    /// Key used in criteria listings
    #[serde(skip)]
    pub key: &'static str,
    pub class: u8,
    #[serde(skip)]
    pub label: &'static str,
    /// Inclusive upper bound; `None` for the open-ended top range
    #[serde(skip)]
    pub upper_bound: Option<f64>,
    /// Display range, e.g. `101-300`
    pub range: &'static str,
    /// Explanation returned with a classification
    #[serde(skip)]
    pub description: &'static str,
    /// Short explanation used in listings
    #[serde(rename = "description")]
    pub summary: &'static str,
    pub color: &'static str,
    pub action: &'static str,
}

impl Criterion {
    fn contains(&self, value: f64) -> bool {
        match self.upper_bound {
            Some(bound) => value <= bound,
            None => true,
        }
    }
}

/// Ordered, validated threshold table
#[derive(Debug, Clone)]
pub struct ClassificationCriteria {
    method: &'static str,
    unit: &'static str,
    criteria: Vec<Criterion>,
    notes: Vec<&'static str>,
    references: Vec<&'static str>,
}

impl ClassificationCriteria {
    /// Build a table; bounds must be strictly ascending with exactly one
    /// open-ended range in last position and classes numbered 0..n.
    pub fn new(
        method: &'static str,
        unit: &'static str,
        criteria: Vec<Criterion>,
    ) -> Result<Self, PredictionError> {
        let invalid = |msg: String| PredictionError::Configuration(format!("criteria table: {}", msg));

        if criteria.is_empty() {
            return Err(invalid("no criteria".to_string()));
        }
        let last = criteria.len() - 1;
        let mut previous: Option<f64> = None;
        for (idx, criterion) in criteria.iter().enumerate() {
            if criterion.class as usize != idx {
                return Err(invalid(format!(
                    "{} has class {}, expected {}",
                    criterion.key, criterion.class, idx
                )));
            }
            match (criterion.upper_bound, idx == last) {
                (None, true) => {}
                (None, false) => {
                    return Err(invalid(format!(
                        "open-ended range {} must be last",
                        criterion.key
                    )))
                }
                (Some(_), true) => {
                    return Err(invalid("top range must be open-ended".to_string()))
                }
                (Some(bound), false) => {
                    if !bound.is_finite() {
                        return Err(invalid(format!("{} has a non-finite bound", criterion.key)));
                    }
                    if let Some(prev) = previous {
                        if bound <= prev {
                            return Err(invalid(format!(
                                "bounds must be strictly ascending at {}",
                                criterion.key
                            )));
                        }
                    }
                    previous = Some(bound);
                }
            }
        }

        Ok(Self {
            method,
            unit,
            criteria,
            notes: Vec::new(),
            references: Vec::new(),
        })
    }

    pub fn with_notes(mut self, notes: Vec<&'static str>, references: Vec<&'static str>) -> Self {
        self.notes = notes;
        self.references = references;
        self
    }

    /// Standard somatic cell count table
    pub fn somatic_cell_count() -> Result<Self, PredictionError> {
        let criteria = vec![
            Criterion {
                key: "정상",
                class: 0,
                label: "정상",
                upper_bound: Some(100.0),
                range: "≤ 100",
                description: "체세포수가 정상 범위입니다. 건강한 상태로 판단됩니다.",
                summary: "체세포수가 정상 범위로 건강한 상태",
                color: "green",
                action: "정기 모니터링 지속",
            },
            Criterion {
                key: "주의",
                class: 1,
                label: "주의",
                upper_bound: Some(300.0),
                range: "101-300",
                description: "체세포수가 약간 증가한 상태입니다. 주의 깊은 관찰이 필요합니다.",
                summary: "체세포수가 약간 증가한 상태로 주의 필요",
                color: "yellow",
                action: "위생 관리 강화 및 모니터링",
            },
            Criterion {
                key: "염증_가능성",
                class: 2,
                label: "염증 가능성 + 유방염 의심",
                upper_bound: None,
                range: "> 300",
                description: "체세포수가 높은 상태로 유방염이 의심됩니다.",
                summary: "체세포수가 높아 유방염 의심",
                color: "red",
                action: "즉시 수의사 진료 필요",
            },
        ];

        Ok(Self::new("somatic_cell_count", SCC_UNIT, criteria)?.with_notes(
            vec![
                "체세포수는 우유 1ml당 체세포의 개수를 나타냅니다",
                "체세포수가 높을수록 유방염 가능성이 증가합니다",
                "이 기준은 일반적인 가이드라인이며, 수의사의 전문적인 진단이 필요합니다",
                "개체별, 환경별 차이를 고려하여 종합적으로 판단해야 합니다",
            ],
            vec![
                "대한수의사회 유방염 진단 가이드라인",
                "낙농진흥회 우유 품질 관리 기준",
            ],
        ))
    }

    /// First range whose upper bound holds the value; NaN lands in the top range
    pub fn classify(&self, value: f64) -> &Criterion {
        let fallback = &self.criteria[self.criteria.len() - 1];
        if value.is_nan() {
            return fallback;
        }
        self.criteria
            .iter()
            .find(|c| c.contains(value))
            .unwrap_or(fallback)
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn unit(&self) -> &'static str {
        self.unit
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Compact `key -> range` view attached to each classification
    pub fn summary(&self) -> CriteriaSummary {
        CriteriaSummary {
            entries: self
                .criteria
                .iter()
                .map(|c| (c.key, format!("{}{}", c.range, self.unit)))
                .collect(),
        }
    }

    /// Full description of the table
    pub fn listing(&self) -> CriteriaListing {
        CriteriaListing {
            classification_method: self.method,
            unit: self.unit,
            criteria: CriteriaMap(self.criteria.clone()),
            notes: self.notes.clone(),
            references: self.references.clone(),
        }
    }
}

/// Ordered `key -> range` map
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaSummary {
    entries: Vec<(&'static str, String)>,
}

impl CriteriaSummary {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl Serialize for CriteriaSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, range) in &self.entries {
            map.serialize_entry(key, range)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
struct CriteriaMap(Vec<Criterion>);

impl Serialize for CriteriaMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for criterion in &self.0 {
            map.serialize_entry(criterion.key, criterion)?;
        }
        map.end()
    }
}

/// Criteria listing response
#[derive(Debug, Clone, Serialize)]
pub struct CriteriaListing {
    pub classification_method: &'static str,
    pub unit: &'static str,
    criteria: CriteriaMap,
    pub notes: Vec<&'static str>,
    pub references: Vec<&'static str>,
}

impl CriteriaListing {
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria.0
    }
}
