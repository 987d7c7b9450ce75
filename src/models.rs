use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{self, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// One of the four ordered quality tiers an aspect can declare values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityBand {
    pub const ALL: [QualityBand; 4] = [
        QualityBand::Poor,
        QualityBand::Fair,
        QualityBand::Good,
        QualityBand::Excellent,
    ];

    pub fn key(self) -> &'static str {
        match self {
            QualityBand::Poor => "poor",
            QualityBand::Fair => "fair",
            QualityBand::Good => "good",
            QualityBand::Excellent => "excellent",
        }
    }

    /// Label shown on score sheets.
    pub fn label(self) -> &'static str {
        match self {
            QualityBand::Poor => "Kurang",
            QualityBand::Fair => "Cukup",
            QualityBand::Good => "Baik",
            QualityBand::Excellent => "Baik Sekali",
        }
    }
}

impl fmt::Display for QualityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityBand {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        QualityBand::ALL
            .into_iter()
            .find(|band| band.key() == wanted || band.label().to_ascii_lowercase() == wanted)
            .ok_or_else(|| ValidationError::UnknownTier(s.to_string()))
    }
}

/// Allowed point values per tier, each sorted ascending without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BandValues {
    pub poor: Vec<u32>,
    pub fair: Vec<u32>,
    pub good: Vec<u32>,
    pub excellent: Vec<u32>,
}

impl BandValues {
    pub fn values(&self, band: QualityBand) -> &[u32] {
        match band {
            QualityBand::Poor => &self.poor,
            QualityBand::Fair => &self.fair,
            QualityBand::Good => &self.good,
            QualityBand::Excellent => &self.excellent,
        }
    }

    fn values_mut(&mut self, band: QualityBand) -> &mut Vec<u32> {
        match band {
            QualityBand::Poor => &mut self.poor,
            QualityBand::Fair => &mut self.fair,
            QualityBand::Good => &mut self.good,
            QualityBand::Excellent => &mut self.excellent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aspect {
    pub id: String,
    pub label: String,
    pub max_score: u32,
    pub bands: BandValues,
}

impl Aspect {
    /// The tier that declares `value`, or `None` when the value is legal but unclassified.
    pub fn band_of(&self, value: u32) -> Option<QualityBand> {
        QualityBand::ALL
            .into_iter()
            .find(|band| self.bands.values(*band).binary_search(&value).is_ok())
    }

    pub fn accepts(&self, value: i64) -> bool {
        value >= 0 && value <= i64::from(self.max_score)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub name: String,
    pub aspects: Vec<Aspect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rubric {
    pub id: String,
    pub name: String,
    pub categories: Vec<Category>,
}

impl Rubric {
    pub fn aspects(&self) -> impl Iterator<Item = &Aspect> {
        self.categories.iter().flat_map(|c| c.aspects.iter())
    }

    pub fn aspect(&self, aspect_id: &str) -> Option<&Aspect> {
        self.aspects().find(|a| a.id == aspect_id)
    }

    pub fn aspect_ids(&self) -> Vec<&str> {
        self.aspects().map(|a| a.id.as_str()).collect()
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Rubric as delivered by the remote `GetRubric` collaborator, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRubric {
    #[serde(default, deserialize_with = "from_id")]
    pub id: String,
    #[serde(default, deserialize_with = "from_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "from_lenient_vec")]
    pub categories: Vec<RawCategory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCategory {
    #[serde(default, deserialize_with = "from_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "from_lenient_vec")]
    pub aspects: Vec<RawAspect>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAspect {
    #[serde(default, deserialize_with = "from_id")]
    pub id: String,
    #[serde(default, deserialize_with = "from_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "from_lenient_u32")]
    pub max_score: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aspect_score: RawAspectScore,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAspectScore {
    #[serde(deserialize_with = "from_lenient_u32_list")]
    pub poor: Vec<u32>,
    #[serde(deserialize_with = "from_lenient_u32_list")]
    pub fair: Vec<u32>,
    #[serde(deserialize_with = "from_lenient_u32_list")]
    pub good: Vec<u32>,
    #[serde(deserialize_with = "from_lenient_u32_list")]
    pub excellent: Vec<u32>,
}

impl RawAspectScore {
    fn values(&self, band: QualityBand) -> &[u32] {
        match band {
            QualityBand::Poor => &self.poor,
            QualityBand::Fair => &self.fair,
            QualityBand::Good => &self.good,
            QualityBand::Excellent => &self.excellent,
        }
    }

    /// Drops values above `max_score`, then sorts and deduplicates each tier.
    pub fn normalize(&self, max_score: u32) -> BandValues {
        let mut bands = BandValues::default();
        for band in QualityBand::ALL {
            let values: BTreeSet<u32> = self
                .values(band)
                .iter()
                .copied()
                .filter(|v| *v <= max_score)
                .collect();
            *bands.values_mut(band) = values.into_iter().collect();
        }
        bands
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    #[serde(default, deserialize_with = "from_id")]
    pub id: String,
    #[serde(default, deserialize_with = "from_text")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "from_id")]
    pub id: String,
    #[serde(default, deserialize_with = "from_text")]
    pub school_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event: EventRef,
    #[serde(
        rename = "participant_category",
        default,
        deserialize_with = "from_nested_id"
    )]
    pub category_id: String,
    #[serde(default, deserialize_with = "from_text")]
    pub coach: String,
    #[serde(rename = "school_address", default, deserialize_with = "from_text")]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(deserialize_with = "from_id")]
    pub id: String,
    #[serde(default, deserialize_with = "from_text")]
    pub name: String,
    #[serde(default, deserialize_with = "from_opt_text")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "from_opt_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "from_opt_date")]
    pub end_date: Option<NaiveDate>,
}

/// Renders a remote identifier as a trimmed string; numbers print without a fractional part
/// when integral.
pub fn normalize_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
                    _ => n.to_string(),
                }
            }
        }
        _ => String::new(),
    }
}

fn lenient_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn from_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(normalize_id).unwrap_or_default())
}

fn from_nested_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map.get("id").map(normalize_id).unwrap_or_default(),
        Some(other) => normalize_id(&other),
        None => String::new(),
    })
}

fn from_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn from_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(from_opt_text(deserializer)?.unwrap_or_default())
}

fn from_lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_u32).unwrap_or(0))
}

fn from_lenient_u32_list<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.iter().filter_map(lenient_u32).collect(),
        _ => Vec::new(),
    })
}

/// Null, missing or non-array values become an empty list; elements that fail to parse are
/// skipped instead of failing the whole payload.
fn from_lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!("Skipping malformed rubric element: {err}");
                None
            }
        })
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn from_opt_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::String(s)) = opt else {
        return Ok(None);
    };
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    Ok(DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.date_naive()))
}
