//! Totals, percentages and quality labels derived from a rubric and a sheet's entries.
//! Everything here is pure; absent entries count as 0.

use serde::Serialize;

use crate::models::{Category, QualityBand, Rubric};
use crate::services::score_sheet::Entries;

pub fn category_total(category: &Category, entries: &Entries) -> u32 {
    category
        .aspects
        .iter()
        .map(|aspect| entries.get(&aspect.id).copied().unwrap_or(0))
        .fold(0, u32::saturating_add)
}

pub fn category_max(category: &Category) -> u32 {
    category
        .aspects
        .iter()
        .map(|aspect| aspect.max_score)
        .fold(0, u32::saturating_add)
}

pub fn form_total(rubric: &Rubric, entries: &Entries) -> u32 {
    rubric
        .categories
        .iter()
        .map(|category| category_total(category, entries))
        .fold(0, u32::saturating_add)
}

pub fn form_max(rubric: &Rubric) -> u32 {
    rubric
        .categories
        .iter()
        .map(category_max)
        .fold(0, u32::saturating_add)
}

/// Rounded percentage; 0 when `max` is 0.
pub fn percentage(total: u32, max: u32) -> u32 {
    if max == 0 {
        return 0;
    }
    (f64::from(total) / f64::from(max) * 100.0).round() as u32
}

/// First matching threshold wins; 40, 60 and 80 belong to the lower tier.
pub fn quality_label(percentage: u32) -> QualityBand {
    if percentage <= 40 {
        QualityBand::Poor
    } else if percentage <= 60 {
        QualityBand::Fair
    } else if percentage <= 80 {
        QualityBand::Good
    } else {
        QualityBand::Excellent
    }
}

pub fn overall_total(sheets: &[(&Rubric, &Entries)]) -> u32 {
    sheets
        .iter()
        .map(|(rubric, entries)| form_total(rubric, entries))
        .fold(0, u32::saturating_add)
}

pub fn overall_max(sheets: &[(&Rubric, &Entries)]) -> u32 {
    sheets
        .iter()
        .map(|(rubric, _)| form_max(rubric))
        .fold(0, u32::saturating_add)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub total: u32,
    pub max: u32,
    pub percentage: u32,
    pub quality: QualityBand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormSummary {
    pub form_id: String,
    pub form_name: String,
    pub categories: Vec<CategorySummary>,
    pub total: u32,
    pub max: u32,
    pub percentage: u32,
    pub quality: QualityBand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverallSummary {
    pub forms: Vec<FormSummary>,
    pub total: u32,
    pub max: u32,
    pub percentage: u32,
    pub quality: QualityBand,
}

pub fn summarize_form(rubric: &Rubric, entries: &Entries) -> FormSummary {
    let categories = rubric
        .categories
        .iter()
        .map(|category| {
            let total = category_total(category, entries);
            let max = category_max(category);
            let pct = percentage(total, max);
            CategorySummary {
                name: category.name.clone(),
                total,
                max,
                percentage: pct,
                quality: quality_label(pct),
            }
        })
        .collect();

    let total = form_total(rubric, entries);
    let max = form_max(rubric);
    let pct = percentage(total, max);
    FormSummary {
        form_id: rubric.id.clone(),
        form_name: rubric.name.clone(),
        categories,
        total,
        max,
        percentage: pct,
        quality: quality_label(pct),
    }
}

pub fn summarize_overall(sheets: &[(&Rubric, &Entries)]) -> OverallSummary {
    let total = overall_total(sheets);
    let max = overall_max(sheets);
    let pct = percentage(total, max);
    OverallSummary {
        forms: sheets
            .iter()
            .map(|(rubric, entries)| summarize_form(rubric, entries))
            .collect(),
        total,
        max,
        percentage: pct,
        quality: quality_label(pct),
    }
}
