use tracing::debug;

use crate::error::ValidationError;
use crate::models::{Aspect, BandValues, Category, QualityBand};
use crate::services::score_sheet::ScoreSheet;

/// Representative score for `tier`: the element at index `len / 2` of its sorted allowed
/// values, so always one of them. `None` when the tier declares no values.
pub fn resolve(bands: &BandValues, tier: QualityBand) -> Option<u32> {
    let mut values = bands.values(tier).to_vec();
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[values.len() / 2])
}

/// Sets the aspect to its tier representative. Returns the value written, or `None` when the
/// tier is empty and the score was left alone.
pub fn quick_fill_aspect(
    sheet: &mut ScoreSheet,
    aspect: &Aspect,
    tier: QualityBand,
) -> Result<Option<u32>, ValidationError> {
    let Some(value) = resolve(&aspect.bands, tier) else {
        debug!("Quick-fill {} skipped aspect {}: tier is empty", tier.key(), aspect.id);
        return Ok(None);
    };
    sheet.set_aspect_score(aspect, i64::from(value))?;
    Ok(Some(value))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuickFillOutcome {
    pub applied: Vec<(String, u32)>,
    pub skipped: Vec<String>,
}

impl QuickFillOutcome {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Quick-fills every aspect of the category independently. Aspects whose tier is empty are
/// skipped; the others are still updated.
pub fn quick_fill_category(
    sheet: &mut ScoreSheet,
    category: &Category,
    tier: QualityBand,
) -> Result<QuickFillOutcome, ValidationError> {
    let mut outcome = QuickFillOutcome::default();
    for aspect in &category.aspects {
        match quick_fill_aspect(sheet, aspect, tier)? {
            Some(value) => outcome.applied.push((aspect.id.clone(), value)),
            None => outcome.skipped.push(aspect.id.clone()),
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bersaf_kumpul() -> Aspect {
        Aspect {
            id: "a1".to_string(),
            label: "Bersaf Kumpul".to_string(),
            max_score: 35,
            bands: BandValues {
                poor: vec![1, 2, 4],
                fair: vec![6, 8, 12],
                good: vec![15, 19, 23],
                excellent: vec![29, 35],
            },
        }
    }

    #[test]
    fn picks_the_middle_index() {
        let bands = BandValues {
            fair: vec![1, 2, 4, 6, 8, 12],
            ..BandValues::default()
        };
        assert_eq!(resolve(&bands, QualityBand::Fair), Some(6));

        let aspect = bersaf_kumpul();
        assert_eq!(resolve(&aspect.bands, QualityBand::Poor), Some(2));
        assert_eq!(resolve(&aspect.bands, QualityBand::Excellent), Some(35));
    }

    #[test]
    fn single_value_tiers_resolve_to_that_value() {
        let bands = BandValues {
            good: vec![9],
            ..BandValues::default()
        };
        assert_eq!(resolve(&bands, QualityBand::Good), Some(9));
    }

    #[test]
    fn unsorted_values_are_sorted_first() {
        let bands = BandValues {
            poor: vec![12, 1, 8],
            ..BandValues::default()
        };
        assert_eq!(resolve(&bands, QualityBand::Poor), Some(8));
    }

    #[test]
    fn empty_tier_leaves_the_score_alone() {
        let mut aspect = bersaf_kumpul();
        aspect.bands.good.clear();
        let mut sheet = ScoreSheet::new("j1");
        sheet.set_aspect_score(&aspect, 10).unwrap();

        assert_eq!(quick_fill_aspect(&mut sheet, &aspect, QualityBand::Good), Ok(None));
        assert_eq!(sheet.get_score("a1"), 10);
    }

    #[test]
    fn category_fill_is_not_atomic() {
        let mut sparse = bersaf_kumpul();
        sparse.id = "a2".to_string();
        sparse.bands.excellent.clear();
        let category = Category {
            name: "Dasar".to_string(),
            aspects: vec![bersaf_kumpul(), sparse],
        };
        let mut sheet = ScoreSheet::new("j1");
        sheet.set_aspect_score(&category.aspects[1], 3).unwrap();

        let outcome = quick_fill_category(&mut sheet, &category, QualityBand::Excellent).unwrap();

        assert_eq!(outcome.applied, vec![("a1".to_string(), 35)]);
        assert_eq!(outcome.skipped, vec!["a2".to_string()]);
        assert!(outcome.changed());
        assert_eq!(sheet.get_score("a1"), 35);
        assert_eq!(sheet.get_score("a2"), 3);
    }

    #[test]
    fn bersaf_kumpul_excellent_category_fill_takes_index_len_over_two() {
        let category = Category {
            name: "Materi Dasar".to_string(),
            aspects: vec![bersaf_kumpul()],
        };
        let mut sheet = ScoreSheet::new("j1");

        let outcome = quick_fill_category(&mut sheet, &category, QualityBand::Excellent).unwrap();

        // [29, 35] has two values, so index 2 / 2 = 1 is chosen.
        assert_eq!(outcome.applied, vec![("a1".to_string(), 35)]);
        assert!(outcome.skipped.is_empty());
        assert_eq!(sheet.get_score("a1"), 35);
    }
}
