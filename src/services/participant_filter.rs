use tracing::info;

use crate::models::Participant;
use crate::services::score_sheet::ScoreSheet;

/// Compares identifiers that may have arrived as strings from one source and numbers from
/// another: `"7"`, `" 7"`, `"07"` and `"7.0"` all match `7`. Only integers compare
/// numerically; exponents and fractions never do.
pub fn ids_match(left: &str, right: &str) -> bool {
    let left = left.trim();
    let right = right.trim();
    if left == right {
        return true;
    }
    match (integral_id(left), integral_id(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn integral_id(id: &str) -> Option<i128> {
    if let Ok(value) = id.parse::<i128>() {
        return Some(value);
    }
    let (whole, fraction) = id.split_once('.')?;
    if fraction.is_empty() || !fraction.bytes().all(|b| b == b'0') {
        return None;
    }
    whole.parse::<i128>().ok()
}

pub fn filter_by_event<'a>(participants: &'a [Participant], event_id: &str) -> Vec<&'a Participant> {
    participants
        .iter()
        .filter(|participant| ids_match(&participant.event.id, event_id))
        .collect()
}

/// Clears the sheet's team (and its entries) when that team is not in `visible`.
/// Returns whether anything was cleared.
pub fn reconcile_selection(sheet: &mut ScoreSheet, visible: &[&Participant]) -> bool {
    let Some(team_id) = sheet.team_id.as_deref() else {
        return false;
    };
    if visible.iter().any(|p| ids_match(&p.id, team_id)) {
        return false;
    }
    info!("Clearing team {team_id}: not registered for the selected event");
    sheet.clear_team();
    true
}

/// Display name for a team, looked up from the participant list.
pub fn team_display_name<'a>(participants: &'a [Participant], team_id: &str) -> Option<&'a str> {
    participants
        .iter()
        .find(|p| ids_match(&p.id, team_id))
        .map(|p| p.school_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aspect, BandValues, Category, EventRef, Rubric};

    fn participant(id: &str, school: &str, event_id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            school_name: school.to_string(),
            event: EventRef {
                id: event_id.to_string(),
                name: format!("Event {event_id}"),
            },
            category_id: "1".to_string(),
            coach: String::new(),
            address: String::new(),
        }
    }

    fn participants() -> Vec<Participant> {
        vec![
            participant("1", "SMAN 1", "10"),
            participant("2", "SMAN 2", "10"),
            participant("3", "SMPN 5", "20"),
        ]
    }

    #[test]
    fn filters_with_mixed_id_types() {
        let all = participants();
        let visible = filter_by_event(&all, " 10");
        assert_eq!(visible.len(), 2);
        assert!(filter_by_event(&all, "10.0").len() == 2);
        assert!(filter_by_event(&all, "99").is_empty());
        assert!(!ids_match("abc", "abd"));
        assert!(ids_match("abc", "abc"));
    }

    #[test]
    fn large_and_non_integral_ids_stay_distinct() {
        assert!(!ids_match("12345678901234567891", "12345678901234567892"));
        assert!(ids_match("12345678901234567891", " 12345678901234567891.00"));
        assert!(!ids_match("1e1", "10"));
        assert!(!ids_match("7.5", "7"));
        assert!(!ids_match("7.", "7"));
        assert!(ids_match("007", "7"));

        let all = participants();
        assert!(filter_by_event(&all, "1e1").is_empty());
    }

    #[test]
    fn dangling_team_is_cleared_with_its_entries() {
        let rubric = Rubric {
            id: "f".to_string(),
            name: "f".to_string(),
            categories: vec![Category {
                name: "c".to_string(),
                aspects: vec![Aspect {
                    id: "a1".to_string(),
                    label: "a1".to_string(),
                    max_score: 10,
                    bands: BandValues::default(),
                }],
            }],
        };
        let all = participants();
        let mut sheet = ScoreSheet::new("j1");
        sheet.team_id = Some("3".to_string());
        sheet.set_score(&rubric, "a1", 5).unwrap();

        let visible = filter_by_event(&all, "10");
        assert!(reconcile_selection(&mut sheet, &visible));
        assert_eq!(sheet.team_id, None);
        assert!(sheet.entries().is_empty());
    }

    #[test]
    fn visible_team_is_kept() {
        let all = participants();
        let mut sheet = ScoreSheet::new("j1");
        sheet.team_id = Some("2".to_string());

        let visible = filter_by_event(&all, "10");
        assert!(!reconcile_selection(&mut sheet, &visible));
        assert_eq!(sheet.team_id.as_deref(), Some("2"));
    }

    #[test]
    fn team_name_is_derived_from_the_list() {
        let all = participants();
        assert_eq!(team_display_name(&all, "3"), Some("SMPN 5"));
        assert_eq!(team_display_name(&all, "4"), None);
    }
}
