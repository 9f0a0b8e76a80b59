use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content URLs assigned to this device, indexed by 1-based display slot.
///
/// Shared across display instances through the bus; the writer stamps a
/// wall-clock millisecond revision so readers can tell whether a payload is
/// fresher than what they already hold. Last writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAssignment {
    pub urls: Vec<Option<String>>,
    pub revision: u64,
}

impl ContentAssignment {
    pub fn new(urls: Vec<Option<String>>) -> Self {
        Self {
            urls,
            revision: now_millis(),
        }
    }

    /// Builds an assignment from the service's `urls` array, preserving
    /// slot positions (empty strings count as unassigned slots).
    pub fn from_service_urls(urls: &[String]) -> Self {
        Self::new(
            urls.iter()
                .map(|url| {
                    if url.is_empty() {
                        None
                    } else {
                        Some(url.clone())
                    }
                })
                .collect(),
        )
    }

    /// True when more than one slot carries a URL, i.e. a secondary display
    /// has something to show.
    pub fn is_multi_display(&self) -> bool {
        self.urls.iter().filter(|url| url.is_some()).count() > 1
    }

    pub fn is_newer_than(&self, other: Option<&ContentAssignment>) -> bool {
        other.map_or(true, |prev| self.revision > prev.revision)
    }
}

/// Picks the URL a given display slot should render.
///
/// `slot` is 1-based. An out-of-range slot falls back to the first entry;
/// an empty assignment yields nothing.
pub fn select_url(assignment: &ContentAssignment, slot: u32) -> Option<&str> {
    let index = slot.saturating_sub(1) as usize;
    assignment
        .urls
        .get(index)
        .and_then(|url| url.as_deref())
        .or_else(|| assignment.urls.first().and_then(|url| url.as_deref()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(urls: &[&str]) -> ContentAssignment {
        ContentAssignment::new(urls.iter().map(|u| Some(u.to_string())).collect())
    }

    #[test]
    fn selects_slot_url_in_range() {
        let a = assignment(&["a", "b"]);
        assert_eq!(select_url(&a, 1), Some("a"));
        assert_eq!(select_url(&a, 2), Some("b"));
    }

    #[test]
    fn out_of_range_slot_falls_back_to_first() {
        let a = assignment(&["a", "b"]);
        assert_eq!(select_url(&a, 3), Some("a"));
        assert_eq!(select_url(&a, 0), Some("a"));
    }

    #[test]
    fn empty_assignment_selects_nothing() {
        let a = ContentAssignment::new(Vec::new());
        assert_eq!(select_url(&a, 1), None);
    }

    #[test]
    fn empty_service_urls_become_unassigned_slots() {
        let a = ContentAssignment::from_service_urls(&["a".into(), "".into()]);
        assert_eq!(select_url(&a, 2), Some("a"));
        assert!(!a.is_multi_display());
    }

    #[test]
    fn unassigned_in_range_slot_falls_back_to_first() {
        // Slot 2 exists but carries no URL; it mirrors slot 1 instead of
        // going dark.
        let a = ContentAssignment::new(vec![Some("a".into()), None]);
        assert_eq!(select_url(&a, 2), Some("a"));
        // Unless slot 1 is unassigned too.
        let b = ContentAssignment::new(vec![None, Some("b".into())]);
        assert_eq!(select_url(&b, 1), None);
        assert_eq!(select_url(&b, 2), Some("b"));
    }

    #[test]
    fn multi_display_requires_two_populated_slots() {
        assert!(assignment(&["a", "b"]).is_multi_display());
        assert!(!assignment(&["a"]).is_multi_display());
    }
}
