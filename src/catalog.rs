use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};

use crate::error::PipelineError;
use crate::models::Entity;

/// Trust → region lookup, total and stable for one run.
#[derive(Debug, Clone, Default)]
pub struct OrganisationCatalog {
    entities: BTreeMap<String, Entity>,
}

impl OrganisationCatalog {
    /// Later rows for the same trust code replace earlier ones.
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        let entities = entities
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();
        Self { entities }
    }

    pub fn get(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn regions(&self) -> BTreeSet<&str> {
        self.entities.values().map(|e| e.region.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Ordered, contiguous set of valid dates for the analysis window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    start: NaiveDate,
    end: NaiveDate,
}

impl Calendar {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if end < start {
            return Err(PipelineError::EmptyCalendar(format!(
                "end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Spans the earliest to latest of the given dates.
    pub fn spanning(dates: impl IntoIterator<Item = NaiveDate>) -> Result<Self, PipelineError> {
        let mut bounds: Option<(NaiveDate, NaiveDate)> = None;
        for date in dates {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(date), hi.max(date)),
                None => (date, date),
            });
        }
        let (start, end) = bounds
            .ok_or_else(|| PipelineError::EmptyCalendar("no dated records".to_string()))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.len() as i64).map(move |offset| self.start + Duration::days(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
    }

    #[test]
    fn calendar_iterates_inclusive_range() {
        let calendar = Calendar::new(day(1), day(3)).unwrap();
        let dates: Vec<NaiveDate> = calendar.dates().collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert!(calendar.contains(day(3)));
        assert!(!calendar.contains(day(4)));
    }

    #[test]
    fn calendar_rejects_inverted_range() {
        assert!(matches!(
            Calendar::new(day(5), day(4)),
            Err(PipelineError::EmptyCalendar(_))
        ));
    }

    #[test]
    fn spanning_uses_extremes() {
        let calendar = Calendar::spanning([day(9), day(2), day(5)]).unwrap();
        assert_eq!(calendar.start(), day(2));
        assert_eq!(calendar.end(), day(9));
        assert!(Calendar::spanning(Vec::new()).is_err());
    }

    #[test]
    fn catalog_lists_distinct_regions() {
        let catalog = OrganisationCatalog::new(vec![
            Entity {
                id: "RJ1".to_string(),
                display_name: "Guy's and St Thomas'".to_string(),
                region: "London".to_string(),
            },
            Entity {
                id: "RAL".to_string(),
                display_name: "Royal Free London".to_string(),
                region: "London".to_string(),
            },
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.regions().len(), 1);
        assert_eq!(catalog.get("RAL").unwrap().region, "London");
    }
}
