//! Per-cell heatwave activity of a group of events: exceeding days, distinct
//! heatwaves and summed magnitude at every cell the group touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ClusterAssignment;
use crate::grid::GridPoint;
use crate::magnitude::EventSummary;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellActivity {
    pub point: GridPoint,
    /// Exceeding days, summed over the group's events.
    pub heatwave_days: u32,
    /// Events of the group that touch the cell.
    pub heatwaves: u32,
    pub magnitude: f64,
}

/// Activity of one family, or of one subfamily within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFootprint {
    pub family: usize,
    /// `None` for the whole family.
    pub subfamily: Option<usize>,
    pub cells: Vec<CellActivity>,
}

/// Activity per cell, ascending by cell.
pub fn cell_activity<'a, I>(events: I) -> Vec<CellActivity>
where
    I: IntoIterator<Item = &'a EventSummary>,
{
    let mut by_cell: BTreeMap<GridPoint, CellActivity> = BTreeMap::new();
    for e in events {
        for (i, &point) in e.cells.iter().enumerate() {
            let hits = e.cell_hits.get(i).copied().unwrap_or_default();
            let a = by_cell.entry(point).or_insert(CellActivity {
                point,
                heatwave_days: 0,
                heatwaves: 0,
                magnitude: 0.0,
            });
            a.heatwaves += 1;
            a.heatwave_days += hits.days;
            a.magnitude += hits.magnitude;
        }
    }
    by_cell.into_values().collect()
}

/// One footprint per family, followed by one per subfamily of that family.
pub fn group_footprints(events: &[EventSummary], assignments: &[ClusterAssignment]) -> Vec<GroupFootprint> {
    let mut groups: BTreeMap<(usize, Option<usize>), Vec<&EventSummary>> = BTreeMap::new();
    for (e, a) in events.iter().zip(assignments) {
        groups.entry((a.family, None)).or_default().push(e);
        if a.subfamily.is_some() {
            groups.entry((a.family, a.subfamily)).or_default().push(e);
        }
    }
    groups
        .into_iter()
        .map(|((family, subfamily), members)| GroupFootprint { family, subfamily, cells: cell_activity(members) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::summary;
    use crate::graph::EventId;

    #[test]
    fn overlapping_events_accumulate_per_cell() {
        let a = summary(0, 200.0, vec![GridPoint::new(0, 0), GridPoint::new(0, 1)], 2.0);
        let mut b = summary(1, 210.0, vec![GridPoint::new(0, 1), GridPoint::new(3, 3)], 4.0);
        b.cell_hits[0].days = 3;
        let cells = cell_activity([&a, &b]);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].point, GridPoint::new(0, 0));
        assert_eq!((cells[0].heatwaves, cells[0].heatwave_days), (1, 1));
        assert_eq!((cells[1].heatwaves, cells[1].heatwave_days), (2, 4), "shared cell counts both events");
        assert!((cells[1].magnitude - 3.0).abs() < 1e-12, "1 + 2, got {}", cells[1].magnitude);
    }

    #[test]
    fn families_precede_their_subfamilies() {
        let events = vec![
            summary(0, 200.0, vec![GridPoint::new(0, 0)], 1.0),
            summary(1, 200.0, vec![GridPoint::new(5, 5)], 1.0),
            summary(2, 20.0, vec![GridPoint::new(0, 0)], 1.0),
        ];
        let assign = |event, family, subfamily| ClusterAssignment { event: EventId(event), season: None, family, subfamily };
        let assignments = vec![assign(0, 1, Some(0)), assign(1, 1, Some(1)), assign(2, 0, None)];
        let groups = group_footprints(&events, &assignments);
        let keys: Vec<(usize, Option<usize>)> = groups.iter().map(|g| (g.family, g.subfamily)).collect();
        assert_eq!(keys, vec![(0, None), (1, None), (1, Some(0)), (1, Some(1))]);
        assert_eq!(groups[1].cells.len(), 2);
        assert_eq!(groups[3].cells[0].point, GridPoint::new(5, 5));
    }
}
