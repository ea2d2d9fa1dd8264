//! Two-level event taxonomy: K-Means families, then UPGMA subfamilies within
//! each family.

pub mod features;
pub mod footprint;
pub mod kmeans;
pub mod upgma;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calendar::Season;
use crate::error::Result;
use crate::graph::EventId;
use crate::magnitude::EventSummary;
pub use features::{FeatureMatrix, FeatureSelection};
pub use footprint::{cell_activity, group_footprints, CellActivity, GroupFootprint};
pub use kmeans::{ConvergenceStatus, FamilyClustering, FamilyConfig, FamilyPartition, KMeans};
pub use upgma::{
    overlap_distance, CondensedMatrix, Dendrogram, Merge, SubfamilyConfig, SubfamilyCut, SubfamilyMetric,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub event: EventId,
    /// Set when families are clustered per season.
    pub season: Option<Season>,
    pub family: usize,
    pub subfamily: Option<usize>,
}

/// One K-Means run. Its local family `l` is global family `first_family + l`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyRun {
    pub season: Option<Season>,
    pub first_family: usize,
    /// Rows (into the classified event list) clustered by this run.
    pub members: Vec<usize>,
    pub clustering: FamilyClustering,
}

/// Dendrogram of one family, with the rows (into the classified event list)
/// of its leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyTree {
    pub family: usize,
    pub members: Vec<usize>,
    pub dendrogram: Dendrogram,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Taxonomy {
    /// One entry per classified event, in input order.
    pub assignments: Vec<ClusterAssignment>,
    /// Empty when there was nothing to cluster.
    pub families: Vec<FamilyRun>,
    pub trees: Vec<FamilyTree>,
    pub footprints: Vec<GroupFootprint>,
}

/// Subfamily dendrogram over `members` (rows of `events` / `features`).
pub fn subfamily_tree(
    events: &[EventSummary],
    features: &FeatureMatrix,
    members: &[usize],
    metric: SubfamilyMetric,
) -> Dendrogram {
    let dist = match metric {
        SubfamilyMetric::SpatialOverlap => CondensedMatrix::from_fn(members.len(), |i, j| {
            overlap_distance(&events[members[i]].cells, &events[members[j]].cells)
        }),
        SubfamilyMetric::Features => CondensedMatrix::from_fn(members.len(), |i, j| {
            features::squared_distance(features.row(members[i]), features.row(members[j])).sqrt()
        }),
    };
    Dendrogram::average_linkage(dist)
}

/// Rows sharing a K-Means run, in run order.
fn partition(events: &[EventSummary], by: FamilyPartition) -> Vec<(Option<Season>, Vec<usize>)> {
    match by {
        FamilyPartition::All => vec![(None, (0..events.len()).collect())],
        FamilyPartition::Season => Season::ALL
            .iter()
            .map(|&season| {
                let rows: Vec<usize> = (0..events.len()).filter(|&i| events[i].season() == season).collect();
                (Some(season), rows)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect(),
    }
}

/// Assign every event a family and, for the selected families, a subfamily.
///
/// An empty event list yields an empty taxonomy rather than an error. Per
/// season, a season with fewer events than `k` gets one family per event.
pub fn classify(
    events: &[EventSummary],
    family: &FamilyConfig,
    subfamily: Option<&SubfamilyConfig>,
) -> Result<Taxonomy> {
    let kmeans = KMeans::from_config(family)?;
    if events.is_empty() {
        debug!("no events to classify");
        return Ok(Taxonomy::default());
    }

    let raw = FeatureMatrix::from_events(events, family.features);
    let mut features = raw.clone();
    features.standardize();

    let mut assignments: Vec<ClusterAssignment> = events
        .iter()
        .map(|e| ClusterAssignment { event: e.id, season: None, family: 0, subfamily: None })
        .collect();
    let mut runs = Vec::new();
    let mut next_family = 0;
    for (season, members) in partition(events, family.partition) {
        let clustering = match season {
            None => kmeans.fit(&features)?,
            Some(s) => {
                let k = kmeans.k().min(members.len());
                if k < kmeans.k() {
                    warn!(season = ?s, n_events = members.len(), k, "season has fewer events than families");
                }
                let mut local = raw.select_rows(&members);
                local.standardize();
                kmeans.clone().with_k(k).fit(&local)?
            }
        };
        info!(
            season = ?season,
            n_events = members.len(),
            k = clustering.centroids.len(),
            inertia = clustering.inertia,
            status = ?clustering.status,
            "clustered families"
        );
        for (&row, &label) in members.iter().zip(&clustering.labels) {
            assignments[row].season = season;
            assignments[row].family = next_family + label;
        }
        let first_family = next_family;
        next_family += clustering.centroids.len();
        runs.push(FamilyRun { season, first_family, members, clustering });
    }

    let mut trees = Vec::new();
    if let Some(config) = subfamily {
        let mut members_of = vec![Vec::new(); next_family];
        for (row, a) in assignments.iter().enumerate() {
            members_of[a.family].push(row);
        }
        for (f, members) in members_of.into_iter().enumerate() {
            if members.is_empty() || !config.families.as_ref().map_or(true, |sel| sel.contains(&f)) {
                continue;
            }
            let dendrogram = subfamily_tree(events, &features, &members, config.metric);
            let labels = dendrogram.cut(config.cut)?;
            let n_sub = labels.iter().max().map_or(0, |m| m + 1);
            debug!(family = f, n_events = members.len(), subfamilies = n_sub, "split family");
            for (&row, &label) in members.iter().zip(&labels) {
                assignments[row].subfamily = Some(label);
            }
            trees.push(FamilyTree { family: f, members, dendrogram });
        }
    }

    let footprints = group_footprints(events, &assignments);
    Ok(Taxonomy { assignments, families: runs, trees, footprints })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calendar::CircularInterval;
    use crate::coords::LatLon;
    use crate::error::HeatwaveError;
    use crate::grid::GridPoint;
    use crate::magnitude::{CellHits, MagnitudeStats};
    use chrono::NaiveDate;

    /// Synthetic summary: an event around `mean_doy` covering `cells`.
    pub(crate) fn summary(id: u32, mean_doy: f64, cells: Vec<GridPoint>, severity: f64) -> EventSummary {
        let start = NaiveDate::from_yo_opt(2010, mean_doy as u32).unwrap();
        EventSummary {
            id: EventId(id),
            start,
            end: start,
            duration_days: 1,
            node_count: cells.len(),
            cell_count: cells.len(),
            magnitude: MagnitudeStats { sum: severity, max: severity, mean: severity },
            severity,
            centroid: LatLon::new(45.0, 10.0),
            doy_interval: CircularInterval { start: mean_doy as u16, end: mean_doy as u16 },
            mean_doy,
            mean_temperature: 35.0,
            max_temperature: 35.0,
            cell_hits: vec![CellHits { days: 1, magnitude: severity / cells.len() as f64 }; cells.len()],
            cells,
        }
    }

    fn block(lat: u32, lon: u32) -> Vec<GridPoint> {
        (0..2).flat_map(|a| (0..2).map(move |b| GridPoint::new(lat + a, lon + b))).collect()
    }

    /// Summer events in two places plus winter events in one.
    fn population() -> Vec<EventSummary> {
        vec![
            summary(0, 200.0, block(0, 0), 1.0),
            summary(1, 205.0, block(0, 0), 1.0),
            summary(2, 210.0, block(10, 10), 1.0),
            summary(3, 195.0, block(10, 10), 1.0),
            summary(4, 20.0, block(5, 5), 1.0),
            summary(5, 25.0, block(5, 5), 1.0),
        ]
    }

    fn seasonal(k: usize) -> FamilyConfig {
        FamilyConfig { k, features: FeatureSelection::seasonal(), ..FamilyConfig::default() }
    }

    #[test]
    fn families_split_by_season_and_subfamilies_by_place() {
        let events = population();
        let sub = SubfamilyConfig { cut: SubfamilyCut::Height(0.5), ..SubfamilyConfig::default() };
        let tax = classify(&events, &seasonal(2), Some(&sub)).unwrap();
        let fam: Vec<usize> = tax.assignments.iter().map(|a| a.family).collect();
        assert!(fam[..4].iter().all(|&f| f == fam[0]), "summer events share a family: {fam:?}");
        assert_eq!(fam[4], fam[5]);
        assert_ne!(fam[0], fam[4]);

        let sub: Vec<Option<usize>> = tax.assignments.iter().map(|a| a.subfamily).collect();
        assert_eq!(sub[0], sub[1]);
        assert_eq!(sub[2], sub[3]);
        assert_ne!(sub[0], sub[2], "disjoint footprints must not share a subfamily");
        assert_eq!(sub[4], Some(0));
        assert_eq!(tax.trees.len(), 2);
    }

    #[test]
    fn family_selection_limits_subfamilies() {
        let events = population();
        let tax = classify(&events, &seasonal(2), None).unwrap();
        let winter = tax.assignments[4].family;
        let sub = SubfamilyConfig { families: Some(vec![winter]), ..SubfamilyConfig::default() };
        let tax = classify(&events, &seasonal(2), Some(&sub)).unwrap();
        assert!(tax.assignments[..4].iter().all(|a| a.subfamily.is_none()));
        assert!(tax.assignments[4..].iter().all(|a| a.subfamily.is_some()));
    }

    #[test]
    fn subfamily_count_above_family_size_fails() {
        let events = population();
        let sub = SubfamilyConfig { cut: SubfamilyCut::Count(3), ..SubfamilyConfig::default() };
        match classify(&events, &seasonal(2), Some(&sub)) {
            Err(HeatwaveError::InsufficientEvents { requested, available }) => {
                assert_eq!((requested, available), (3, 2), "winter family has two events");
            }
            other => panic!("expected InsufficientEvents, got {other:?}"),
        }
    }

    #[test]
    fn no_events_no_taxonomy() {
        let tax = classify(&[], &FamilyConfig::default(), Some(&SubfamilyConfig::default())).unwrap();
        assert!(tax.assignments.is_empty() && tax.families.is_empty());
    }

    #[test]
    fn seasonal_partition_runs_one_clustering_per_season() {
        let events = population();
        let config = FamilyConfig { partition: FamilyPartition::Season, ..seasonal(3) };
        let tax = classify(&events, &config, None).unwrap();
        assert_eq!(tax.families.len(), 2, "only winter and summer have events");

        let winter = &tax.families[0];
        assert_eq!(winter.season, Some(Season::Winter));
        assert_eq!(winter.members, vec![4, 5]);
        assert_eq!(winter.clustering.centroids.len(), 2, "k is capped at the season's event count");
        let summer = &tax.families[1];
        assert_eq!((summer.season, summer.first_family), (Some(Season::Summer), 2));
        assert_eq!(summer.members, vec![0, 1, 2, 3]);

        for a in &tax.assignments[..4] {
            assert_eq!(a.season, Some(Season::Summer));
            assert!((2..5).contains(&a.family), "summer family {} outside its run", a.family);
        }
        for a in &tax.assignments[4..] {
            assert_eq!(a.season, Some(Season::Winter));
            assert!(a.family < 2);
        }
    }

    #[test]
    fn footprints_cover_families_and_subfamilies() {
        let events = population();
        let sub = SubfamilyConfig { cut: SubfamilyCut::Height(0.5), ..SubfamilyConfig::default() };
        let tax = classify(&events, &seasonal(2), Some(&sub)).unwrap();
        let summer = tax.assignments[0].family;
        let whole = tax
            .footprints
            .iter()
            .find(|g| g.family == summer && g.subfamily.is_none())
            .expect("summer family footprint");
        assert_eq!(whole.cells.len(), 8, "two disjoint 2×2 blocks");
        assert!(whole.cells.iter().all(|c| c.heatwaves == 2 && c.heatwave_days == 2));
        let parts = tax.footprints.iter().filter(|g| g.family == summer && g.subfamily.is_some()).count();
        assert_eq!(parts, 2);
    }

    #[test]
    fn seed_gives_identical_partition() {
        let events = population();
        let config = FamilyConfig { k: 3, ..FamilyConfig::default() };
        let a = classify(&events, &config, None).unwrap();
        let b = classify(&events, &config, None).unwrap();
        assert_eq!(a, b);
    }
}
