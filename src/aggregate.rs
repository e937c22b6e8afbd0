//! Per-entity time series from dynamic tables.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{AggregatedSeries, MeanPopularity, Observation};

/// Group observations by entity id into date-ordered series.
///
/// Each entity's rows are sorted by date before the lists are built, so the
/// result does not depend on the table's row order. When one entity has
/// several rows on the same date, the row appearing last in the input wins.
/// Every entity present in the input gets a series.
pub fn aggregate(observations: &[Observation]) -> BTreeMap<String, AggregatedSeries> {
    let mut groups: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for o in observations {
        groups.entry(o.entity_id.as_str()).or_default().push(o);
    }

    let mut series = BTreeMap::new();
    for (entity_id, mut rows) in groups {
        // Stable: equal dates keep input order.
        rows.sort_by_key(|o| o.date);

        let mut points: Vec<(NaiveDate, i64)> = Vec::with_capacity(rows.len());
        for o in rows {
            if points.last().is_some_and(|&(date, _)| date == o.date) {
                points.pop();
            }
            points.push((o.date, o.value));
        }

        let Some(&(_, current)) = points.last() else {
            continue;
        };
        let values = points.iter().map(|&(_, v)| v).collect();
        series.insert(
            entity_id.to_string(),
            AggregatedSeries {
                points,
                values,
                current,
            },
        );
    }

    series
}

/// Mean observed value per date across all entities, ascending by date.
pub fn mean_by_date(observations: &[Observation]) -> Vec<MeanPopularity> {
    let mut sums: BTreeMap<NaiveDate, (i64, usize)> = BTreeMap::new();
    for o in observations {
        let entry = sums.entry(o.date).or_insert((0, 0));
        entry.0 += o.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(date, (sum, count))| MeanPopularity {
            date,
            mean_track_popularity: sum as f64 / count as f64,
        })
        .collect()
}
