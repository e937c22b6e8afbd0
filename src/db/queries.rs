use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::types::Type;

use super::{RemoteDb, Result};
use crate::models::{DynamicTable, Observation};
use crate::tables::parse_date;

impl RemoteDb {
    /// Rows of a dynamic table strictly newer than `since`, or the whole table
    /// when `since` is `None`.
    ///
    /// Dates are compared through `date()` so rows stored with a time
    /// component on the boundary day are not fetched twice.
    pub fn fetch_observations(
        &self,
        table: DynamicTable,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Observation>> {
        // Identifiers come from the fixed DynamicTable set, never from input.
        let select = format!(
            "SELECT {key}, date, {value} FROM {name}",
            key = table.key_column(),
            value = table.value_column(),
            name = table.name(),
        );

        let rows = match since {
            Some(since) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{select} WHERE date(date) > date(?1) ORDER BY date"))?;
                let rows = stmt
                    .query_map(params![since.format("%Y-%m-%d").to_string()], map_observation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!("{select} ORDER BY date"))?;
                let rows = stmt
                    .query_map([], map_observation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        log::debug!(
            "Fetched {} rows from {table} (since {})",
            rows.len(),
            since.map_or_else(|| "the beginning".to_string(), |d| d.to_string())
        );
        Ok(rows)
    }
}

fn map_observation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
    let entity_id: String = row.get(0)?;
    let raw_date: String = row.get(1)?;
    let date = parse_date(&raw_date).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unrecognised date '{raw_date}'").into(),
        )
    })?;
    // Values may be stored as REAL; popularity and follower counts are whole numbers.
    let value: f64 = row.get(2)?;
    Ok(Observation {
        entity_id,
        date,
        value: value.round() as i64,
    })
}
