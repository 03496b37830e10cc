//! Persistence for accepted records.
//!
//! The scheduler hands finished batches to a [`RecordSink`]; the SQLite
//! implementation stores them idempotently keyed on the document id, so
//! re-collecting an overlapping region updates rows instead of
//! duplicating them. Geohash prefixes are indexed to serve the proximity
//! queries.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use geo::Coord;
use rusqlite::{Connection, params};
use thiserror::Error;

use strandline_core::{SpatialRecord, geohash, region};

/// Records per insert transaction.
const DEFAULT_BATCH_SIZE: usize = 500;

/// Geohash precision used to pre-filter proximity queries. Five
/// characters cover roughly a 4.9 km by 4.9 km cell.
const PROXIMITY_PREFIX_LEN: usize = 5;

/// Error type for sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Opening the database file failed.
    #[error("failed to open database at {path}: {source}")]
    Open {
        /// Path that could not be opened.
        path: PathBuf,
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
    /// Applying the schema failed.
    #[error("failed to apply schema: {source}")]
    Schema {
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
    /// Starting a write transaction failed.
    #[error("failed to begin transaction: {source}")]
    BeginTransaction {
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
    /// Serialising a record's attributes failed.
    #[error("failed to serialise record {id}: {source}")]
    Serialise {
        /// Document id of the record.
        id: String,
        /// Source error returned by the JSON encoder.
        #[source]
        source: serde_json::Error,
    },
    /// Writing one record failed.
    #[error("failed to persist record {id}: {source}")]
    PersistRow {
        /// Document id of the record.
        id: String,
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
    /// Committing a transaction failed.
    #[error("failed to commit transaction: {source}")]
    Commit {
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
    /// A read query failed.
    #[error("query failed: {source}")]
    Query {
        /// Source error returned by SQLite.
        #[source]
        source: rusqlite::Error,
    },
}

/// Destination for accepted records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one batch of records.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the underlying store rejects the batch.
    async fn store_batch(&self, records: &[SpatialRecord]) -> Result<(), SinkError>;
}

/// SQLite-backed record store.
///
/// Writes are upserts keyed on the document id. The connection is behind
/// a mutex, so one sink can be shared across tasks.
#[derive(Debug)]
pub struct SqliteRecordSink {
    connection: Mutex<Connection>,
    batch_size: usize,
}

impl SqliteRecordSink {
    /// Open (or create) a database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the file cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let connection = Connection::open(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(connection)
    }

    /// Open an in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the schema cannot be applied.
    pub fn in_memory() -> Result<Self, SinkError> {
        let connection = Connection::open_in_memory().map_err(|source| SinkError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_connection(connection)
    }

    /// Override the number of records written per transaction.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn with_connection(connection: Connection) -> Result<Self, SinkError> {
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    id          TEXT PRIMARY KEY,
                    name        TEXT NOT NULL,
                    latitude    REAL NOT NULL,
                    longitude   REAL NOT NULL,
                    geohash     TEXT NOT NULL,
                    rating      REAL,
                    description TEXT,
                    country     TEXT,
                    region      TEXT,
                    amenities   TEXT NOT NULL,
                    tags        TEXT NOT NULL,
                    source      TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS records_geohash ON records (geohash);
                CREATE TABLE IF NOT EXISTS sink_metadata (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )
            .map_err(|source| SinkError::Schema { source })?;
        Ok(Self {
            connection: Mutex::new(connection),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store all records in batch-sized upsert transactions.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] on the first failed write; earlier committed
    /// batches remain stored.
    pub fn store_all(&self, records: &[SpatialRecord]) -> Result<(), SinkError> {
        let mut connection = self.lock();
        for chunk in records.chunks(self.batch_size) {
            let transaction = connection
                .transaction()
                .map_err(|source| SinkError::BeginTransaction { source })?;
            for record in chunk {
                let amenities = serde_json::to_string(&record.amenities).map_err(|source| {
                    SinkError::Serialise {
                        id: record.id.clone(),
                        source,
                    }
                })?;
                let tags =
                    serde_json::to_string(&record.tags).map_err(|source| SinkError::Serialise {
                        id: record.id.clone(),
                        source,
                    })?;
                transaction
                    .execute(
                        "INSERT OR REPLACE INTO records
                            (id, name, latitude, longitude, geohash, rating,
                             description, country, region, amenities, tags, source)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        params![
                            record.id,
                            record.name,
                            record.latitude(),
                            record.longitude(),
                            record.geohash,
                            record.rating,
                            record.description,
                            record.country,
                            record.region,
                            amenities,
                            tags,
                            record.source,
                        ],
                    )
                    .map_err(|source| SinkError::PersistRow {
                        id: record.id.clone(),
                        source,
                    })?;
            }
            Self::touch_metadata(&transaction)?;
            transaction
                .commit()
                .map_err(|source| SinkError::Commit { source })?;
        }
        Ok(())
    }

    fn touch_metadata(transaction: &rusqlite::Transaction<'_>) -> Result<(), SinkError> {
        let total: i64 = transaction
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(|source| SinkError::Query { source })?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        transaction
            .execute(
                "INSERT OR REPLACE INTO sink_metadata (key, value)
                 VALUES ('total_count', ?1), ('last_updated', ?2)",
                params![total.to_string(), now.to_string()],
            )
            .map_err(|source| SinkError::PersistRow {
                id: "sink_metadata".to_owned(),
                source,
            })?;
        Ok(())
    }

    /// Number of records currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Query`] if the count query fails.
    pub fn total_records(&self) -> Result<u64, SinkError> {
        let connection = self.lock();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(|source| SinkError::Query { source })?;
        Ok(count.max(0) as u64)
    }

    /// Fetch every record whose geohash starts with `prefix`, ordered by
    /// geohash.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Query`] if the lookup fails.
    pub fn records_with_prefix(&self, prefix: &str) -> Result<Vec<SpatialRecord>, SinkError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(
                "SELECT id, name, latitude, longitude, geohash, rating,
                        description, country, region, amenities, tags, source
                 FROM records WHERE geohash LIKE ?1 || '%' ORDER BY geohash",
            )
            .map_err(|source| SinkError::Query { source })?;
        let rows = statement
            .query_map(params![prefix], row_to_record)
            .map_err(|source| SinkError::Query { source })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|source| SinkError::Query { source })
    }

    /// Fetch records within `radius_km` of a point.
    ///
    /// A shared geohash prefix narrows the candidate set. The match runs
    /// both ways: a record stored at a coarser precision has a shorter
    /// geohash whose cell contains the query cell, so it is a candidate
    /// too. Records near a cell boundary can fall outside the centre
    /// cell, so the distance check on the candidates is the authority.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Query`] if the lookup fails.
    pub fn records_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<SpatialRecord>, SinkError> {
        let prefix = match geohash::encode(latitude, longitude, PROXIMITY_PREFIX_LEN) {
            Ok(hash) => hash,
            Err(err) => {
                log::warn!("proximity query rejected: {err}");
                return Ok(Vec::new());
            }
        };
        let candidates = {
            let connection = self.lock();
            let mut statement = connection
                .prepare(
                    "SELECT id, name, latitude, longitude, geohash, rating,
                            description, country, region, amenities, tags, source
                     FROM records
                     WHERE geohash LIKE ?1 || '%' OR ?1 LIKE geohash || '%'
                     ORDER BY geohash",
                )
                .map_err(|source| SinkError::Query { source })?;
            let rows = statement
                .query_map(params![prefix], row_to_record)
                .map_err(|source| SinkError::Query { source })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|source| SinkError::Query { source })?
        };
        Ok(candidates
            .into_iter()
            .filter(|record| {
                region::distance_km(latitude, longitude, record.latitude(), record.longitude())
                    <= radius_km
            })
            .collect())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpatialRecord> {
    let amenities_json: String = row.get("amenities")?;
    let tags_json: String = row.get("tags")?;
    Ok(SpatialRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        location: Coord {
            x: row.get("longitude")?,
            y: row.get("latitude")?,
        },
        geohash: row.get("geohash")?,
        rating: row.get("rating")?,
        description: row.get("description")?,
        country: row.get("country")?,
        region: row.get("region")?,
        amenities: serde_json::from_str(&amenities_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        source: row.get("source")?,
    })
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn store_batch(&self, records: &[SpatialRecord]) -> Result<(), SinkError> {
        self.store_all(records)
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<SpatialRecord>>>,
}

impl MemorySink {
    /// Batches received so far, in arrival order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<SpatialRecord>> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// All records received, flattened.
    #[must_use]
    pub fn records(&self) -> Vec<SpatialRecord> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn store_batch(&self, records: &[SpatialRecord]) -> Result<(), SinkError> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    fn record_at(id: &str, name: &str, latitude: f64, longitude: f64) -> SpatialRecord {
        SpatialRecord {
            id: id.to_owned(),
            name: name.to_owned(),
            location: Coord {
                x: longitude,
                y: latitude,
            },
            geohash: geohash::encode(latitude, longitude, geohash::DEFAULT_PRECISION)
                .expect("test coordinates are valid"),
            rating: Some(4.3),
            description: Some("A sandy beach.".to_owned()),
            country: Some("AU".to_owned()),
            region: Some("NSW".to_owned()),
            amenities: vec!["Toilets".to_owned()],
            tags: HashMap::from([("natural".to_owned(), "beach".to_owned())]),
            source: "OpenStreetMap".to_owned(),
        }
    }

    #[fixture]
    fn sink() -> SqliteRecordSink {
        SqliteRecordSink::in_memory().expect("in-memory sink should open")
    }

    #[rstest]
    fn storing_the_same_id_twice_keeps_one_row(sink: SqliteRecordSink) {
        let first = record_at("osm_way_1", "Bondi Beach", -33.8915, 151.2767);
        let mut second = first.clone();
        second.rating = Some(4.8);

        sink.store_all(&[first]).expect("first write");
        sink.store_all(&[second]).expect("second write");

        assert_eq!(sink.total_records().unwrap(), 1);
        let rows = sink.records_with_prefix("").unwrap();
        assert_eq!(rows[0].rating, Some(4.8));
    }

    #[rstest]
    fn round_trips_every_field(sink: SqliteRecordSink) {
        let record = record_at("osm_way_1", "Bondi Beach", -33.8915, 151.2767);
        sink.store_all(std::slice::from_ref(&record)).expect("write");

        let rows = sink.records_with_prefix(&record.geohash).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], record);
    }

    #[rstest]
    fn prefix_query_matches_only_that_cell(sink: SqliteRecordSink) {
        let sydney = record_at("osm_way_1", "Bondi Beach", -33.8915, 151.2767);
        let cornwall = record_at("osm_way_2", "Fistral Beach", 50.4161, -5.0931);
        sink.store_all(&[sydney.clone(), cornwall]).expect("write");

        let prefix = &sydney.geohash[..PROXIMITY_PREFIX_LEN];
        let rows = sink.records_with_prefix(prefix).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "osm_way_1");
    }

    #[rstest]
    fn file_backed_database_survives_reopen() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("records.db");
        {
            let sink = SqliteRecordSink::open(&path).expect("database should open");
            let record = record_at("osm_way_1", "Bondi Beach", -33.8915, 151.2767);
            sink.store_all(std::slice::from_ref(&record)).expect("write");
        }

        let reopened = SqliteRecordSink::open(&path).expect("database should reopen");
        assert_eq!(reopened.total_records().unwrap(), 1);
        let rows = reopened.records_with_prefix("").unwrap();
        assert_eq!(rows[0].id, "osm_way_1");
        assert_eq!(rows[0].name, "Bondi Beach");
    }

    #[rstest]
    fn opening_an_unreachable_path_reports_it() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("missing").join("records.db");

        let err = SqliteRecordSink::open(&path).expect_err("open should fail");
        match err {
            SinkError::Open { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Open, found {other:?}"),
        }
    }

    #[rstest]
    fn proximity_query_filters_by_distance(sink: SqliteRecordSink) {
        // Both points share the five-character cell around the origin;
        // only the radius separates them.
        let near = record_at("osm_node_1", "Near Beach", 0.001, 0.001);
        let far = record_at("osm_node_2", "Far Beach", 0.02, 0.02);
        sink.store_all(&[near, far]).expect("write");

        let within_two = sink.records_near(0.0, 0.0, 2.0).unwrap();
        assert_eq!(within_two.len(), 1);
        assert_eq!(within_two[0].id, "osm_node_1");

        let within_ten = sink.records_near(0.0, 0.0, 10.0).unwrap();
        assert_eq!(within_ten.len(), 2);
    }

    #[rstest]
    fn proximity_query_matches_coarser_geohashes(sink: SqliteRecordSink) {
        // Stored at precision 3: the geohash is shorter than the query
        // prefix, and its cell contains the query point.
        let mut coarse = record_at("osm_node_1", "Shell Beach", 0.001, 0.001);
        coarse.geohash = geohash::encode(0.001, 0.001, 3).expect("valid coordinates");
        sink.store_all(std::slice::from_ref(&coarse)).expect("write");

        let found = sink.records_near(0.0, 0.0, 2.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "osm_node_1");
    }

    #[rstest]
    fn batches_are_committed_independently(sink: SqliteRecordSink) {
        let sink = sink.with_batch_size(2);
        let records: Vec<SpatialRecord> = (0..5)
            .map(|i| {
                record_at(
                    &format!("osm_node_{i}"),
                    "Shell Beach",
                    10.0 + f64::from(i) * 0.01,
                    20.0,
                )
            })
            .collect();
        sink.store_all(&records).expect("write");
        assert_eq!(sink.total_records().unwrap(), 5);
    }

    #[tokio::test]
    async fn memory_sink_keeps_batches_in_order() {
        let sink = MemorySink::default();
        let first = record_at("osm_way_1", "Bondi Beach", -33.8915, 151.2767);
        let second = record_at("osm_way_2", "Manly Beach", -33.7971, 151.2878);

        sink.store_batch(std::slice::from_ref(&first)).await.unwrap();
        sink.store_batch(std::slice::from_ref(&second)).await.unwrap();

        assert_eq!(sink.batches().len(), 2);
        let records = sink.records();
        assert_eq!(records[0].id, "osm_way_1");
        assert_eq!(records[1].id, "osm_way_2");
    }
}
