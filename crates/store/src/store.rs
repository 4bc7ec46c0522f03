//! The trace store.
//!
//! A single-file redb database holding compressed span records partitioned by
//! service and calendar month (see [`crate::partition`]). Every operation
//! runs inside one transaction: writes get the single read-write transaction,
//! reads get an MVCC snapshot and may proceed concurrently.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use opentelemetry_proto::tonic::common::v1::any_value;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, Span};
use parking_lot::RwLock;
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata,
    TableDefinition, TableError, TableHandle,
};
use snafu::{ensure, OptionExt, ResultExt};

use crate::codec;
use crate::error::{
    ClosedSnafu, CommitSnafu, EncodeSnafu, InvalidHexSnafu, OpenSnafu, Result, SpanIdLengthSnafu,
    StorageSnafu, TableSnafu, TransactionSnafu,
};
use crate::keys::{self, SPAN_ID_LEN};
use crate::partition::{self, table_name};
use crate::summary::{MonthStats, PartitionStats, ServiceSummary, SpanSummary, SpanTree};

/// Retention horizon applied when the caller passes zero or a negative value.
pub const DEFAULT_RETENTION_DAYS: i64 = 60;

/// Result cap for [`TraceStore::get_spans`] when the caller passes `limit <= 0`.
pub const DEFAULT_SPAN_LIMIT: usize = 50;

/// Result cap for [`TraceStore::get_trace_ids`] when the caller passes `limit <= 0`.
pub const DEFAULT_TRACE_ID_LIMIT: usize = 100;

/// Half-width in minutes of the window scanned around an anchor span when
/// reconstructing its trace. A policy constant bounding the clock skew
/// tolerated across the services participating in one trace.
const TREE_WINDOW_MINUTES: i64 = 2;

const SERVICE_NAME_ATTR: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown";

/// Embedded trace-span store.
///
/// The handle owns exclusive access to the database file. [`TraceStore::close`]
/// releases it; every operation after close fails with [`StoreError::Closed`].
///
/// [`StoreError::Closed`]: crate::StoreError::Closed
pub struct TraceStore {
    db: RwLock<Option<Database>>,
    retention_days: i64,
}

impl TraceStore {
    /// Open or create the database at `path`.
    ///
    /// `retention_days` controls how long month partitions are kept;
    /// zero or negative selects [`DEFAULT_RETENTION_DAYS`].
    pub fn open(path: impl AsRef<Path>, retention_days: i64) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)
        } else {
            Database::create(path)
        }
        .context(OpenSnafu { path })?;

        let retention_days = if retention_days <= 0 {
            DEFAULT_RETENTION_DAYS
        } else {
            retention_days
        };

        Ok(Self {
            db: RwLock::new(Some(db)),
            retention_days,
        })
    }

    /// Release the database file. Idempotent; any in-flight operation
    /// finishes first, and every later operation fails.
    pub fn close(&self) {
        self.db.write().take();
    }

    /// The configured retention horizon in days.
    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    fn with_db<T>(&self, op: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        let db = guard.as_ref().context(ClosedSnafu)?;
        op(db)
    }

    /// Store every span in `batch` as its own record.
    ///
    /// Each span lands in the `{service}/{YYYY-MM}` partition of its start
    /// time (or of "now" when the start time is zero), keyed by
    /// [`keys::span_key`] and wrapped with the batch's original resource and
    /// scope. All spans commit atomically or not at all.
    pub fn write_resource_spans(&self, batch: &ResourceSpans) -> Result<()> {
        let service = service_name(batch);
        let mut rng = rand::thread_rng();

        // Fan the batch out into per-partition (key, value) pairs up front so
        // the write transaction only inserts.
        let mut records: BTreeMap<String, Vec<([u8; keys::KEY_LEN], Vec<u8>)>> = BTreeMap::new();
        for scope in &batch.scope_spans {
            for span in &scope.spans {
                let start = span_start_time(span);
                let key = keys::span_key(start, &span.span_id, &mut rng);
                let entry = codec::single_span_entry(batch, scope, span);
                let value = codec::encode_entry(&entry).context(EncodeSnafu)?;
                records
                    .entry(table_name(&service, &partition::month_name(start)))
                    .or_default()
                    .push((key, value));
            }
        }

        self.with_db(|db| {
            if records.is_empty() {
                return Ok(());
            }
            let txn = db.begin_write().context(TransactionSnafu)?;
            for (name, entries) in &records {
                let mut table = txn.open_table(span_table(name)).context(TableSnafu)?;
                for (key, value) in entries {
                    table.insert(&key[..], &value[..]).context(StorageSnafu)?;
                }
            }
            txn.commit().context(CommitSnafu)
        })
    }

    /// Up to `limit` span summaries for `service`, newest first.
    ///
    /// `limit <= 0` selects [`DEFAULT_SPAN_LIMIT`]. An unknown service yields
    /// an empty result. Walks month partitions newest-first with a reverse
    /// cursor, so cost is proportional to `limit`, not to the partition size.
    pub fn get_spans(&self, service: &str, limit: i64) -> Result<Vec<SpanSummary>> {
        let limit = effective_limit(limit, DEFAULT_SPAN_LIMIT);
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let mut result = Vec::new();
            for month in &months_newest_first(&txn, service)? {
                if result.len() >= limit {
                    break;
                }
                let Some(table) = open_month(&txn, service, month)? else {
                    continue;
                };
                let mut records = table.iter().context(StorageSnafu)?;
                while result.len() < limit {
                    let Some(record) = records.next_back() else {
                        break;
                    };
                    let (_, value) = record.context(StorageSnafu)?;
                    let Ok(span) = codec::decode_span(value.value()) else {
                        continue;
                    };
                    result.push(SpanSummary::from_span(&span, month));
                }
            }
            Ok(result)
        })
    }

    /// Up to `limit` distinct trace identifiers for `service`, newest first
    /// by the first span seen for each trace.
    ///
    /// `limit <= 0` selects [`DEFAULT_TRACE_ID_LIMIT`].
    pub fn get_trace_ids(&self, service: &str, limit: i64) -> Result<Vec<String>> {
        let limit = effective_limit(limit, DEFAULT_TRACE_ID_LIMIT);
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let mut seen = HashSet::new();
            let mut result = Vec::new();
            for month in &months_newest_first(&txn, service)? {
                if result.len() >= limit {
                    break;
                }
                let Some(table) = open_month(&txn, service, month)? else {
                    continue;
                };
                let mut records = table.iter().context(StorageSnafu)?;
                while result.len() < limit {
                    let Some(record) = records.next_back() else {
                        break;
                    };
                    let (_, value) = record.context(StorageSnafu)?;
                    let Ok(span) = codec::decode_span(value.value()) else {
                        continue;
                    };
                    let trace_id = hex::encode(&span.trace_id);
                    if seen.insert(trace_id.clone()) {
                        result.push(trace_id);
                    }
                }
            }
            Ok(result)
        })
    }

    /// One summary per service: span count, distinct trace count, and the
    /// start time of the newest record.
    ///
    /// The last-updated time comes straight from the newest key's timestamp
    /// prefix, no decompression. The counts are the one full scan here.
    pub fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let mut result = Vec::new();
            for (service, mut months) in partitions(&txn)? {
                months.sort_unstable_by(|a, b| b.cmp(a));

                let mut summary = ServiceSummary {
                    name: service.clone(),
                    trace_count: 0,
                    span_count: 0,
                    last_updated: None,
                };

                if let Some(newest) = months.first() {
                    if let Some(table) = open_month(&txn, &service, newest)? {
                        if let Some((key, _)) = table.last().context(StorageSnafu)? {
                            summary.last_updated = keys::key_timestamp_ms(key.value())
                                .and_then(DateTime::from_timestamp_millis);
                        }
                    }
                }

                let mut seen = HashSet::new();
                for month in &months {
                    let Some(table) = open_month(&txn, &service, month)? else {
                        continue;
                    };
                    summary.span_count += table.len().context(StorageSnafu)?;
                    for record in table.iter().context(StorageSnafu)? {
                        let (_, value) = record.context(StorageSnafu)?;
                        let Ok(span) = codec::decode_span(value.value()) else {
                            continue;
                        };
                        if seen.insert(span.trace_id) {
                            summary.trace_count += 1;
                        }
                    }
                }

                result.push(summary);
            }
            Ok(result)
        })
    }

    /// Every span whose trace identifier equals `trace_id` (lowercase hex),
    /// across all services and months. Full scan; result order unspecified.
    pub fn get_trace_by_id(&self, trace_id: &str) -> Result<Vec<SpanSummary>> {
        let wanted = hex::decode(trace_id).context(InvalidHexSnafu { input: trace_id })?;
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let mut result = Vec::new();
            for (service, months) in partitions(&txn)? {
                for month in &months {
                    let Some(table) = open_month(&txn, &service, month)? else {
                        continue;
                    };
                    for record in table.iter().context(StorageSnafu)? {
                        let (_, value) = record.context(StorageSnafu)?;
                        let Ok(span) = codec::decode_span(value.value()) else {
                            continue;
                        };
                        if span.trace_id == wanted {
                            result.push(SpanSummary::from_span(&span, month));
                        }
                    }
                }
            }
            Ok(result)
        })
    }

    /// Locate the span with the given raw 8-byte identifier, then collect all
    /// same-trace spans across every service within ±2 minutes of its start.
    ///
    /// Returns `None` when no stored key carries the identifier. The anchor
    /// search compares key suffixes only; values are decoded once a suffix
    /// matches. Both window boundaries are inclusive. Span identifiers are
    /// assumed unique per deployment: the first suffix match wins.
    pub fn get_span_tree(&self, span_id: &[u8]) -> Result<Option<SpanTree>> {
        ensure!(
            span_id.len() == SPAN_ID_LEN,
            SpanIdLengthSnafu { len: span_id.len() }
        );
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let Some(anchor) = find_anchor(&txn, span_id)? else {
                return Ok(None);
            };
            let from = anchor.start_time - Duration::minutes(TREE_WINDOW_MINUTES);
            let to = anchor.start_time + Duration::minutes(TREE_WINDOW_MINUTES);
            let spans = scan_window(&txn, &anchor.trace_id, from, to)?;
            Ok(Some(SpanTree {
                trace_id: anchor.trace_id,
                spans,
            }))
        })
    }

    /// Drop every month partition whose end-of-month boundary lies strictly
    /// before `now - retention`. Runs in one write transaction; a month whose
    /// name does not parse is preserved. Dropping a service's last month
    /// partition removes the service.
    pub fn cleanup(&self) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        self.with_db(|db| {
            let txn = db.begin_write().context(TransactionSnafu)?;
            let mut doomed = Vec::new();
            for handle in txn.list_tables().context(StorageSnafu)? {
                let name = handle.name().to_owned();
                let Some((_, month)) = partition::parse_table_name(&name) else {
                    continue;
                };
                let Some(end) = partition::end_of_month(month) else {
                    continue;
                };
                if end < cutoff {
                    doomed.push(name);
                }
            }
            for name in &doomed {
                txn.delete_table(span_table(name)).context(TableSnafu)?;
            }
            txn.commit().context(CommitSnafu)
        })
    }

    /// Atomically drop the named service and every month inside it.
    /// Succeeds without change when the service does not exist.
    pub fn delete_service(&self, service: &str) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write().context(TransactionSnafu)?;
            let mut doomed = Vec::new();
            for handle in txn.list_tables().context(StorageSnafu)? {
                let name = handle.name().to_owned();
                if partition::parse_table_name(&name).is_some_and(|(svc, _)| svc == service) {
                    doomed.push(name);
                }
            }
            for name in &doomed {
                txn.delete_table(span_table(name)).context(TableSnafu)?;
            }
            txn.commit().context(CommitSnafu)
        })
    }

    /// Per-service, per-month record counts.
    pub fn partition_stats(&self) -> Result<Vec<PartitionStats>> {
        self.with_db(|db| {
            let txn = db.begin_read().context(TransactionSnafu)?;
            let mut result = Vec::new();
            for (service, months) in partitions(&txn)? {
                let mut stats = PartitionStats {
                    service: service.clone(),
                    months: Vec::with_capacity(months.len()),
                };
                for month in &months {
                    let Some(table) = open_month(&txn, &service, month)? else {
                        continue;
                    };
                    stats.months.push(MonthStats {
                        month: month.clone(),
                        span_count: table.len().context(StorageSnafu)?,
                    });
                }
                result.push(stats);
            }
            Ok(result)
        })
    }
}

fn effective_limit(limit: i64, default: usize) -> usize {
    if limit <= 0 {
        default
    } else {
        limit as usize
    }
}

fn span_table(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

type MonthTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// Open a month partition for reading; `None` when it does not exist.
fn open_month(txn: &ReadTransaction, service: &str, month: &str) -> Result<Option<MonthTable>> {
    let name = table_name(service, month);
    match txn.open_table(span_table(&name)) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(source) => Err(source).context(TableSnafu),
    }
}

/// All partitions grouped by service, months ascending.
fn partitions(txn: &ReadTransaction) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for handle in txn.list_tables().context(StorageSnafu)? {
        if let Some((service, month)) = partition::parse_table_name(handle.name()) {
            map.entry(service.to_owned()).or_default().push(month.to_owned());
        }
    }
    for months in map.values_mut() {
        months.sort_unstable();
    }
    Ok(map)
}

/// Month names of one service, newest first. String sort on `YYYY-MM`
/// matches chronological sort.
fn months_newest_first(txn: &ReadTransaction, service: &str) -> Result<Vec<String>> {
    let mut months = Vec::new();
    for handle in txn.list_tables().context(StorageSnafu)? {
        if let Some((svc, month)) = partition::parse_table_name(handle.name()) {
            if svc == service {
                months.push(month.to_owned());
            }
        }
    }
    months.sort_unstable_by(|a, b| b.cmp(a));
    Ok(months)
}

/// Forward-scan every partition for a key whose suffix equals `span_id`,
/// decoding only the matching record.
fn find_anchor(txn: &ReadTransaction, span_id: &[u8]) -> Result<Option<SpanSummary>> {
    for (service, months) in partitions(txn)? {
        for month in &months {
            let Some(table) = open_month(txn, &service, month)? else {
                continue;
            };
            for record in table.iter().context(StorageSnafu)? {
                let (key, value) = record.context(StorageSnafu)?;
                if keys::key_span_id(key.value()) != Some(span_id) {
                    continue;
                }
                match codec::decode_span(value.value()) {
                    Ok(span) => return Ok(Some(SpanSummary::from_span(&span, month))),
                    Err(_) => continue,
                }
            }
        }
    }
    Ok(None)
}

/// Collect spans of `trace_id` with keys inside `[from, to]` across every
/// service, seeking directly to the window's lower bound in each partition.
fn scan_window(
    txn: &ReadTransaction,
    trace_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<SpanSummary>> {
    let lo = keys::lower_bound_key(from);
    let hi = keys::upper_bound_key(to);
    let months = partition::months_in_range(from, to);

    let mut result = Vec::new();
    let parts = partitions(txn)?;
    for service in parts.keys() {
        for month in &months {
            let Some(table) = open_month(txn, service, month)? else {
                continue;
            };
            for record in table.range(&lo[..]..=&hi[..]).context(StorageSnafu)? {
                let (_, value) = record.context(StorageSnafu)?;
                let Ok(span) = codec::decode_span(value.value()) else {
                    continue;
                };
                if hex::encode(&span.trace_id) != trace_id {
                    continue;
                }
                result.push(SpanSummary::from_span(&span, month));
            }
        }
    }
    Ok(result)
}

/// The `service.name` resource attribute, or `unknown` when the resource or
/// the attribute is absent. A non-string value yields an empty name, matching
/// the OTLP convention of coercing non-string service names to empty.
fn service_name(batch: &ResourceSpans) -> String {
    let Some(resource) = batch.resource.as_ref() else {
        return UNKNOWN_SERVICE.to_owned();
    };
    resource
        .attributes
        .iter()
        .find(|kv| kv.key == SERVICE_NAME_ATTR)
        .map(|kv| match kv.value.as_ref().and_then(|v| v.value.as_ref()) {
            Some(any_value::Value::StringValue(s)) => s.clone(),
            _ => String::new(),
        })
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_owned())
}

/// A span's partition timestamp: its start time, or "now" when unset.
fn span_start_time(span: &Span) -> DateTime<Utc> {
    if span.start_time_unix_nano > 0 {
        DateTime::from_timestamp_nanos(span.start_time_unix_nano as i64)
    } else {
        Utc::now()
    }
}
