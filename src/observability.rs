//! Metric names. Recording goes through the `metrics` facade; installing an
//! exporter is up to the host process.

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: sessions committed (single bookings and series occurrences).
pub const SESSIONS_BOOKED_TOTAL: &str = "classtime_sessions_booked_total";

/// Counter: booking attempts refused. Labels: kind.
pub const BOOKING_REJECTIONS_TOTAL: &str = "classtime_booking_rejections_total";

/// Histogram: slot search latency in seconds. Labels: mode (`preferred`, `open`).
pub const SLOT_SEARCH_DURATION_SECONDS: &str = "classtime_slot_search_duration_seconds";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: prepaid minutes drawn from lots.
pub const MINUTES_CONSUMED_TOTAL: &str = "classtime_minutes_consumed_total";

/// Counter: consumptions refused for insufficient balance.
pub const LEDGER_SHORTFALLS_TOTAL: &str = "classtime_ledger_shortfalls_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: number of loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "classtime_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "classtime_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "classtime_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "classtime_wal_compactions_total";
