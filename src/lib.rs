//! Multi-tenant scheduling and time-credit engine for tutoring institutions.
//!
//! [`tenant::TenantManager`] resolves a tenant to its [`engine::Engine`], which
//! validates bookings against instructor availability, ranks candidate slots,
//! runs the session lifecycle and draws prepaid minutes from expiring lots.
//! Every state change is written to a per-tenant WAL before it is applied.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod tenant;
pub mod time;
pub mod wal;
