pub mod calendar;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod mail;
pub mod model;
pub mod notify;
pub mod observability;
pub mod stats;
pub mod wal;
