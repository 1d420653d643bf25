//! Periodic import of Gadgetbridge exports into InfluxDB.
//!
//! A run is strictly linear: [`fetch`] downloads the export into a scratch
//! directory, [`extract`] normalizes recent samples into [`record::Record`]s,
//! and [`load`] writes them as points. The scratch directory is removed when
//! the [`fetch::ScratchDir`] is dropped. [`pipeline::run`] ties the stages
//! together for the binary.

pub mod config;
pub mod exit;
pub mod extract;
pub mod fetch;
pub mod load;
pub mod pipeline;
pub mod record;
