//! Teacher side of the pipeline: live roster, alerts and dashboard rows for
//! one monitored test.

pub mod aggregator;
pub mod alert;
pub mod roster;
pub mod view;

pub use aggregator::{AggregatorError, TeacherAggregator};
pub use alert::{AlertSink, CountingAlert, LogAlert, TerminalBell};
pub use roster::{RosterState, Upsert};
pub use view::{project, render_table, RosterRow, SeverityBand};
