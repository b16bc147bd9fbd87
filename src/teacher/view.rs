//! Pure projection of a roster into dashboard rows.

use super::roster::RosterState;
use crate::channel::ChannelState;
use crate::protocol::SuspicionLevel;
use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;

/// Visual severity class of a row, derived only from the suspicion level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    Low,
    Medium,
    High,
}

impl SeverityBand {
    /// Row background colour.
    pub fn background(&self) -> &'static str {
        match self {
            SeverityBand::Low => "#e8f5e9",
            SeverityBand::Medium => "#fff8e1",
            SeverityBand::High => "#ffebee",
        }
    }

    /// Whether rows in this band are marked for emphasis.
    pub fn flashes(&self) -> bool {
        matches!(self, SeverityBand::High)
    }
}

impl From<SuspicionLevel> for SeverityBand {
    fn from(level: SuspicionLevel) -> Self {
        match level {
            SuspicionLevel::Low => SeverityBand::Low,
            SuspicionLevel::Medium => SeverityBand::Medium,
            SuspicionLevel::High => SeverityBand::High,
        }
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterRow {
    pub student: String,
    pub status: String,
    pub level: SuspicionLevel,
    pub score: f64,
    pub last_update: DateTime<Utc>,
    pub band: SeverityBand,
    pub background: &'static str,
    pub flashing: bool,
    /// No update for longer than the stale threshold
    pub stale: bool,
}

/// Project the roster into rows, in roster order.
pub fn project(roster: &RosterState, now: DateTime<Utc>, stale_after: Duration) -> Vec<RosterRow> {
    roster
        .iter()
        .map(|snapshot| {
            let band = SeverityBand::from(snapshot.suspicion_level);
            RosterRow {
                student: snapshot.student.clone(),
                status: snapshot.status.clone(),
                level: snapshot.suspicion_level,
                score: snapshot.suspicion_score,
                last_update: snapshot.timestamp,
                band,
                background: band.background(),
                flashing: band.flashes(),
                stale: now - snapshot.timestamp > stale_after,
            }
        })
        .collect()
}

/// Render rows as a plain-text dashboard.
pub fn render_table(test_id: &str, rows: &[RosterRow], connection: ChannelState) -> String {
    let connection = match connection {
        ChannelState::Closed => "closed (data may be stale)".to_string(),
        other => other.to_string(),
    };

    let mut out = String::new();
    out.push_str(&format!("Live Proctoring: {test_id}\n"));
    out.push_str(&format!("Connection: {connection}\n\n"));
    out.push_str(&format!(
        "  {:<24} {:<12} {:<16} {:>6}  {}\n",
        "Student Name", "Status", "Suspicion Level", "Score", "Last Update"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(72)));

    if rows.is_empty() {
        out.push_str("  (no students yet)\n");
        return out;
    }

    for row in rows {
        let marker = if row.flashing { '!' } else { ' ' };
        let mut level = row.level.as_str().to_uppercase();
        if row.stale {
            level.push_str(" (stale)");
        }
        out.push_str(&format!(
            "{marker} {:<24} {:<12} {:<16} {:>6.2}  {}\n",
            row.student,
            row.status,
            level,
            row.score,
            row.last_update.with_timezone(&Local).format("%H:%M:%S"),
        ));
    }
    out
}
