pub mod merge;
pub mod parse;
pub mod recount;
pub mod status;
pub mod update;

use serde::Serialize;

use crate::lotw::snapshot::DxccSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Totals shared by every command that ends with a fresh snapshot.
pub fn snapshot_details(report: &mut CommandReport, snapshot: &DxccSnapshot) {
    report.detail(format!("total_qso={}", snapshot.total_qso));
    report.detail(format!("total_qsl={}", snapshot.total_qsl));
    report.detail(format!("dxcc_confirmed={}", snapshot.dxcc_confirmed));
    report.detail(format!("dxcc_entities={}", snapshot.dxcc_stats.len()));
    if let Some(stamp) = snapshot.last_qso_rx.as_deref() {
        report.detail(format!("last_qso_rx={stamp}"));
    }
    if let Some(stamp) = snapshot.last_qsl.as_deref() {
        report.detail(format!("last_qsl={stamp}"));
    }
    if let Some(delta) = snapshot.incremental_stats {
        report.detail(format!(
            "new_qsos={} new_qsls={} new_dxccs={}",
            delta.new_qsos, delta.new_qsls, delta.new_dxccs
        ));
    }
}
