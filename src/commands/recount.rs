use anyhow::Result;

use crate::commands::CommandReport;
use crate::lotw::config::load_config;
use crate::lotw::merge::update_record_count;
use crate::lotw::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths(&cfg)?;

    let count = update_record_count(&paths.log_file)?;
    let mut report = CommandReport::new("recount");
    report.detail(format!("log_file={}", paths.log_file.display()));
    report.detail(format!("records={count}"));
    Ok(report)
}
