use std::path::Path;

use error::Result;
use scenario::Scenario;
use schedule::Schedule;

pub mod config;
pub mod error;
pub mod functional_unit;
pub mod inst;
pub mod program;
pub mod rat;
pub mod reservation_station;
pub mod scenario;
pub mod schedule;
pub mod scheduler;
pub mod trace;
pub mod util;

/// Reads a scenario, as JSON when the file ends in `.json` and in the
/// sectioned text format otherwise.
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;

    tracing::debug!(path = %path.display(), "reading scenario");
    if path.extension().map_or(false, |ext| ext == "json") {
        Scenario::from_json(&contents)
    } else {
        contents.parse()
    }
}

/// Runs `scenarios/{name}.txt` to completion.
pub fn parse_and_run(name: &str, trace: bool) -> Result<Schedule> {
    let scenario = load_scenario(format!("scenarios/{name}.txt"))?;
    let mut scheduler = scenario.build()?;
    scheduler.set_trace(trace);
    scheduler.run()
}
