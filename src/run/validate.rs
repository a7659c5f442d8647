use crate::errors::PlanError;
use crate::scenario::{
    build,
    Scenario,
};

pub(super) fn run(scenario_file: &str) -> Result<(), PlanError> {
    let start = std::time::Instant::now();

    let scenario_yaml = std::fs::read_to_string(scenario_file)
        .map_err(|err| PlanError::NoSuchFile(err, scenario_file.to_string()))?;

    let scenario = Scenario::from_yaml(&scenario_yaml)?;
    let input = build::build(&scenario)?;

    println!(
        "scenario ok: {} disks, {} requests, validated in {:?}",
        input.graph.disks.len(),
        input.devices.partitions.len(),
        start.elapsed(),
    );

    Ok(())
}
