use colored::Colorize;

use crate::cli;
use crate::entity::report::{
    PlanAction,
    PlanReport,
};
use crate::errors::PlanError;
use crate::proposal::Proposal;
use crate::scenario::{
    build,
    Scenario,
};

pub(super) fn run(
    scenario_file: &str,
    args_plan: cli::ArgsPlan,
) -> Result<(), PlanError> {
    let start = std::time::Instant::now();

    let scenario_yaml = std::fs::read_to_string(scenario_file)
        .map_err(|err| PlanError::NoSuchFile(err, scenario_file.to_string()))?;

    let scenario = Scenario::from_yaml(&scenario_yaml)?;
    let build::PlanInput {
        graph,
        analyzer,
        candidates,
        protected,
        settings,
        devices,
    } = build::build(&scenario)?;

    let proposal = Proposal {
        graph: &graph,
        analyzer: &analyzer,
        settings: &settings,
        candidates,
        protected,
        devices,
    };
    let outcome = proposal.propose()?;

    let report = PlanReport {
        actions: outcome.actions,
        duration: start.elapsed(),
    };

    if args_plan.json {
        println!("{}", report.to_json_string());
        return Ok(());
    }

    if report.actions.is_empty() {
        println!("{}", "nothing to change".green());
    }
    for action in &report.actions {
        println!("{}", describe(action));
    }

    println!();
    for disk in &outcome.devicegraph.disks {
        println!("{} ({})", disk.name.bold(), disk.size);

        if let Some(table) = disk.table() {
            for part in table.sorted() {
                let fs = part
                    .filesystem()
                    .map(|f| format!("{:?}", f.fs_type).to_lowercase())
                    .unwrap_or_else(|| "-".to_string());
                let mount = part.mount_point.as_deref().unwrap_or("");

                println!(
                    "  {:<16} {:>12}  {:<8} {}",
                    part.name,
                    part.size().to_string(),
                    fs,
                    mount,
                );
            }
        }
    }

    Ok(())
}

fn describe(action: &PlanAction) -> String {
    match action {
        PlanAction::DeletePartition { device, size } => {
            format!("{} {device} ({size})", "delete".red())
        }
        PlanAction::WipeDisk { device } => {
            format!("{} {device}", "wipe".red())
        }
        PlanAction::ResizePartition { device, from, to } => {
            format!("{} {device} ({from} -> {to})", "resize".yellow())
        }
        PlanAction::CreatePartitionTable { device, .. } => {
            format!("{} partition table on {device}", "create".green())
        }
        PlanAction::CreatePartition {
            device,
            size,
            mount_point,
            ..
        } => {
            let mount = mount_point.as_deref().unwrap_or("-");
            format!("{} {device} ({size}, {mount})", "create".green())
        }
        PlanAction::CreateLvmPv(device) => {
            format!("{} lvm pv on {device}", "create".green())
        }
        PlanAction::CreateLvmVg { vg, pvs } => {
            format!("{} vg {vg} over {}", "create".green(), pvs.join(", "))
        }
        PlanAction::ReuseDevice {
            device,
            mount_point,
        } => {
            let mount = mount_point.as_deref().unwrap_or("-");
            format!("{} {device} ({mount})", "reuse".blue())
        }
    }
}
