use std::collections::HashSet;

use crate::devicegraph::region::{
    Region,
    DEFAULT_BLOCK_SIZE,
};
use crate::devicegraph::{
    Devicegraph,
    DiskContent,
    Filesystem,
    PartitionContent,
    PartitionKind,
    ResizeInfo,
    Sid,
    TableKind,
};
use crate::entity::size::DiskSize;
use crate::errors::PlanError;
use crate::proposal::analyzer::DiskAnalyzer;
use crate::proposal::planned::{
    PlannedDevices,
    PlannedPartition,
    PlannedVg,
};
use crate::proposal::settings::SpaceSettings;

use super::{
    Scenario,
    ScenarioPartition,
};

/// Everything the planner needs, extracted from a parsed scenario
#[derive(Debug)]
pub struct PlanInput {
    pub graph: Devicegraph,
    pub analyzer: DiskAnalyzer,
    pub candidates: Vec<String>,
    pub protected: HashSet<Sid>,
    pub settings: SpaceSettings,
    pub devices: PlannedDevices,
}

pub fn build(scenario: &Scenario) -> Result<PlanInput, PlanError> {
    let mut graph = Devicegraph::new();
    let mut windows_sids: HashSet<Sid> = HashSet::new();
    let mut vg_names: HashSet<String> = HashSet::new();

    for disk in &scenario.disks {
        let disk_sid =
            graph.add_disk(&disk.device, disk.size, DEFAULT_BLOCK_SIZE);

        if let Some(vg) = &disk.pv {
            if !disk.partitions.is_empty() {
                return Err(PlanError::BadScenario(format!(
                    "disk {} is a direct pv and cannot have partitions",
                    disk.device,
                )));
            }

            vg_names.insert(vg.clone());
            if let Some(d) = graph.disk_by_sid_mut(disk_sid) {
                d.content = DiskContent::Direct(PartitionContent::LvmPv {
                    vg: Some(vg.clone()),
                });
            }
            continue;
        }

        if let Some(fs_type) = disk.fs {
            if !disk.partitions.is_empty() {
                return Err(PlanError::BadScenario(format!(
                    "disk {} is directly formatted and cannot have partitions",
                    disk.device,
                )));
            }

            if let Some(d) = graph.disk_by_sid_mut(disk_sid) {
                d.content =
                    DiskContent::Direct(PartitionContent::Filesystem(Filesystem {
                        fs_type,
                        label: None,
                        uuid: None,
                    }));
            }
            continue;
        }

        if disk.table.is_none() && disk.partitions.is_empty() {
            // A truly bare disk
            continue;
        }

        let kind = disk.table.unwrap_or(TableKind::Gpt);
        graph.ensure_table(disk_sid, kind)?;

        lay_out_partitions(
            &mut graph,
            disk_sid,
            &disk.device,
            disk.size,
            kind,
            &disk.partitions,
            &mut windows_sids,
            &mut vg_names,
        )?;
    }

    for name in &vg_names {
        graph.create_vg(name, DiskSize::mib(4));
    }

    let mut protected = HashSet::new();
    for name in scenario.protected.iter().flatten() {
        let sid = graph
            .find_by_name(name)
            .ok_or_else(|| PlanError::NoSuchDevice(name.clone()))?;
        protected.insert(sid);
    }

    let candidates = match &scenario.candidates {
        Some(candidates) => {
            for name in candidates {
                if graph.find_disk(name).is_none() {
                    return Err(PlanError::NoSuchDevice(name.clone()));
                }
            }
            candidates.clone()
        }
        None => graph.disks.iter().map(|d| d.name.clone()).collect(),
    };

    let devices = planned_devices(scenario, &graph)?;

    Ok(PlanInput {
        graph,
        analyzer: DiskAnalyzer::new(windows_sids),
        candidates,
        protected,
        settings: scenario.settings.clone(),
        devices,
    })
}

#[allow(clippy::too_many_arguments)]
fn lay_out_partitions(
    graph: &mut Devicegraph,
    disk_sid: Sid,
    device: &str,
    disk_size: DiskSize,
    table_kind: TableKind,
    partitions: &[ScenarioPartition],
    windows_sids: &mut HashSet<Sid>,
    vg_names: &mut HashSet<String>,
) -> Result<(), PlanError> {
    let grain_blocks =
        table_kind.align_grain().bytes() / DEFAULT_BLOCK_SIZE;
    let disk_blocks = disk_size.bytes() / DEFAULT_BLOCK_SIZE;

    let mut cursor = table_kind.start_overhead().bytes() / DEFAULT_BLOCK_SIZE;
    let mut extended: Option<Region> = None;

    for part in partitions {
        let kind = part.kind.unwrap_or(PartitionKind::Primary);

        let start = match part.start {
            Some(offset) => offset.bytes() / DEFAULT_BLOCK_SIZE,
            // Logicals leave one grain in front for the EBR
            None if kind == PartitionKind::Logical => cursor + grain_blocks,
            None => cursor,
        };
        let length = part.size.bytes() / DEFAULT_BLOCK_SIZE;
        let region = Region::new(start, length, DEFAULT_BLOCK_SIZE);

        if start + length > disk_blocks {
            return Err(PlanError::BadScenario(format!(
                "partition of {} exceeds the disk ({} past block {start})",
                device, part.size,
            )));
        }

        match kind {
            PartitionKind::Extended => {
                if extended.is_some() {
                    return Err(PlanError::BadScenario(format!(
                        "disk {device} has more than one extended partition",
                    )));
                }
                extended = Some(region);
            }
            PartitionKind::Logical => match &extended {
                Some(ext) if ext.contains(&region) => {}
                _ => {
                    return Err(PlanError::BadScenario(format!(
                        "logical partition of {device} lies outside the extended one",
                    )));
                }
            },
            PartitionKind::Primary => {}
        }

        let content = partition_content(device, part)?;
        if let PartitionContent::LvmPv { vg: Some(vg) } = &content {
            vg_names.insert(vg.clone());
        }

        let sid = graph
            .create_partition(disk_sid, region, kind, content)
            .map_err(|_| {
                PlanError::BadScenario(format!(
                    "overlapping partitions on {device}",
                ))
            })?;

        if part.windows_system.unwrap_or(false) {
            windows_sids.insert(sid);
        }

        if let Some(resize) = &part.resize {
            if let Some(p) = graph.partition_mut(sid) {
                p.resize = Some(ResizeInfo {
                    min_size: resize.min,
                    max_size: resize.max.unwrap_or(part.size),
                });
            }
        }

        // Keep packing after the new partition; an extended one resets
        // the cursor so its logicals pack inside
        cursor = match kind {
            PartitionKind::Extended => start,
            _ => cursor.max(start + length),
        };
    }

    Ok(())
}

fn partition_content(
    device: &str,
    part: &ScenarioPartition,
) -> Result<PartitionContent, PlanError> {
    let claims = [
        part.fs.is_some(),
        part.vg.is_some(),
        part.raid.is_some(),
        part.multi_fs.is_some(),
    ]
    .iter()
    .filter(|&&c| c)
    .count();
    if claims > 1 {
        return Err(PlanError::BadScenario(format!(
            "partition on {device} declares more than one content",
        )));
    }

    if let Some(vg) = &part.vg {
        return Ok(PartitionContent::LvmPv {
            vg: Some(vg.clone()),
        });
    }
    if let Some(raid) = &part.raid {
        return Ok(PartitionContent::RaidMember { raid: raid.clone() });
    }
    if let Some(fs) = &part.multi_fs {
        return Ok(PartitionContent::MultiFsMember { fs: fs.clone() });
    }
    if let Some(fs_type) = part.fs {
        return Ok(PartitionContent::Filesystem(Filesystem {
            fs_type,
            label: part.label.clone(),
            uuid: part.uuid.clone(),
        }));
    }

    Ok(PartitionContent::Empty)
}

fn planned_devices(
    scenario: &Scenario,
    graph: &Devicegraph,
) -> Result<PlannedDevices, PlanError> {
    let mut partitions = Vec::new();

    for planned in &scenario.planned {
        if let Some(disk) = &planned.disk {
            if graph.find_disk(disk).is_none() {
                return Err(PlanError::NoSuchDevice(disk.clone()));
            }
        }

        partitions.push(PlannedPartition {
            mount_point: planned.mount.clone(),
            fs_type: planned.fs,
            min_size: planned.min.unwrap_or_else(DiskSize::zero),
            desired_size: planned.desired,
            max_size: planned.max.unwrap_or_else(DiskSize::unlimited),
            weight: planned.weight.unwrap_or(1),
            disk: planned.disk.clone(),
            reuse: planned.reuse.clone(),
            boot: planned.boot.unwrap_or(false),
            ..Default::default()
        });
    }

    let vgs = scenario
        .planned_vgs
        .iter()
        .flatten()
        .map(|vg| {
            let mut planned = PlannedVg::new(
                &vg.name,
                vg.strategy.as_deref().unwrap_or("use_needed"),
                vg.size,
            );
            if let Some(extent) = vg.extent_size {
                planned.extent_size = extent;
            }

            planned
        })
        .collect();

    Ok(PlannedDevices { partitions, vgs })
}
