use std::collections::HashSet;

use tracing::info;

use crate::devicegraph::region::Region;
use crate::devicegraph::{
    Devicegraph,
    Filesystem,
    FsType,
    PartitionContent,
    PartitionKind,
    Sid,
    TableKind,
};
use crate::entity::report::PlanAction;
use crate::errors::PlanError;

use super::analyzer::DiskAnalyzer;
use super::distribution::{
    grow_assigned,
    AssignedSpace,
};
use super::planned::{
    PlannedDevices,
    PlannedPartition,
};
use super::settings::SpaceSettings;
use super::space::{
    DeletedPartition,
    SpaceMaker,
    SpaceResult,
};

/// Result of one full proposal pass
#[derive(Debug)]
pub struct PlanOutcome {
    pub devicegraph: Devicegraph,
    pub actions: Vec<PlanAction>,
}

/// Turns planned devices into a concrete devicegraph: makes space, creates
/// partitions and volume groups, and applies the reuse requests. Plain
/// sequencing; the decisions all happen in the space maker and allocator.
pub struct PlanGenerator<'a> {
    analyzer: &'a DiskAnalyzer,
    settings: &'a SpaceSettings,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(analyzer: &'a DiskAnalyzer, settings: &'a SpaceSettings) -> Self {
        PlanGenerator { analyzer, settings }
    }

    pub fn generate(
        &self,
        graph: &Devicegraph,
        candidates: &[String],
        devices: &PlannedDevices,
        protected: &HashSet<Sid>,
    ) -> Result<PlanOutcome, PlanError> {
        // Private clones; the caller keeps its planned devices untouched
        let planned: Vec<PlannedPartition> = devices.partitions.clone();

        // Devices marked for reuse must survive the space hunt
        let mut protected = protected.clone();
        for part in planned.iter().filter(|p| p.is_reuse()) {
            let name = part.reuse.as_deref().unwrap_or_default();
            let sid = graph
                .find_by_name(name)
                .ok_or_else(|| PlanError::NoSuchDevice(name.to_string()))?;
            protected.insert(sid);
        }

        let to_create: Vec<PlannedPartition> =
            planned.iter().filter(|p| !p.is_reuse()).cloned().collect();

        let maker = SpaceMaker::new(self.analyzer, self.settings);
        let space = maker.provide_space(
            graph,
            candidates,
            &to_create,
            &devices.vgs,
            &protected,
        )?;

        let mut actions = destructive_actions(&space);
        let SpaceResult {
            devicegraph: mut working,
            deleted,
            mut distribution,
            ..
        } = space;

        refine_swap_volumes(&mut distribution, &deleted);

        let mut pv_names: Vec<(String, String)> = Vec::new();
        for assigned in distribution.spaces.iter_mut() {
            grow_assigned(assigned);
            self.create_partitions(
                &mut working,
                assigned,
                &mut pv_names,
                &mut actions,
            )?;
        }

        for vg in &devices.vgs {
            let pvs: Vec<String> = pv_names
                .iter()
                .filter(|(name, _)| name == &vg.name)
                .map(|(_, pv)| pv.clone())
                .collect();

            info!(vg = %vg.name, "creating volume group");
            working.create_vg(&vg.name, vg.extent_size);
            actions.push(PlanAction::CreateLvmVg {
                vg: vg.name.clone(),
                pvs,
            });
        }

        for part in planned.iter().filter(|p| p.is_reuse()) {
            self.apply_reuse(&mut working, part, &mut actions)?;
        }

        Ok(PlanOutcome {
            devicegraph: working,
            actions,
        })
    }

    /// Creates the partitions of one assigned space, front to back
    fn create_partitions(
        &self,
        working: &mut Devicegraph,
        assigned: &AssignedSpace,
        pv_names: &mut Vec<(String, String)>,
        actions: &mut Vec<PlanAction>,
    ) -> Result<(), PlanError> {
        let disk_sid = assigned.space.disk_sid;
        let grain = assigned.space.align_grain();

        let (block_size, disk_name, implicit, has_table) = {
            let disk = working.disk_by_sid(disk_sid).ok_or_else(|| {
                PlanError::PlanBug(format!("lost disk {disk_sid} after space hunt"))
            })?;

            (
                disk.block_size,
                disk.name.clone(),
                disk.table().map(|t| t.kind.is_implicit()).unwrap_or(false),
                disk.table().is_some(),
            )
        };

        if implicit {
            return self.fill_implicit_slot(working, assigned, actions);
        }

        if !has_table {
            working.ensure_table(disk_sid, TableKind::Gpt)?;
            actions.push(PlanAction::CreatePartitionTable {
                device: disk_name,
                table: TableKind::Gpt,
            });
        }

        let kind = if assigned.space.in_extended {
            PartitionKind::Logical
        } else {
            PartitionKind::Primary
        };

        let mut cursor = assigned.space.region.start_bytes().ceil_align(grain);
        for part in &assigned.partitions {
            if kind == PartitionKind::Logical {
                // Room for the EBR in front of every logical
                cursor += grain;
            }

            let region = Region::from_bytes(cursor, part.size, block_size);
            let sid = working.create_partition(
                disk_sid,
                region,
                kind,
                planned_content(part),
            )?;

            let name = self.finish_partition(working, sid, part)?;
            actions.push(PlanAction::CreatePartition {
                device: name.clone(),
                number: partition_number(working, sid),
                size: part.size,
                fs_type: part.fs_type,
                mount_point: part.mount_point.clone(),
            });

            if let Some(vg) = &part.vg {
                actions.push(PlanAction::CreateLvmPv(name.clone()));
                pv_names.push((vg.clone(), name));
            }

            cursor += part.size;
        }

        Ok(())
    }

    /// Implicit tables have exactly one fixed slot; a partition planned on
    /// such a disk formats the slot instead of creating anything
    fn fill_implicit_slot(
        &self,
        working: &mut Devicegraph,
        assigned: &AssignedSpace,
        actions: &mut Vec<PlanAction>,
    ) -> Result<(), PlanError> {
        let [part] = assigned.partitions.as_slice() else {
            return Err(PlanError::PlanBug(format!(
                "an implicit slot cannot hold {} new partitions",
                assigned.partitions.len(),
            )));
        };

        let slot_sid = {
            let slot = working
                .disk_by_sid(assigned.space.disk_sid)
                .and_then(|d| d.table())
                .and_then(|t| {
                    t.partitions.iter().find(|p| p.content.is_empty())
                });
            slot.map(|p| p.sid).ok_or_else(|| {
                PlanError::PlanBug("implicit table with no empty slot".to_string())
            })?
        };

        if let Some(slot) = working.partition_mut(slot_sid) {
            slot.content = planned_content(part);
            slot.mount_point = part.mount_point.clone();
            slot.boot = part.boot;
        }

        let name = working
            .find_partition(slot_sid)
            .map(|(_, p)| p.name.clone())
            .unwrap_or_default();
        actions.push(PlanAction::CreatePartition {
            device: name,
            number: partition_number(working, slot_sid),
            size: part.size,
            fs_type: part.fs_type,
            mount_point: part.mount_point.clone(),
        });

        Ok(())
    }

    fn finish_partition(
        &self,
        working: &mut Devicegraph,
        sid: Sid,
        planned: &PlannedPartition,
    ) -> Result<String, PlanError> {
        let part = working.partition_mut(sid).ok_or_else(|| {
            PlanError::PlanBug(format!("created partition {sid} not found"))
        })?;

        part.mount_point = planned.mount_point.clone();
        part.boot = planned.boot;

        Ok(part.name.clone())
    }

    /// Mount point and boot flag for a pre-existing device kept in place
    fn apply_reuse(
        &self,
        working: &mut Devicegraph,
        planned: &PlannedPartition,
        actions: &mut Vec<PlanAction>,
    ) -> Result<(), PlanError> {
        let name = planned.reuse.as_deref().unwrap_or_default();

        let Some(part) = working.partition_by_name_mut(name) else {
            // A whole reused disk carries no flags we would need to touch
            if working.find_disk(name).is_none() {
                return Err(PlanError::NoSuchDevice(name.to_string()));
            }

            actions.push(PlanAction::ReuseDevice {
                device: name.to_string(),
                mount_point: planned.mount_point.clone(),
            });
            return Ok(());
        };

        part.mount_point = planned.mount_point.clone();
        if planned.boot {
            part.boot = true;
        }

        actions.push(PlanAction::ReuseDevice {
            device: name.to_string(),
            mount_point: planned.mount_point.clone(),
        });

        Ok(())
    }
}

fn planned_content(part: &PlannedPartition) -> PartitionContent {
    if let Some(vg) = &part.vg {
        return PartitionContent::LvmPv {
            vg: Some(vg.clone()),
        };
    }

    match part.fs_type {
        Some(fs_type) => PartitionContent::Filesystem(Filesystem {
            fs_type,
            label: part.label.clone(),
            uuid: part.uuid.clone(),
        }),
        None => PartitionContent::Empty,
    }
}

fn partition_number(working: &Devicegraph, sid: Sid) -> u32 {
    working
        .find_partition(sid)
        .map(|(_, p)| p.number)
        .unwrap_or_default()
}

fn destructive_actions(space: &SpaceResult) -> Vec<PlanAction> {
    let mut actions = Vec::new();

    for disk in &space.wiped_disks {
        actions.push(PlanAction::WipeDisk {
            device: disk.clone(),
        });
    }
    for deleted in &space.deleted {
        actions.push(PlanAction::DeletePartition {
            device: deleted.name.clone(),
            size: deleted.size,
        });
    }
    for resized in &space.resized {
        actions.push(PlanAction::ResizePartition {
            device: resized.name.clone(),
            from: resized.from,
            to: resized.to,
        });
    }

    actions
}

/// New swap volumes inherit uuid and label from the swap partitions the
/// space maker deleted, matched positionally
fn refine_swap_volumes(
    distribution: &mut super::distribution::Distribution,
    deleted: &[DeletedPartition],
) {
    let deleted_swaps: Vec<&DeletedPartition> = deleted
        .iter()
        .filter(|d| d.fs_type == Some(FsType::Swap))
        .collect();
    if deleted_swaps.is_empty() {
        return;
    }

    let mut next = 0;
    for assigned in distribution.spaces.iter_mut() {
        for part in assigned.partitions.iter_mut() {
            if part.fs_type != Some(FsType::Swap) || part.uuid.is_some() {
                continue;
            }

            let Some(swap) = deleted_swaps.get(next) else {
                return;
            };
            part.uuid = swap.uuid.clone();
            part.label = swap.label.clone();
            next += 1;
        }
    }
}
