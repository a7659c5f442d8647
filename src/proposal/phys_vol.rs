use tracing::debug;

use crate::devicegraph::free_space::FreeSpace;
use crate::entity::size::DiskSize;
use crate::errors::PlanError;

use super::distribution::{
    usable_size,
    AssignedSpace,
    Distribution,
    Shortfall,
};
use super::planned::{
    PlannedPartition,
    PlannedVg,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    UseNeeded,
    UseAvailable,
}

// Where a new PV could go: a space the distribution left alone, or the
// leftover tail of a space it already uses
#[derive(Debug, Clone, Copy)]
enum Slot {
    Unused(usize),
    Used(usize),
}

/// Extends a distribution with planned partitions acting as physical
/// volumes for one new volume group.
#[derive(Debug)]
pub struct PhysVolCalculator<'a> {
    vg: &'a PlannedVg,
    strategy: Strategy,
}

impl<'a> PhysVolCalculator<'a> {
    /// Fails right here on an unknown sizing strategy; a bad configuration
    /// must never reach the planning loop.
    pub fn new(vg: &'a PlannedVg) -> Result<Self, PlanError> {
        let strategy = match vg.strategy.as_str() {
            "use_needed" => Strategy::UseNeeded,
            "use_available" => Strategy::UseAvailable,
            other => {
                return Err(PlanError::BadSettings(format!(
                    "unsupported lvm strategy {other} for vg {}",
                    vg.name,
                )));
            }
        };

        Ok(PhysVolCalculator { vg, strategy })
    }

    /// Adds PV partitions on whatever the base distribution left free
    pub fn add_physical_volumes(
        &self,
        distribution: &Distribution,
        all_spaces: &[FreeSpace],
    ) -> Result<Distribution, Shortfall> {
        let mut result = distribution.clone();
        let mut slots = self.candidate_slots(&result, all_spaces);

        if self.strategy == Strategy::UseNeeded {
            // Smallest candidates first, keep the big chunks intact
            slots.sort_by(|a, b| {
                a.capacity
                    .cmp(&b.capacity)
                    .then(a.disk_name.cmp(&b.disk_name))
                    .then(a.start.cmp(&b.start))
            });
        }

        let mut covered = DiskSize::zero();
        for slot in slots {
            if self.strategy == Strategy::UseNeeded
                && covered >= self.vg.target_size
            {
                break;
            }

            let pv_size = match self.strategy {
                Strategy::UseNeeded => self
                    .vg
                    .pv_size_for(self.vg.target_size - covered)
                    .min(slot.capacity),
                Strategy::UseAvailable => slot.capacity,
            };

            covered += self.vg.pv_useful_size(pv_size);
            self.place(&mut result, all_spaces, slot.slot, pv_size);
        }

        if covered < self.vg.target_size {
            debug!(
                vg = %self.vg.name,
                "cannot reach volume group target size",
            );
            return Err(Shortfall::Missing {
                size: self.vg.target_size - covered,
                unmet: vec![format!("lvm/{}", self.vg.name)],
            });
        }

        Ok(result)
    }

    fn candidate_slots(
        &self,
        result: &Distribution,
        all_spaces: &[FreeSpace],
    ) -> Vec<Candidate> {
        let mut slots = Vec::new();

        for (i, space) in all_spaces.iter().enumerate() {
            if !space.exists || result.uses_space(space) {
                continue;
            }

            let capacity = pv_capacity(space, usable_size(space));
            if capacity > PlannedVg::PV_OVERHEAD {
                slots.push(Candidate {
                    slot: Slot::Unused(i),
                    capacity,
                    disk_name: space.disk_name.clone(),
                    start: space.region.start(),
                });
            }
        }

        for (i, assigned) in result.spaces.iter().enumerate() {
            let capacity = pv_capacity(&assigned.space, assigned.leftover());
            if capacity > PlannedVg::PV_OVERHEAD {
                slots.push(Candidate {
                    slot: Slot::Used(i),
                    capacity,
                    disk_name: assigned.space.disk_name.clone(),
                    start: assigned.space.region.start(),
                });
            }
        }

        slots
    }

    fn place(
        &self,
        result: &mut Distribution,
        all_spaces: &[FreeSpace],
        slot: Slot,
        pv_size: DiskSize,
    ) {
        let pv = PlannedPartition {
            vg: Some(self.vg.name.clone()),
            min_size: pv_size,
            max_size: pv_size,
            size: pv_size,
            ..Default::default()
        };

        match slot {
            Slot::Unused(i) => result.spaces.push(AssignedSpace {
                space: all_spaces[i].clone(),
                partitions: vec![pv],
            }),
            Slot::Used(i) => result.spaces[i].partitions.push(pv),
        }
    }
}

struct Candidate {
    slot: Slot,
    capacity: DiskSize,
    disk_name: String,
    start: u64,
}

/// Largest grain-aligned PV fitting in `capacity` of the given space
fn pv_capacity(space: &FreeSpace, capacity: DiskSize) -> DiskSize {
    let grain = space.align_grain();
    let mut capacity = capacity;
    if space.in_extended {
        capacity = capacity.saturating_sub(grain);
    }

    capacity.floor_align(grain)
}
