use crate::devicegraph::free_space::FreeSpace;
use crate::entity::size::DiskSize;

use super::planned::PlannedPartition;

/// Typed allocation failure. Expected and recoverable: the space maker
/// reacts to it by escalating to the next permitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortfall {
    Missing {
        size: DiskSize,
        unmet: Vec<String>,
    },
    RestrictedDiskFull {
        disk: String,
        missing: DiskSize,
    },
}

impl Shortfall {
    pub fn missing_size(&self) -> DiskSize {
        match self {
            Shortfall::Missing { size, .. } => *size,
            Shortfall::RestrictedDiskFull { missing, .. } => *missing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignedSpace {
    pub space: FreeSpace,
    pub partitions: Vec<PlannedPartition>,
}

impl AssignedSpace {
    /// Capacity not yet claimed by the assigned partitions
    pub fn leftover(&self) -> DiskSize {
        let overhead = slot_overhead(&self.space) * self.partitions.len() as u64;
        let taken: DiskSize = self.partitions.iter().map(|p| p.size).sum();

        usable_size(&self.space)
            .saturating_sub(taken)
            .saturating_sub(overhead)
    }
}

/// Where each planned partition will be created.
///
/// Right after `distribute` every partition sits at its aligned minimum
/// size; `grow_assigned` hands out the surplus when the partitions are
/// about to be created.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    pub spaces: Vec<AssignedSpace>,
}

impl Distribution {
    pub fn partitions(&self) -> Vec<&PlannedPartition> {
        self.spaces
            .iter()
            .flat_map(|s| s.partitions.iter())
            .collect()
    }

    pub fn uses_space(&self, space: &FreeSpace) -> bool {
        self.spaces.iter().any(|s| {
            s.space.disk_sid == space.disk_sid
                && s.space.region.start() == space.region.start()
        })
    }
}

/// Capacity of a space once its boundaries are pulled onto the alignment
/// grain (start always, end only for end-aligned tables)
pub fn usable_size(space: &FreeSpace) -> DiskSize {
    if !space.exists {
        return DiskSize::zero();
    }

    let grain = space.align_grain();
    let start = space.region.start_bytes().ceil_align(grain);
    let mut end = space.region.end_bytes();
    if space.require_end_alignment() {
        end = end.floor_align(grain);
    }

    end.saturating_sub(start)
}

// Logical partitions pay one grain each for their EBR
pub(super) fn slot_overhead(space: &FreeSpace) -> DiskSize {
    if space.in_extended {
        space.align_grain()
    } else {
        DiskSize::zero()
    }
}

fn aligned_min(part: &PlannedPartition, grain: DiskSize) -> DiskSize {
    part.min_size.ceil_align(grain).max(grain)
}

/// Assigns every planned partition to exactly one free space.
///
/// Candidate groupings are generated by greedily filling spaces in two
/// deterministic orders (biggest space first, smallest first); the winner
/// uses fewer distinct spaces, ties broken by the more weight-balanced
/// leftover slack.
pub fn distribute(
    spaces: &[FreeSpace],
    planned: &[PlannedPartition],
) -> Result<Distribution, Shortfall> {
    if planned.is_empty() {
        return Ok(Distribution::default());
    }

    let caps: Vec<DiskSize> = spaces.iter().map(usable_size).collect();

    let mut desc: Vec<usize> = (0..spaces.len())
        .filter(|&i| !caps[i].is_zero())
        .collect();
    desc.sort_by(|&a, &b| caps[b].cmp(&caps[a]).then(a.cmp(&b)));
    let mut asc = desc.clone();
    asc.sort_by(|&a, &b| caps[a].cmp(&caps[b]).then(a.cmp(&b)));

    let packings: Vec<Packing> = [desc.clone(), asc]
        .iter()
        .map(|order| pack(spaces, &caps, order, planned))
        .filter(|p| p.complete())
        .collect();

    let Some(best) = packings.into_iter().min_by(|a, b| {
        a.used_spaces()
            .cmp(&b.used_spaces())
            .then(a.balance(planned).total_cmp(&b.balance(planned)))
    }) else {
        return Err(build_shortfall(spaces, &caps, &desc, planned));
    };

    let mut result = Distribution::default();
    for (space_i, part_idxs) in best.assignment.iter().enumerate() {
        if part_idxs.is_empty() {
            continue;
        }

        let grain = spaces[space_i].align_grain();
        let partitions = part_idxs
            .iter()
            .map(|&pi| {
                let mut part = planned[pi].clone();
                part.size = part.size.max(aligned_min(&part, grain));
                part
            })
            .collect();

        result.spaces.push(AssignedSpace {
            space: spaces[space_i].clone(),
            partitions,
        });
    }

    Ok(result)
}

/// Hands the leftover of a space to its partitions, proportionally to
/// weight and capped at each partition's maximum. Weightless partitions
/// (and PVs, whose min equals their max) never grow.
pub fn grow_assigned(assigned: &mut AssignedSpace) {
    let grain = assigned.space.align_grain();
    let mut extra = assigned.leftover();

    let maxes: Vec<DiskSize> = assigned
        .partitions
        .iter()
        .map(|p| p.max_size.floor_align(grain).max(p.size))
        .collect();

    while extra >= grain {
        let parts = &mut assigned.partitions;
        let growable: Vec<usize> = (0..parts.len())
            .filter(|&i| parts[i].weight > 0 && parts[i].size < maxes[i])
            .collect();
        if growable.is_empty() {
            break;
        }

        let total_weight: u64 = growable.iter().map(|&i| parts[i].weight).sum();
        let pool = extra;
        let mut spent = DiskSize::zero();

        for &i in &growable {
            let share = DiskSize::new(
                (pool.bytes() / total_weight).saturating_mul(parts[i].weight),
            )
            .floor_align(grain)
            .min(maxes[i] - parts[i].size);

            parts[i].size += share;
            spent += share;
        }

        if spent.is_zero() {
            // Shares rounded down to nothing: the last grower takes the rest
            let i = *growable.last().expect("growable checked non-empty");
            let grant = extra.floor_align(grain).min(maxes[i] - parts[i].size);
            parts[i].size += grant;
            break;
        }

        extra -= spent;
    }
}

struct Packing {
    // Per space: indices into the planned slice
    assignment: Vec<Vec<usize>>,
    remaining: Vec<DiskSize>,
    placed: Vec<bool>,
}

impl Packing {
    fn complete(&self) -> bool {
        self.placed.iter().all(|&p| p)
    }

    fn used_spaces(&self) -> usize {
        self.assignment.iter().filter(|a| !a.is_empty()).count()
    }

    /// Spread between the best- and worst-off space, measuring leftover
    /// slack per unit of weight. Lower is fairer.
    fn balance(&self, planned: &[PlannedPartition]) -> f64 {
        let mut lo = f64::INFINITY;
        let mut hi: f64 = 0.0;

        for (space_i, parts) in self.assignment.iter().enumerate() {
            if parts.is_empty() {
                continue;
            }

            let weight: u64 = parts.iter().map(|&pi| planned[pi].weight).sum();
            let ratio =
                self.remaining[space_i].bytes() as f64 / weight.max(1) as f64;
            lo = lo.min(ratio);
            hi = hi.max(ratio);
        }

        if lo.is_infinite() {
            return 0.0;
        }

        hi - lo
    }
}

/// Greedy packing: walk the spaces in the given order and fill each with
/// the largest planned partitions still fitting. Disk-restricted
/// partitions get first pick so nothing unpinned squats on their disk.
fn pack(
    spaces: &[FreeSpace],
    caps: &[DiskSize],
    order: &[usize],
    planned: &[PlannedPartition],
) -> Packing {
    let mut packing = Packing {
        assignment: vec![Vec::new(); spaces.len()],
        remaining: caps.to_vec(),
        placed: vec![false; planned.len()],
    };

    let mut by_size: Vec<usize> = (0..planned.len()).collect();
    by_size.sort_by(|&a, &b| {
        planned[b]
            .min_size
            .cmp(&planned[a].min_size)
            .then(a.cmp(&b))
    });

    for restricted_pass in [true, false] {
        for &space_i in order {
            let space = &spaces[space_i];

            for &pi in &by_size {
                if packing.placed[pi] {
                    continue;
                }

                let part = &planned[pi];
                if part.disk.is_some() != restricted_pass {
                    continue;
                }
                if let Some(disk) = &part.disk {
                    if *disk != space.disk_name {
                        continue;
                    }
                }

                let need =
                    aligned_min(part, space.align_grain()) + slot_overhead(space);
                if need <= packing.remaining[space_i] {
                    packing.remaining[space_i] -= need;
                    packing.assignment[space_i].push(pi);
                    packing.placed[pi] = true;
                }
            }
        }
    }

    packing
}

/// Shortfall for a failed packing, with a conservative estimate of how
/// much extra room would be needed: each unplaced partition consumes the
/// best leftover it could have used and the gap is summed up.
fn build_shortfall(
    spaces: &[FreeSpace],
    caps: &[DiskSize],
    desc_order: &[usize],
    planned: &[PlannedPartition],
) -> Shortfall {
    let grain = DiskSize::mib(1);
    let packing = pack(spaces, caps, desc_order, planned);

    let unplaced: Vec<usize> = (0..planned.len())
        .filter(|&pi| !packing.placed[pi])
        .collect();

    // A pinned partition that did not fit fails on its own terms, even if
    // other disks still have plenty of room
    if let Some(&pi) = unplaced.iter().find(|&&pi| planned[pi].disk.is_some()) {
        let part = &planned[pi];
        let disk = part.disk.clone().unwrap_or_default();
        let best_on_disk = spaces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.disk_name == disk)
            .map(|(i, _)| packing.remaining[i])
            .max()
            .unwrap_or_else(DiskSize::zero);
        let missing = aligned_min(part, grain)
            .saturating_sub(best_on_disk)
            .max(grain);

        return Shortfall::RestrictedDiskFull { disk, missing };
    }

    let mut leftovers = packing.remaining.clone();
    let mut missing = DiskSize::zero();
    for &pi in &unplaced {
        let need = aligned_min(&planned[pi], grain);

        match leftovers.iter_mut().max_by_key(|l| **l) {
            Some(best) if *best >= need => *best -= need,
            Some(best) => {
                missing += need - *best;
                *best = DiskSize::zero();
            }
            // No free space at all on the scoped disks
            None => missing += need,
        }
    }

    if missing.is_zero() {
        // Capacity exists but is fragmented; ask for at least a grain more
        missing = grain;
    }

    Shortfall::Missing {
        size: missing,
        unmet: unplaced
            .iter()
            .map(|&pi| planned[pi].request_name())
            .collect(),
    }
}
