use crate::entity::size::DiskSize;

use super::region::Region;
use super::{
    Devicegraph,
    Disk,
    DiskContent,
    PartitionKind,
    Sid,
    TableKind,
};

/// Unused chunk of a disk, eligible to host new partitions.
///
/// `exists` is false for a hypothetical space that only appears if a shrink
/// candidate actually shrinks; `growing` marks the space that would grow
/// while such a candidate is being evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpace {
    pub disk_sid: Sid,
    pub disk_name: String,
    pub region: Region,
    pub table_kind: TableKind,
    pub in_extended: bool,
    pub exists: bool,
    pub growing: bool,
}

impl FreeSpace {
    fn new(
        disk: &Disk,
        region: Region,
        table_kind: TableKind,
        in_extended: bool,
    ) -> Self {
        FreeSpace {
            disk_sid: disk.sid,
            disk_name: disk.name.clone(),
            region,
            table_kind,
            in_extended,
            exists: true,
            growing: false,
        }
    }

    pub fn size(&self) -> DiskSize {
        if self.exists {
            self.region.size()
        } else {
            DiskSize::zero()
        }
    }

    pub fn align_grain(&self) -> DiskSize {
        self.table_kind.align_grain()
    }

    pub fn require_end_alignment(&self) -> bool {
        self.table_kind.require_end_alignment()
    }
}

impl Devicegraph {
    /// Free spaces of one disk, in ascending start order.
    ///
    /// A disk without a table is treated as if it would get a GPT one, so
    /// the table header and backup structures are already subtracted.
    pub fn free_spaces(&self, disk: &Disk) -> Vec<FreeSpace> {
        match &disk.content {
            DiskContent::Direct(_) => Vec::new(),
            DiskContent::Empty => {
                whole_disk_space(disk, TableKind::Gpt).into_iter().collect()
            }
            DiskContent::Table(table) => {
                let mut spaces = Vec::new();
                let grain = table.kind.align_grain();
                let block_size = disk.block_size;
                let grain_blocks = grain.bytes() / block_size;

                let usable_start =
                    table.kind.start_overhead().bytes() / block_size;
                let usable_end = (disk.size - table.kind.end_overhead())
                    .bytes()
                    / block_size;

                // Top level: primaries and the extended count as occupied.
                // A wiped slot of an implicit table is reusable space, the
                // entry itself just cannot be removed.
                let mut occupied: Vec<Region> = table
                    .partitions
                    .iter()
                    .filter(|p| p.kind != PartitionKind::Logical)
                    .filter(|p| !(table.kind.is_implicit() && p.content.is_empty()))
                    .map(|p| p.region)
                    .collect();
                occupied.sort_by_key(|r| r.start());

                push_gaps(
                    &mut spaces,
                    disk,
                    table.kind,
                    false,
                    usable_start,
                    usable_end,
                    &occupied,
                    grain,
                );

                // Inside the extended partition: each logical needs one
                // grain in front of it for the EBR
                if let Some(extended) = table.extended() {
                    let mut occupied: Vec<Region> = table
                        .logicals()
                        .iter()
                        .map(|p| {
                            let start =
                                p.region.start().saturating_sub(grain_blocks);
                            Region::new(
                                start,
                                p.region.length() + (p.region.start() - start),
                                block_size,
                            )
                        })
                        .collect();
                    occupied.sort_by_key(|r| r.start());

                    push_gaps(
                        &mut spaces,
                        disk,
                        table.kind,
                        true,
                        extended.region.start() + grain_blocks,
                        extended.region.end() + 1,
                        &occupied,
                        grain,
                    );
                }

                spaces.sort_by_key(|s| s.region.start());
                spaces
            }
        }
    }

    /// Free spaces across the given disks, preserving disk order
    pub fn all_free_spaces(&self, disk_names: &[String]) -> Vec<FreeSpace> {
        let mut spaces = Vec::new();
        for name in disk_names {
            if let Some(disk) = self.find_disk(name) {
                spaces.extend(self.free_spaces(disk));
            }
        }

        spaces
    }
}

fn whole_disk_space(disk: &Disk, kind: TableKind) -> Option<FreeSpace> {
    let block_size = disk.block_size;
    let start = kind.start_overhead().bytes() / block_size;
    let end = (disk.size - kind.end_overhead()).bytes() / block_size;

    if end <= start {
        return None;
    }

    Some(FreeSpace::new(
        disk,
        Region::new(start, end - start, block_size),
        kind,
        false,
    ))
}

#[allow(clippy::too_many_arguments)]
fn push_gaps(
    spaces: &mut Vec<FreeSpace>,
    disk: &Disk,
    kind: TableKind,
    in_extended: bool,
    usable_start: u64,
    usable_end: u64,
    occupied: &[Region],
    grain: DiskSize,
) {
    let mut cursor = usable_start;

    for region in occupied {
        if region.start() > cursor {
            let gap = Region::new(
                cursor,
                region.start() - cursor,
                disk.block_size,
            );
            if gap.size() >= grain {
                spaces.push(FreeSpace::new(disk, gap, kind, in_extended));
            }
        }

        cursor = cursor.max(region.end() + 1);
    }

    if usable_end > cursor {
        let gap = Region::new(cursor, usable_end - cursor, disk.block_size);
        if gap.size() >= grain {
            spaces.push(FreeSpace::new(disk, gap, kind, in_extended));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::region::DEFAULT_BLOCK_SIZE;
    use super::super::{
        PartitionContent,
        PartitionKind,
    };
    use super::*;

    #[test]
    fn test_bare_disk_assumes_gpt() {
        let mut graph = Devicegraph::new();
        graph.add_disk("/dev/sda", DiskSize::gib(50), DEFAULT_BLOCK_SIZE);

        let disk = graph.find_disk("/dev/sda").unwrap();
        let spaces = graph.free_spaces(disk);

        assert_eq!(1, spaces.len());
        let expected = DiskSize::gib(50)
            - DiskSize::mib(1)
            - (DiskSize::kib(16) + DiskSize::new(512));
        assert_eq!(expected, spaces[0].size());
        assert!(spaces[0].region.start_aligned(DiskSize::mib(1)));
    }

    #[test]
    fn test_gap_after_partition() {
        let mut graph = Devicegraph::new();
        let sid = graph.add_disk("/dev/sda", DiskSize::gib(50), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sid, TableKind::Mbr).unwrap();

        // 10 GiB partition starting at 1 MiB
        let blocks_10g = DiskSize::gib(10).bytes() / DEFAULT_BLOCK_SIZE;
        graph
            .create_partition(
                sid,
                Region::new(2048, blocks_10g, DEFAULT_BLOCK_SIZE),
                PartitionKind::Primary,
                PartitionContent::Empty,
            )
            .unwrap();

        let disk = graph.find_disk("/dev/sda").unwrap();
        let spaces = graph.free_spaces(disk);

        assert_eq!(1, spaces.len());
        // MBR has no tail overhead
        assert_eq!(
            DiskSize::gib(40) - DiskSize::mib(1),
            spaces[0].size(),
        );
        assert_eq!(2048 + blocks_10g, spaces[0].region.start());
    }

    #[test]
    fn test_disk_with_direct_content_has_no_space() {
        let mut graph = Devicegraph::new();
        let sid = graph.add_disk("/dev/sdb", DiskSize::gib(50), DEFAULT_BLOCK_SIZE);
        if let Some(disk) = graph.disk_by_sid_mut(sid) {
            disk.content = DiskContent::Direct(PartitionContent::LvmPv {
                vg: Some("vg0".to_string()),
            });
        }

        let disk = graph.find_disk("/dev/sdb").unwrap();
        assert!(graph.free_spaces(disk).is_empty());
    }

    #[test]
    fn test_gap_inside_extended() {
        let mut graph = Devicegraph::new();
        let sid = graph.add_disk("/dev/sda", DiskSize::gib(50), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sid, TableKind::Mbr).unwrap();

        let gib = DiskSize::gib(1).bytes() / DEFAULT_BLOCK_SIZE;

        // Extended spanning 10 GiB, one 2 GiB logical at its front
        graph
            .create_partition(
                sid,
                Region::new(2048, 10 * gib, DEFAULT_BLOCK_SIZE),
                PartitionKind::Extended,
                PartitionContent::Empty,
            )
            .unwrap();
        graph
            .create_partition(
                sid,
                Region::new(2048 + 2048, 2 * gib, DEFAULT_BLOCK_SIZE),
                PartitionKind::Logical,
                PartitionContent::Empty,
            )
            .unwrap();

        let disk = graph.find_disk("/dev/sda").unwrap();
        let spaces = graph.free_spaces(disk);

        let inside: Vec<&FreeSpace> =
            spaces.iter().filter(|s| s.in_extended).collect();
        assert_eq!(1, inside.len());
        assert_eq!(2048 + 2048 + 2 * gib, inside[0].region.start());

        // And the gap after the extended partition at top level
        let outside: Vec<&FreeSpace> =
            spaces.iter().filter(|s| !s.in_extended).collect();
        assert_eq!(1, outside.len());
        assert_eq!(2048 + 10 * gib, outside[0].region.start());
    }
}
