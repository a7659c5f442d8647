use std::collections::HashSet;

use tracing::{
    debug,
    info,
};

use crate::devicegraph::{
    Devicegraph,
    DiskContent,
    GroupKind,
    PartitionKind,
    Sid,
};

/// Deletes partitions together with everything structurally bound to them.
///
/// Deleting one physical volume takes the sibling PVs of its volume group
/// with it, same for RAID members and multidevice filesystems - the freed
/// siblings would be useless on their own. The optional disk list restricts
/// those collateral deletions; the directly addressed device is always
/// processed.
pub struct CascadeDeleter<'a> {
    graph: &'a mut Devicegraph,
    disks: Option<&'a [String]>,
    protected: &'a HashSet<Sid>,
    keep_tables: bool,
}

impl<'a> CascadeDeleter<'a> {
    pub fn new(
        graph: &'a mut Devicegraph,
        disks: Option<&'a [String]>,
        protected: &'a HashSet<Sid>,
        keep_tables: bool,
    ) -> Self {
        CascadeDeleter {
            graph,
            disks,
            protected,
            keep_tables,
        }
    }

    /// Deletes the partition and its multi-device siblings.
    /// Returns the sids of everything removed; unknown sids are a no-op.
    pub fn delete_by_sid(&mut self, sid: Sid) -> Vec<Sid> {
        if self.graph.find_partition(sid).is_none() {
            debug!(sid, "nothing to delete, sid not in graph");
            return Vec::new();
        }

        let mut targets = vec![sid];
        targets.extend(self.related_partitions(sid));

        let mut deleted = Vec::new();
        for target in targets {
            deleted.extend(self.delete_partition(target));
        }

        self.remove_orphan_vgs();
        deleted
    }

    /// Wipes direct whole-disk content, cascading over its multi-device
    /// group the same way partition deletion does.
    /// Returns the sids of partitions removed as collateral.
    pub fn delete_disk_content(&mut self, disk_sid: Sid) -> Vec<Sid> {
        let group = match self.graph.disk_by_sid(disk_sid) {
            Some(disk) => match &disk.content {
                DiskContent::Direct(content) => content
                    .shared_group()
                    .map(|(kind, key)| (kind, key.to_string())),
                _ => None,
            },
            None => return Vec::new(),
        };

        let mut deleted = Vec::new();
        if let Some((kind, key)) = group {
            for sid in self.group_members(kind, &key, None) {
                deleted.extend(self.delete_partition(sid));
            }

            // Sibling whole-disk members of the same group
            let disk_sids: Vec<Sid> = self
                .graph
                .disks
                .iter()
                .filter(|d| {
                    d.sid != disk_sid
                        && self.disk_in_scope(&d.name)
                        && matches!(
                            &d.content,
                            DiskContent::Direct(c)
                                if c.shared_group() == Some((kind, key.as_str()))
                        )
                })
                .map(|d| d.sid)
                .collect();
            for sid in disk_sids {
                self.graph.wipe_disk(sid);
            }
        }

        info!(disk_sid, "wiping whole-disk content");
        self.graph.wipe_disk(disk_sid);
        self.remove_orphan_vgs();

        deleted
    }

    /// Partitions sharing a multi-device structure with `sid`, honoring the
    /// disk restriction and the protected set. Never contains `sid` itself.
    fn related_partitions(&self, sid: Sid) -> Vec<Sid> {
        let Some((_, part)) = self.graph.find_partition(sid) else {
            return Vec::new();
        };

        let Some((kind, key)) = part.content.shared_group() else {
            debug!(name = %part.name, "not related to other partitions");
            return Vec::new();
        };

        info!(
            name = %part.name,
            group = key,
            "partition is part of a multi-device structure",
        );

        let key = key.to_string();
        self.group_members(kind, &key, Some(sid))
    }

    fn group_members(
        &self,
        kind: GroupKind,
        key: &str,
        except: Option<Sid>,
    ) -> Vec<Sid> {
        self.graph
            .partitions()
            .iter()
            .filter(|(disk, part)| {
                Some(part.sid) != except
                    && !self.protected.contains(&part.sid)
                    && self.disk_in_scope(&disk.name)
                    && part.content.shared_group() == Some((kind, key))
            })
            .map(|(_, part)| part.sid)
            .collect()
    }

    fn disk_in_scope(&self, name: &str) -> bool {
        match self.disks {
            Some(disks) => disks.iter().any(|d| d == name),
            None => true,
        }
    }

    /// Deletes one partition entry, applying the structural special cases:
    /// implicit slots are wiped instead, the sole remaining logical takes
    /// its extended parent with it, and emptied tables are dropped unless
    /// the import mode keeps them.
    fn delete_partition(&mut self, sid: Sid) -> Vec<Sid> {
        // The cascade may have removed it already
        let Some((disk, part)) = self.graph.find_partition(sid) else {
            return Vec::new();
        };

        let disk_sid = disk.sid;
        let part_name = part.name.clone();
        let part_kind = part.kind;
        let table = disk.table().expect("partition without a table");
        let implicit = table.kind.is_implicit();

        info!(name = %part_name, "deleting partition");

        let deleted = if implicit {
            // The slot itself cannot go away, only its content
            self.graph.wipe_partition(sid);
            vec![sid]
        } else if part_kind == PartitionKind::Logical
            && self.sole_logical(disk_sid, sid)
        {
            info!("it is the last logical one, deleting the extended too");
            self.delete_extended(disk_sid)
        } else if part_kind == PartitionKind::Extended {
            self.delete_extended(disk_sid)
        } else {
            self.graph.delete_partition(sid);
            vec![sid]
        };

        if !self.keep_tables {
            self.graph.drop_table_if_empty(disk_sid);
        }

        deleted
    }

    /// Whether `sid` is the only logical partition left in its table
    fn sole_logical(&self, disk_sid: Sid, sid: Sid) -> bool {
        let Some(disk) = self.graph.disk_by_sid(disk_sid) else {
            return false;
        };
        let Some(table) = disk.table() else {
            return false;
        };

        !table.logicals().iter().any(|p| p.sid != sid)
    }

    /// Deletes the extended partition and every logical inside it.
    /// A protected logical keeps the whole structure alive.
    fn delete_extended(&mut self, disk_sid: Sid) -> Vec<Sid> {
        let Some(disk) = self.graph.disk_by_sid(disk_sid) else {
            return Vec::new();
        };
        let Some(table) = disk.table() else {
            return Vec::new();
        };

        let logicals: Vec<Sid> = table.logicals().iter().map(|p| p.sid).collect();
        if logicals.iter().any(|sid| self.protected.contains(sid)) {
            debug!("extended partition kept, a logical inside is protected");
            return Vec::new();
        }

        let mut sids: Vec<Sid> = match table.extended() {
            Some(ext) => vec![ext.sid],
            None => Vec::new(),
        };
        sids.extend(logicals);

        for sid in &sids {
            self.graph.delete_partition(*sid);
        }

        sids
    }

    /// Volume groups left without a single PV anywhere are gone for good
    fn remove_orphan_vgs(&mut self) {
        let orphans: Vec<String> = self
            .graph
            .vgs
            .iter()
            .filter(|vg| self.graph.vg_pv_count(&vg.name) == 0)
            .map(|vg| vg.name.clone())
            .collect();

        for name in orphans {
            info!(vg = %name, "removing volume group, no physical volumes left");
            self.graph.remove_vg(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::devicegraph::region::{
        Region,
        DEFAULT_BLOCK_SIZE,
    };
    use crate::devicegraph::{
        PartitionContent,
        TableKind,
    };
    use crate::entity::size::DiskSize;

    use super::*;

    const GIB_BLOCKS: u64 = DiskSize::gib(1).bytes() / DEFAULT_BLOCK_SIZE;

    fn gib_region(start_gib: u64, len_gib: u64) -> Region {
        Region::new(
            start_gib * GIB_BLOCKS,
            len_gib * GIB_BLOCKS,
            DEFAULT_BLOCK_SIZE,
        )
    }

    fn pv(vg: &str) -> PartitionContent {
        PartitionContent::LvmPv {
            vg: Some(vg.to_string()),
        }
    }

    // Two disks, vg0 over sda1+sdb1, a plain partition sda2
    fn lvm_graph() -> (Devicegraph, Sid, Sid, Sid) {
        let mut graph = Devicegraph::new();

        let sda = graph.add_disk("/dev/sda", DiskSize::gib(100), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sda, TableKind::Gpt).unwrap();
        let sda1 = graph
            .create_partition(
                sda,
                gib_region(1, 30),
                PartitionKind::Primary,
                pv("vg0"),
            )
            .unwrap();
        let sda2 = graph
            .create_partition(
                sda,
                gib_region(31, 10),
                PartitionKind::Primary,
                PartitionContent::Empty,
            )
            .unwrap();

        let sdb = graph.add_disk("/dev/sdb", DiskSize::gib(100), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sdb, TableKind::Gpt).unwrap();
        let sdb1 = graph
            .create_partition(
                sdb,
                gib_region(1, 30),
                PartitionKind::Primary,
                pv("vg0"),
            )
            .unwrap();

        graph.create_vg("vg0", DiskSize::mib(4));

        (graph, sda1, sda2, sdb1)
    }

    #[test]
    fn test_pv_cascade_removes_vg() {
        let (mut graph, sda1, sda2, sdb1) = lvm_graph();
        let protected = HashSet::new();

        let deleted = CascadeDeleter::new(&mut graph, None, &protected, false)
            .delete_by_sid(sda1);

        assert_eq!(
            HashSet::from([sda1, sdb1]),
            deleted.into_iter().collect::<HashSet<Sid>>(),
        );
        assert!(graph.find_partition(sda2).is_some());
        assert!(graph.vgs.is_empty());
    }

    #[test]
    fn test_cascade_respects_disk_restriction() {
        let (mut graph, sda1, _, sdb1) = lvm_graph();
        let protected = HashSet::new();
        let disks = vec!["/dev/sda".to_string()];

        let deleted =
            CascadeDeleter::new(&mut graph, Some(&disks), &protected, false)
                .delete_by_sid(sda1);

        assert_eq!(vec![sda1], deleted);
        assert!(graph.find_partition(sdb1).is_some());
        // The VG still has a PV on sdb, so it survives
        assert_eq!(1, graph.vgs.len());
    }

    #[test]
    fn test_unknown_sid_is_noop() {
        let (mut graph, ..) = lvm_graph();
        let protected = HashSet::new();

        let deleted = CascadeDeleter::new(&mut graph, None, &protected, false)
            .delete_by_sid(9999);
        assert!(deleted.is_empty());
    }

    // MBR disk: sda1 primary, sda2 extended holding sda5 and sda6
    fn extended_graph() -> (Devicegraph, Sid, Sid, Sid, Sid) {
        let mut graph = Devicegraph::new();

        let sda = graph.add_disk("/dev/sda", DiskSize::gib(100), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sda, TableKind::Mbr).unwrap();
        let sda1 = graph
            .create_partition(
                sda,
                gib_region(1, 10),
                PartitionKind::Primary,
                PartitionContent::Empty,
            )
            .unwrap();
        let sda2 = graph
            .create_partition(
                sda,
                gib_region(11, 60),
                PartitionKind::Extended,
                PartitionContent::Empty,
            )
            .unwrap();
        let sda5 = graph
            .create_partition(
                sda,
                gib_region(12, 20),
                PartitionKind::Logical,
                PartitionContent::Empty,
            )
            .unwrap();
        let sda6 = graph
            .create_partition(
                sda,
                gib_region(33, 20),
                PartitionKind::Logical,
                PartitionContent::Empty,
            )
            .unwrap();

        (graph, sda1, sda2, sda5, sda6)
    }

    #[test]
    fn test_sole_logical_takes_extended() {
        let (mut graph, sda1, sda2, sda5, sda6) = extended_graph();
        let protected = HashSet::new();

        let mut deleter = CascadeDeleter::new(&mut graph, None, &protected, false);

        // First logical: a sibling remains, so only sda5 goes
        assert_eq!(vec![sda5], deleter.delete_by_sid(sda5));

        // Now sda6 is the sole logical: the extended goes with it
        let deleted = deleter.delete_by_sid(sda6);
        assert_eq!(
            HashSet::from([sda2, sda6]),
            deleted.into_iter().collect::<HashSet<Sid>>(),
        );

        assert!(graph.find_partition(sda1).is_some());
        assert!(graph.find_partition(sda2).is_none());
    }

    #[test]
    fn test_protected_logical_keeps_extended() {
        let (mut graph, _, sda2, sda5, sda6) = extended_graph();
        let protected = HashSet::from([sda6]);

        let mut deleter = CascadeDeleter::new(&mut graph, None, &protected, false);
        assert_eq!(vec![sda5], deleter.delete_by_sid(sda5));

        // sda6 is reused elsewhere: its extended parent must stay
        assert!(graph.find_partition(sda2).is_some());
        assert!(graph.find_partition(sda6).is_some());
    }

    #[test]
    fn test_last_partition_drops_table() {
        let mut graph = Devicegraph::new();
        let sda = graph.add_disk("/dev/sda", DiskSize::gib(100), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sda, TableKind::Gpt).unwrap();
        let sda1 = graph
            .create_partition(
                sda,
                gib_region(1, 10),
                PartitionKind::Primary,
                PartitionContent::Empty,
            )
            .unwrap();

        let protected = HashSet::new();
        CascadeDeleter::new(&mut graph, None, &protected, false).delete_by_sid(sda1);
        assert!(graph.find_disk("/dev/sda").unwrap().table().is_none());

        // Import mode keeps the emptied table around
        let mut graph = Devicegraph::new();
        let sda = graph.add_disk("/dev/sda", DiskSize::gib(100), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(sda, TableKind::Gpt).unwrap();
        let sda1 = graph
            .create_partition(
                sda,
                gib_region(1, 10),
                PartitionKind::Primary,
                PartitionContent::Empty,
            )
            .unwrap();
        CascadeDeleter::new(&mut graph, None, &protected, true).delete_by_sid(sda1);
        assert!(graph.find_disk("/dev/sda").unwrap().table().is_some());
    }

    #[test]
    fn test_implicit_slot_is_wiped_not_removed() {
        let mut graph = Devicegraph::new();
        let dasda = graph.add_disk("/dev/dasda", DiskSize::gib(20), DEFAULT_BLOCK_SIZE);
        graph.ensure_table(dasda, TableKind::Implicit).unwrap();
        let part = graph
            .create_partition(
                dasda,
                gib_region(1, 18),
                PartitionKind::Primary,
                PartitionContent::Filesystem(crate::devicegraph::Filesystem {
                    fs_type: crate::devicegraph::FsType::Ext3,
                    label: None,
                    uuid: None,
                }),
            )
            .unwrap();

        let protected = HashSet::new();
        let deleted = CascadeDeleter::new(&mut graph, None, &protected, false)
            .delete_by_sid(part);

        assert_eq!(vec![part], deleted);
        let (_, slot) = graph.find_partition(part).unwrap();
        assert!(slot.content.is_empty());
    }

    #[test]
    fn test_whole_disk_pv_cascade() {
        let (mut graph, sda1, _, sdb1) = lvm_graph();
        let sdc = graph.add_disk("/dev/sdc", DiskSize::gib(50), DEFAULT_BLOCK_SIZE);
        if let Some(disk) = graph.disk_by_sid_mut(sdc) {
            disk.content = DiskContent::Direct(pv("vg0"));
        }

        let protected = HashSet::new();
        let deleted = CascadeDeleter::new(&mut graph, None, &protected, false)
            .delete_disk_content(sdc);

        assert_eq!(
            HashSet::from([sda1, sdb1]),
            deleted.into_iter().collect::<HashSet<Sid>>(),
        );
        let sdc_disk = graph.disk_by_sid(sdc).unwrap();
        assert!(matches!(sdc_disk.content, DiskContent::Empty));
        assert!(graph.vgs.is_empty());
    }
}
