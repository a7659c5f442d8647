use std::collections::{
    HashMap,
    HashSet,
};

use tracing::{
    debug,
    info,
};

use crate::devicegraph::free_space::FreeSpace;
use crate::devicegraph::region::Region;
use crate::devicegraph::{
    Devicegraph,
    DiskContent,
    FsType,
    PartitionKind,
    Sid,
};
use crate::entity::size::DiskSize;
use crate::errors::PlanError;

use super::analyzer::{
    Category,
    DiskAnalyzer,
};
use super::cascade::CascadeDeleter;
use super::distribution::{
    distribute,
    Distribution,
    Shortfall,
};
use super::phys_vol::PhysVolCalculator;
use super::planned::{
    PlannedPartition,
    PlannedVg,
};
use super::settings::{
    DeleteMode,
    SpaceAction,
    SpaceSettings,
};

/// Everything worth remembering about a partition that is gone now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedPartition {
    pub sid: Sid,
    pub name: String,
    pub size: DiskSize,
    pub fs_type: Option<FsType>,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizedPartition {
    pub sid: Sid,
    pub name: String,
    pub from: DiskSize,
    pub to: DiskSize,
}

/// Outcome of a successful space hunt: the mutated working graph, the
/// audit trail of what it cost, and where the new partitions will go
#[derive(Debug, Clone)]
pub struct SpaceResult {
    pub devicegraph: Devicegraph,
    pub deleted: Vec<DeletedPartition>,
    pub resized: Vec<ResizedPartition>,
    pub wiped_disks: Vec<String>,
    pub distribution: Distribution,
}

/// Searches for enough room to host the planned partitions, escalating
/// from free space over resizing to deletion, one action at a time.
///
/// Every attempt works on a private duplicate of the snapshot; the caller's
/// graph is never touched.
pub struct SpaceMaker<'a> {
    analyzer: &'a DiskAnalyzer,
    settings: &'a SpaceSettings,
}

struct ActionLog {
    deleted: Vec<DeletedPartition>,
    resized: Vec<ResizedPartition>,
    wiped_disks: Vec<String>,
}

impl<'a> SpaceMaker<'a> {
    pub fn new(analyzer: &'a DiskAnalyzer, settings: &'a SpaceSettings) -> Self {
        SpaceMaker { analyzer, settings }
    }

    /// Performs only the mandatory deletions (`all` modes) and returns the
    /// resulting graph, for callers that want to show the pruned system
    /// before any planning happens.
    pub fn prepare_devicegraph(
        &self,
        graph: &Devicegraph,
        disks: &[String],
        protected: &HashSet<Sid>,
    ) -> Devicegraph {
        let mut working = graph.duplicate();
        let mut log = ActionLog {
            deleted: Vec::new(),
            resized: Vec::new(),
            wiped_disks: Vec::new(),
        };

        self.mandatory_deletions(&mut working, disks, protected, &mut log);
        working
    }

    /// Makes room for all planned partitions (and the physical volumes of
    /// the planned VGs) on the candidate disks.
    pub fn provide_space(
        &self,
        graph: &Devicegraph,
        disks: &[String],
        planned: &[PlannedPartition],
        vgs: &[PlannedVg],
        protected: &HashSet<Sid>,
    ) -> Result<SpaceResult, PlanError> {
        // Unknown VG strategies blow up before any search is attempted
        let calcs: Vec<PhysVolCalculator> = vgs
            .iter()
            .map(PhysVolCalculator::new)
            .collect::<Result<_, _>>()?;

        let mut working = graph.duplicate();
        let mut log = ActionLog {
            deleted: Vec::new(),
            resized: Vec::new(),
            wiped_disks: Vec::new(),
        };

        self.mandatory_deletions(&mut working, disks, protected, &mut log);

        // Disks hosting pinned requests contribute their free space even
        // when they are not candidates for destructive actions
        let space_disks = space_scope(disks, planned);

        if let Ok(dist) = self.attempt(&working, &space_disks, planned, &calcs) {
            info!("provisional allocation already fits, nothing to do");
            return Ok(result(working, log, dist));
        }

        // A pinned request must be satisfiable on its own disk before any
        // space elsewhere is taken into account
        for disk_name in &space_disks {
            let pinned: Vec<PlannedPartition> = planned
                .iter()
                .filter(|p| p.disk.as_deref() == Some(disk_name.as_str()))
                .cloned()
                .collect();
            if pinned.is_empty() {
                continue;
            }

            let scope = vec![disk_name.clone()];
            let action_scope: &[String] = if disks.contains(disk_name) {
                &scope
            } else {
                // Not a candidate: nothing may be deleted or resized there
                &[]
            };

            self.escalate(
                &mut working,
                action_scope,
                &scope,
                &pinned,
                &[],
                protected,
                &mut log,
            )
            .map_err(|err| match err {
                PlanError::NoDiskSpace { missing, .. } => {
                    PlanError::RestrictedDiskFull {
                        disk: disk_name.clone(),
                        missing,
                    }
                }
                other => other,
            })?;
        }

        let dist = self.escalate(
            &mut working,
            disks,
            &space_disks,
            planned,
            &calcs,
            protected,
            &mut log,
        )?;

        Ok(result(working, log, dist))
    }

    /// One allocation attempt against the current free spaces
    fn attempt(
        &self,
        working: &Devicegraph,
        space_disks: &[String],
        planned: &[PlannedPartition],
        calcs: &[PhysVolCalculator],
    ) -> Result<Distribution, Shortfall> {
        let spaces = working.all_free_spaces(space_disks);
        let mut dist = distribute(&spaces, planned)?;
        for calc in calcs {
            dist = calc.add_physical_volumes(&dist, &spaces)?;
        }

        Ok(dist)
    }

    /// Retries the allocation, performing one escalation step per failed
    /// attempt until it fits or no permitted action remains
    #[allow(clippy::too_many_arguments)]
    fn escalate(
        &self,
        working: &mut Devicegraph,
        action_disks: &[String],
        space_disks: &[String],
        planned: &[PlannedPartition],
        calcs: &[PhysVolCalculator],
        protected: &HashSet<Sid>,
        log: &mut ActionLog,
    ) -> Result<Distribution, PlanError> {
        let mut unshrinkable: HashSet<Sid> = HashSet::new();

        loop {
            let shortfall =
                match self.attempt(working, space_disks, planned, calcs) {
                    Ok(dist) => return Ok(dist),
                    Err(shortfall) => shortfall,
                };

            let missing = shortfall.missing_size();
            debug!(missing = %missing, "allocation still short");

            let acted = self.next_action(
                working,
                action_disks,
                protected,
                missing,
                &mut unshrinkable,
                log,
            );
            if !acted {
                info!("no permitted action left, giving up");
                return Err(shortfall_error(shortfall));
            }
        }
    }

    /// Performs the first action the policy order still allows.
    /// Returns false when nothing destructive remains to try.
    fn next_action(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        protected: &HashSet<Sid>,
        missing: DiskSize,
        unshrinkable: &mut HashSet<Sid>,
        log: &mut ActionLog,
    ) -> bool {
        for action in self.settings.action_order.iter().copied() {
            let acted = match action {
                SpaceAction::ResizeWindows => {
                    self.settings.resize_windows
                        && self.resize_one(
                            working,
                            disks,
                            protected,
                            missing,
                            unshrinkable,
                            log,
                        )
                }
                SpaceAction::DeleteLinux => {
                    self.delete_one(working, disks, Category::Linux, protected, log)
                }
                SpaceAction::DeleteOther => {
                    self.delete_one(working, disks, Category::Other, protected, log)
                }
                SpaceAction::DeleteWindows => {
                    self.delete_one(
                        working,
                        disks,
                        Category::Windows,
                        protected,
                        log,
                    )
                }
            };

            if acted {
                return true;
            }
        }

        false
    }

    /// Deletes every partition of the categories configured as `all` on
    /// the candidate disks, needed or not
    fn mandatory_deletions(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        protected: &HashSet<Sid>,
        log: &mut ActionLog,
    ) {
        for category in [Category::Linux, Category::Windows, Category::Other] {
            if self.settings.delete_mode(category) != DeleteMode::All {
                continue;
            }

            for disk_name in disks {
                while let Some(sid) =
                    self.deletion_candidate(working, disk_name, category, protected)
                {
                    self.kill(working, disks, sid, protected, log);
                }

                self.wipe_direct_content(working, disks, disk_name, category, protected, log);
            }
        }
    }

    /// On-demand deletion: one partition per call, the one added last to
    /// its table (highest start offset)
    fn delete_one(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        category: Category,
        protected: &HashSet<Sid>,
        log: &mut ActionLog,
    ) -> bool {
        if self.settings.delete_mode(category) != DeleteMode::OnDemand {
            return false;
        }

        for disk_name in disks {
            if let Some(sid) =
                self.deletion_candidate(working, disk_name, category, protected)
            {
                self.kill(working, disks, sid, protected, log);
                return true;
            }

            if self.wipe_direct_content(
                working, disks, disk_name, category, protected, log,
            ) {
                return true;
            }
        }

        false
    }

    fn deletion_candidate(
        &self,
        working: &Devicegraph,
        disk_name: &str,
        category: Category,
        protected: &HashSet<Sid>,
    ) -> Option<Sid> {
        let disk = working.find_disk(disk_name)?;
        let table = disk.table()?;
        let has_logicals = !table.logicals().is_empty();

        table
            .partitions
            .iter()
            .filter(|p| !protected.contains(&p.sid))
            // An extended partition only goes away through its logicals
            .filter(|p| !(p.kind == PartitionKind::Extended && has_logicals))
            // A wiped implicit slot has nothing left to delete
            .filter(|p| !(table.kind.is_implicit() && p.content.is_empty()))
            .filter(|p| self.analyzer.category(p) == category)
            .max_by_key(|p| p.region.start())
            .map(|p| p.sid)
    }

    /// Whole-disk content (a disk used directly as PV or filesystem)
    /// counts as one deletable unit of its category
    fn wipe_direct_content(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        disk_name: &str,
        category: Category,
        protected: &HashSet<Sid>,
        log: &mut ActionLog,
    ) -> bool {
        let Some(disk) = working.find_disk(disk_name) else {
            return false;
        };
        let DiskContent::Direct(content) = &disk.content else {
            return false;
        };
        if protected.contains(&disk.sid)
            || self.analyzer.disk_content_category(content) != category
        {
            return false;
        }

        let disk_sid = disk.sid;
        let details = partition_details(working);
        let sids = CascadeDeleter::new(
            working,
            Some(disks),
            protected,
            self.settings.keep_partition_tables,
        )
        .delete_disk_content(disk_sid);

        log.wiped_disks.push(disk_name.to_string());
        record_deleted(&details, &sids, log);

        true
    }

    fn kill(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        sid: Sid,
        protected: &HashSet<Sid>,
        log: &mut ActionLog,
    ) {
        let details = partition_details(working);
        let sids = CascadeDeleter::new(
            working,
            Some(disks),
            protected,
            self.settings.keep_partition_tables,
        )
        .delete_by_sid(sid);

        record_deleted(&details, &sids, log);
    }

    /// Shrinks one resizable Windows partition by the current shortfall.
    /// The candidate with the most slack goes first, ties broken by the
    /// lowest start offset.
    fn resize_one(
        &self,
        working: &mut Devicegraph,
        disks: &[String],
        protected: &HashSet<Sid>,
        missing: DiskSize,
        unshrinkable: &mut HashSet<Sid>,
        log: &mut ActionLog,
    ) -> bool {
        let mut candidates: Vec<(Sid, DiskSize, u64)> = Vec::new();

        for disk_name in disks {
            let Some(disk) = working.find_disk(disk_name) else {
                continue;
            };
            let Some(table) = disk.table() else {
                continue;
            };

            for part in &table.partitions {
                if !self.analyzer.windows_partition(part.sid)
                    || protected.contains(&part.sid)
                    || unshrinkable.contains(&part.sid)
                {
                    continue;
                }
                let Some(resize) = part.resize else {
                    continue;
                };

                let slack = part.size().saturating_sub(resize.min_size);
                if slack.is_zero() {
                    continue;
                }

                candidates.push((part.sid, slack, part.region.start()));
            }
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for (sid, ..) in candidates {
            match self.shrunk_size(working, sid, missing) {
                Some((name, from, to, new_length)) => {
                    info!(
                        name = %name,
                        from = %from,
                        to = %to,
                        "shrinking partition",
                    );
                    working.shrink_partition(sid, new_length);
                    log.resized.push(ResizedPartition {
                        sid,
                        name,
                        from,
                        to,
                    });
                    return true;
                }
                None => {
                    unshrinkable.insert(sid);
                }
            }
        }

        false
    }

    /// Target size for shrinking `sid` by `missing`: end pulled back onto
    /// the grain, never below the reported minimum. None if the partition
    /// cannot get any smaller.
    fn shrunk_size(
        &self,
        working: &Devicegraph,
        sid: Sid,
        missing: DiskSize,
    ) -> Option<(String, DiskSize, DiskSize, u64)> {
        let (disk, part) = working.find_partition(sid)?;
        let resize = part.resize?;
        let grain = disk.effective_table_kind().align_grain();

        let current = part.size();
        let start = part.region.start_bytes();

        let wanted = current.saturating_sub(missing).max(resize.min_size);
        let mut target = (start + wanted).floor_align(grain) - start;
        if target < resize.min_size {
            target = (start + resize.min_size).ceil_align(grain) - start;
        }

        if target >= current {
            return None;
        }

        // The gap this shrink would open up behind the partition
        let freed = FreeSpace {
            disk_sid: disk.sid,
            disk_name: disk.name.clone(),
            region: Region::from_bytes(
                start + target,
                current - target,
                disk.block_size,
            ),
            table_kind: disk.effective_table_kind(),
            in_extended: part.kind == PartitionKind::Logical,
            exists: false,
            growing: true,
        };
        debug!(
            name = %part.name,
            would_free = %freed.region.size(),
            "evaluating shrink candidate",
        );

        let new_length = target.bytes() / disk.block_size;
        Some((part.name.clone(), current, target, new_length))
    }
}

fn result(
    devicegraph: Devicegraph,
    log: ActionLog,
    distribution: Distribution,
) -> SpaceResult {
    SpaceResult {
        devicegraph,
        deleted: log.deleted,
        resized: log.resized,
        wiped_disks: log.wiped_disks,
        distribution,
    }
}

fn shortfall_error(shortfall: Shortfall) -> PlanError {
    match shortfall {
        Shortfall::Missing { size, unmet } => PlanError::NoDiskSpace {
            missing: size,
            unmet,
        },
        Shortfall::RestrictedDiskFull { disk, missing } => {
            PlanError::RestrictedDiskFull { disk, missing }
        }
    }
}

/// Snapshot of partition details, taken before a cascade so the deleted
/// sids can be reported with names and filesystems attached
fn partition_details(working: &Devicegraph) -> HashMap<Sid, DeletedPartition> {
    working
        .partitions()
        .into_iter()
        .map(|(_, part)| {
            let fs = part.filesystem();
            (
                part.sid,
                DeletedPartition {
                    sid: part.sid,
                    name: part.name.clone(),
                    size: part.size(),
                    fs_type: fs.map(|f| f.fs_type),
                    label: fs.and_then(|f| f.label.clone()),
                    uuid: fs.and_then(|f| f.uuid.clone()),
                },
            )
        })
        .collect()
}

fn record_deleted(
    details: &HashMap<Sid, DeletedPartition>,
    sids: &[Sid],
    log: &mut ActionLog,
) {
    for sid in sids {
        if let Some(detail) = details.get(sid) {
            log.deleted.push(detail.clone());
        }
    }
}

/// Candidate disks plus any disk a planned partition is pinned to
fn space_scope(disks: &[String], planned: &[PlannedPartition]) -> Vec<String> {
    let mut scope = disks.to_vec();
    for part in planned {
        if let Some(disk) = &part.disk {
            if !scope.contains(disk) {
                scope.push(disk.clone());
            }
        }
    }

    scope
}

#[cfg(test)]
mod tests {
    use crate::devicegraph::region::DEFAULT_BLOCK_SIZE;
    use crate::devicegraph::{
        Filesystem,
        PartitionContent,
        ResizeInfo,
        TableKind,
    };

    use super::*;

    const BS: u64 = DEFAULT_BLOCK_SIZE;

    fn gib_blocks(gib: u64) -> u64 {
        DiskSize::gib(gib).bytes() / BS
    }

    fn fs(fs_type: FsType) -> PartitionContent {
        PartitionContent::Filesystem(Filesystem {
            fs_type,
            label: None,
            uuid: None,
        })
    }

    struct GraphBuilder {
        graph: Devicegraph,
        disk: Sid,
        cursor: u64,
        windows: HashSet<Sid>,
    }

    impl GraphBuilder {
        fn disk(name: &str, size_gib: u64) -> Self {
            let mut graph = Devicegraph::new();
            let disk = graph.add_disk(name, DiskSize::gib(size_gib), BS);
            graph.ensure_table(disk, TableKind::Gpt).unwrap();

            GraphBuilder {
                graph,
                disk,
                cursor: 2048,
                windows: HashSet::new(),
            }
        }

        fn add_disk(mut self, name: &str, size_gib: u64) -> Self {
            self.disk = self.graph.add_disk(name, DiskSize::gib(size_gib), BS);
            self.graph.ensure_table(self.disk, TableKind::Gpt).unwrap();
            self.cursor = 2048;

            self
        }

        fn part(mut self, size_gib: u64, content: PartitionContent) -> (Self, Sid) {
            let sid = self
                .graph
                .create_partition(
                    self.disk,
                    crate::devicegraph::region::Region::new(
                        self.cursor,
                        gib_blocks(size_gib),
                        BS,
                    ),
                    PartitionKind::Primary,
                    content,
                )
                .unwrap();
            self.cursor += gib_blocks(size_gib);

            (self, sid)
        }

        fn windows_part(self, size_gib: u64, min_gib: u64) -> (Self, Sid) {
            let (mut builder, sid) = self.part(size_gib, fs(FsType::Ntfs));
            builder.windows.insert(sid);
            if let Some(part) = builder.graph.partition_mut(sid) {
                part.resize = Some(ResizeInfo {
                    min_size: DiskSize::gib(min_gib),
                    max_size: DiskSize::gib(2048),
                });
            }

            (builder, sid)
        }

        fn build(self) -> (Devicegraph, DiskAnalyzer) {
            (self.graph, DiskAnalyzer::new(self.windows))
        }
    }

    fn request(mount: &str, min_gib: u64) -> PlannedPartition {
        let mut part =
            PlannedPartition::new(mount, DiskSize::gib(min_gib));
        part.weight = 1;

        part
    }

    fn provide(
        graph: &Devicegraph,
        analyzer: &DiskAnalyzer,
        settings: &SpaceSettings,
        disks: &[&str],
        planned: &[PlannedPartition],
    ) -> Result<SpaceResult, PlanError> {
        let disks: Vec<String> = disks.iter().map(|d| d.to_string()).collect();
        SpaceMaker::new(analyzer, settings).provide_space(
            graph,
            &disks,
            planned,
            &[],
            &HashSet::new(),
        )
    }

    #[test]
    fn test_bare_disk_needs_no_actions() {
        let (graph, analyzer) = GraphBuilder::disk("/dev/sda", 50).build();
        // Drop the empty table so the disk is truly bare
        let mut graph = graph;
        graph.drop_table_if_empty(1);

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 40)],
        )
        .unwrap();

        assert!(result.deleted.is_empty());
        assert!(result.resized.is_empty());

        // The disk stays untouched, the planning just assumes a future GPT
        let disk = result.devicegraph.find_disk("/dev/sda").unwrap();
        assert!(disk.table().is_none());

        let space = &result.distribution.spaces[0].space;
        let expected = DiskSize::gib(50)
            - DiskSize::mib(1)
            - (DiskSize::kib(16) + DiskSize::new(512));
        assert_eq!(expected, space.size());
    }

    #[test]
    fn test_too_small_disk_fails() {
        let (graph, analyzer) = GraphBuilder::disk("/dev/sda", 50).build();
        let settings = SpaceSettings::default();

        match provide(&graph, &analyzer, &settings, &["/dev/sda"], &[request("/1", 60)]) {
            Err(PlanError::NoDiskSpace { unmet, .. }) => {
                assert_eq!(vec!["/1".to_string()], unmet);
            }
            other => panic!("expected no-space error, got {other:?}"),
        }
    }

    #[test]
    fn test_linux_goes_before_windows_is_touched() {
        // windows 250 GiB (resizable), root 200 GiB, swap 2 GiB on 500 GiB
        let (builder, windows) =
            GraphBuilder::disk("/dev/sda", 500).windows_part(250, 100);
        let (builder, root) = builder.part(200, fs(FsType::Ext4));
        let (builder, swap) = builder.part(2, fs(FsType::Swap));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 100)],
        )
        .unwrap();

        // Both Linux partitions fall (last first), Windows stays intact
        let deleted: Vec<Sid> = result.deleted.iter().map(|d| d.sid).collect();
        assert_eq!(vec![swap, root], deleted);
        assert!(result.resized.is_empty());

        let (_, win) = result.devicegraph.find_partition(windows).unwrap();
        assert_eq!(DiskSize::gib(250), win.size());
    }

    #[test]
    fn test_resize_preferred_over_deleting_windows() {
        // One resizable windows partition, nothing else on a 400 GiB disk
        let (builder, windows) =
            GraphBuilder::disk("/dev/sda", 400).windows_part(250, 100);
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 150)],
        )
        .unwrap();

        assert!(result.deleted.is_empty());
        assert_eq!(1, result.resized.len());
        assert_eq!(windows, result.resized[0].sid);

        let (_, win) = result.devicegraph.find_partition(windows).unwrap();
        assert!(win.size() >= DiskSize::gib(100));
        assert!(win.size() < DiskSize::gib(250));
        // Shrunk by roughly the missing amount, not down to the minimum
        assert!(win.size() > DiskSize::gib(240));
    }

    #[test]
    fn test_other_deleted_before_windows() {
        // windows 730..779 GiB resizable, recovery 20 GiB, on 800 GiB
        let (builder, windows) =
            GraphBuilder::disk("/dev/sda", 800).windows_part(779, 730);
        let (builder, recovery) = builder.part(20, fs(FsType::Vfat));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 60)],
        )
        .unwrap();

        // Windows shrinks to its minimum, recovery goes, windows survives
        let deleted: Vec<Sid> = result.deleted.iter().map(|d| d.sid).collect();
        assert_eq!(vec![recovery], deleted);

        let (_, win) = result.devicegraph.find_partition(windows).unwrap();
        assert_eq!(DiskSize::gib(730), win.size());
    }

    #[test]
    fn test_windows_deleted_as_last_resort() {
        let (builder, windows) =
            GraphBuilder::disk("/dev/sda", 800).windows_part(779, 730);
        let (builder, recovery) = builder.part(20, fs(FsType::Vfat));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings {
            resize_windows: false,
            delete_other: DeleteMode::None,
            ..Default::default()
        };
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 60)],
        )
        .unwrap();

        let deleted: Vec<Sid> = result.deleted.iter().map(|d| d.sid).collect();
        assert_eq!(vec![windows], deleted);
        assert!(result
            .devicegraph
            .find_partition(recovery)
            .is_some());
    }

    #[test]
    fn test_nothing_permitted_fails() {
        let (builder, _) =
            GraphBuilder::disk("/dev/sda", 800).windows_part(779, 730);
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings {
            resize_windows: false,
            delete_windows: DeleteMode::None,
            delete_linux: DeleteMode::None,
            delete_other: DeleteMode::None,
            ..Default::default()
        };

        assert!(matches!(
            provide(&graph, &analyzer, &settings, &["/dev/sda"], &[request("/1", 60)]),
            Err(PlanError::NoDiskSpace { .. }),
        ));
    }

    #[test]
    fn test_all_mode_deletes_unconditionally() {
        let (builder, root) = GraphBuilder::disk("/dev/sda", 500)
            .part(50, fs(FsType::Ext4));
        let (builder, home) = builder.part(100, fs(FsType::Btrfs));
        let (builder, other_disk_part) = builder
            .add_disk("/dev/sdb", 100)
            .part(30, fs(FsType::Ext4));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings {
            delete_linux: DeleteMode::All,
            ..Default::default()
        };
        // A 10 GiB request would have fit into the tail without deleting
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 10)],
        )
        .unwrap();

        let deleted: HashSet<Sid> = result.deleted.iter().map(|d| d.sid).collect();
        assert_eq!(HashSet::from([root, home]), deleted);
        // Out of candidate scope: untouched
        assert!(result
            .devicegraph
            .find_partition(other_disk_part)
            .is_some());
    }

    #[test]
    fn test_less_full_windows_resized_first() {
        // sda1 has 50 GiB slack, sdb1 has 150 GiB
        let (builder, sda1) =
            GraphBuilder::disk("/dev/sda", 260).windows_part(250, 200);
        let (builder, sdb1) = builder
            .add_disk("/dev/sdb", 260)
            .windows_part(250, 100);
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda", "/dev/sdb"],
            &[request("/1", 120)],
        )
        .unwrap();

        assert!(!result.resized.is_empty());
        assert!(result.resized.iter().all(|r| r.sid == sdb1));

        let (_, untouched) = result.devicegraph.find_partition(sda1).unwrap();
        assert_eq!(DiskSize::gib(250), untouched.size());

        let (_, shrunk) = result.devicegraph.find_partition(sdb1).unwrap();
        assert!(shrunk.size() >= DiskSize::gib(100));
        assert!(shrunk.size() < DiskSize::gib(250));
    }

    #[test]
    fn test_restricted_shortfall_beats_abundance_elsewhere() {
        let (builder, _) = GraphBuilder::disk("/dev/sda", 100)
            .part(90, fs(FsType::Vfat));
        let builder = builder.add_disk("/dev/sdb", 500);
        let (graph, analyzer) = builder.build();

        // sda cannot host 150 GiB no matter what gets deleted
        let mut pinned = request("/pinned", 150);
        pinned.disk = Some("/dev/sda".to_string());

        let settings = SpaceSettings::default();
        match provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda", "/dev/sdb"],
            &[pinned],
        ) {
            Err(PlanError::RestrictedDiskFull { disk, .. }) => {
                assert_eq!("/dev/sda", disk);
            }
            other => panic!("expected restricted failure, got {other:?}"),
        }
    }

    #[test]
    fn test_protected_partitions_survive_all_mode() {
        let (builder, root) = GraphBuilder::disk("/dev/sda", 500)
            .part(50, fs(FsType::Ext4));
        let (builder, home) = builder.part(100, fs(FsType::Ext4));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings {
            delete_linux: DeleteMode::All,
            ..Default::default()
        };
        let maker = SpaceMaker::new(&analyzer, &settings);
        let result = maker
            .provide_space(
                &graph,
                &["/dev/sda".to_string()],
                &[request("/1", 10)],
                &[],
                &HashSet::from([root]),
            )
            .unwrap();

        assert!(result.devicegraph.find_partition(root).is_some());
        assert!(result.devicegraph.find_partition(home).is_none());
    }

    #[test]
    fn test_whole_disk_pv_gets_wiped() {
        let mut graph = Devicegraph::new();
        let sda = graph.add_disk("/dev/sda", DiskSize::gib(100), BS);
        if let Some(disk) = graph.disk_by_sid_mut(sda) {
            disk.content = DiskContent::Direct(PartitionContent::LvmPv {
                vg: Some("vg0".to_string()),
            });
        }
        graph.create_vg("vg0", DiskSize::mib(4));
        let analyzer = DiskAnalyzer::default();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 20)],
        )
        .unwrap();

        assert_eq!(vec!["/dev/sda".to_string()], result.wiped_disks);
        assert!(result.devicegraph.vgs.is_empty());
        let disk = result.devicegraph.find_disk("/dev/sda").unwrap();
        assert!(matches!(disk.content, DiskContent::Empty));
    }

    #[test]
    fn test_wiped_implicit_slot_is_reused_as_space() {
        let mut graph = Devicegraph::new();
        let dasda = graph.add_disk("/dev/dasda", DiskSize::gib(20), BS);
        graph.ensure_table(dasda, TableKind::Implicit).unwrap();
        let slot = graph
            .create_partition(
                dasda,
                crate::devicegraph::region::Region::new(
                    2048,
                    gib_blocks(19),
                    BS,
                ),
                PartitionKind::Primary,
                fs(FsType::Ext3),
            )
            .unwrap();
        let analyzer = DiskAnalyzer::default();

        let settings = SpaceSettings::default();
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/dasda"],
            &[request("/1", 2)],
        )
        .unwrap();

        // The slot stays in the table, emptied, and provides the space
        let (_, part) = result.devicegraph.find_partition(slot).unwrap();
        assert!(part.content.is_empty());
        assert_eq!(vec![slot], result.deleted.iter().map(|d| d.sid).collect::<Vec<_>>());
        assert!(!result.distribution.spaces.is_empty());
    }

    #[test]
    fn test_enough_space_after_full_wipe_succeeds() {
        // Property: if the total min fits into what deleting everything
        // non-protected would free, provide_space succeeds
        let (builder, _) = GraphBuilder::disk("/dev/sda", 200)
            .part(80, fs(FsType::Ext4));
        let (builder, _) = builder.part(80, fs(FsType::Vfat));
        let (graph, analyzer) = builder.build();

        let settings = SpaceSettings {
            delete_linux: DeleteMode::All,
            delete_other: DeleteMode::All,
            delete_windows: DeleteMode::All,
            ..Default::default()
        };
        let result = provide(
            &graph,
            &analyzer,
            &settings,
            &["/dev/sda"],
            &[request("/1", 190)],
        )
        .unwrap();

        assert_eq!(2, result.deleted.len());
        assert!(result.devicegraph.partitions().is_empty());
    }

    #[test]
    fn test_provide_space_with_planned_vg() {
        let (graph, analyzer) = GraphBuilder::disk("/dev/sda", 100).build();

        let settings = SpaceSettings::default();
        let maker = SpaceMaker::new(&analyzer, &settings);
        let result = maker
            .provide_space(
                &graph,
                &["/dev/sda".to_string()],
                &[request("/", 20)],
                &[PlannedVg::new("system", "use_needed", DiskSize::gib(30))],
                &HashSet::new(),
            )
            .unwrap();

        let pvs: Vec<&PlannedPartition> = result
            .distribution
            .partitions()
            .into_iter()
            .filter(|p| p.vg.is_some())
            .collect();
        assert!(!pvs.is_empty());

        let vg = PlannedVg::new("system", "use_needed", DiskSize::gib(30));
        let useful: DiskSize =
            pvs.iter().map(|p| vg.pv_useful_size(p.size)).sum();
        assert!(useful >= DiskSize::gib(30));
    }

    #[test]
    fn test_bad_vg_strategy_fails_fast() {
        let (graph, analyzer) = GraphBuilder::disk("/dev/sda", 100).build();

        let settings = SpaceSettings::default();
        let maker = SpaceMaker::new(&analyzer, &settings);
        let result = maker.provide_space(
            &graph,
            &["/dev/sda".to_string()],
            &[],
            &[PlannedVg::new("system", "bogus", DiskSize::gib(10))],
            &HashSet::new(),
        );

        assert!(matches!(result, Err(PlanError::BadSettings(_))));
    }
}
