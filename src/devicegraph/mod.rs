pub mod free_space;
pub mod region;

use serde::{
    Deserialize,
    Serialize,
};

use crate::entity::size::DiskSize;
use crate::errors::PlanError;

use region::Region;

/// Stable device identity. Sids survive `Devicegraph::duplicate`, so sets of
/// sids collected on one copy keep resolving on any other copy.
pub type Sid = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    #[serde(rename = "gpt")]
    Gpt,

    #[serde(rename = "mbr", alias = "dos", alias = "mbr-dos")]
    Mbr,

    // Single fixed slot that cannot be removed, e.g. DASD
    #[serde(rename = "implicit")]
    Implicit,
}

impl TableKind {
    /// Size unit partition starts and ends must stay aligned to
    pub fn align_grain(&self) -> DiskSize {
        DiskSize::mib(1)
    }

    /// Space reserved at the front of the disk for the table itself
    pub fn start_overhead(&self) -> DiskSize {
        DiskSize::mib(1)
    }

    /// Space reserved at the tail of the disk (GPT backup structures)
    pub fn end_overhead(&self) -> DiskSize {
        match self {
            TableKind::Gpt => DiskSize::kib(16) + DiskSize::new(512),
            _ => DiskSize::zero(),
        }
    }

    pub fn require_end_alignment(&self) -> bool {
        matches!(self, TableKind::Implicit)
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, TableKind::Implicit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Swap,
    Ntfs,
    Vfat,
}

impl FsType {
    pub fn is_linux(&self) -> bool {
        matches!(
            self,
            FsType::Ext2
                | FsType::Ext3
                | FsType::Ext4
                | FsType::Btrfs
                | FsType::Xfs
                | FsType::Swap
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub fs_type: FsType,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    LvmVg,
    Raid,
    MultiFs,
}

/// What currently lives on a partition (or directly on a disk).
///
/// Closed set on purpose: membership in a multi-device structure is answered
/// by `shared_group`, never by inspecting concrete device types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionContent {
    Empty,
    Filesystem(Filesystem),
    LvmPv { vg: Option<String> },
    RaidMember { raid: String },
    MultiFsMember { fs: String },
}

impl PartitionContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, PartitionContent::Empty)
    }

    /// Multi-device structure this content belongs to, if any
    pub fn shared_group(&self) -> Option<(GroupKind, &str)> {
        match self {
            PartitionContent::LvmPv { vg: Some(vg) } => {
                Some((GroupKind::LvmVg, vg))
            }
            PartitionContent::RaidMember { raid } => {
                Some((GroupKind::Raid, raid))
            }
            PartitionContent::MultiFsMember { fs } => {
                Some((GroupKind::MultiFs, fs))
            }
            _ => None,
        }
    }

    pub fn filesystem(&self) -> Option<&Filesystem> {
        match self {
            PartitionContent::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Primary,
    Extended,
    Logical,
}

/// Shrink limits reported by an external filesystem prober
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeInfo {
    pub min_size: DiskSize,
    pub max_size: DiskSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub sid: Sid,
    pub name: String,
    pub number: u32,
    pub region: Region,
    pub kind: PartitionKind,
    pub content: PartitionContent,
    pub resize: Option<ResizeInfo>,
    pub mount_point: Option<String>,
    pub boot: bool,
}

impl Partition {
    pub fn size(&self) -> DiskSize {
        self.region.size()
    }

    pub fn filesystem(&self) -> Option<&Filesystem> {
        self.content.filesystem()
    }

    /// Formatted swap, relevant for uuid/label inheritance
    pub fn is_swap(&self) -> bool {
        matches!(self.filesystem(), Some(fs) if fs.fs_type == FsType::Swap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub kind: TableKind,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new(kind: TableKind) -> Self {
        PartitionTable {
            kind,
            partitions: Vec::new(),
        }
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.kind == PartitionKind::Extended)
    }

    pub fn logicals(&self) -> Vec<&Partition> {
        self.partitions
            .iter()
            .filter(|p| p.kind == PartitionKind::Logical)
            .collect()
    }

    /// Partitions sorted by start offset
    pub fn sorted(&self) -> Vec<&Partition> {
        let mut parts: Vec<&Partition> = self.partitions.iter().collect();
        parts.sort_by_key(|p| p.region.start());

        parts
    }

    fn next_number(&self, kind: PartitionKind) -> u32 {
        match kind {
            // Logical numbering starts at 5 regardless of primary count
            PartitionKind::Logical => {
                let max = self
                    .logicals()
                    .iter()
                    .map(|p| p.number)
                    .max()
                    .unwrap_or(4);
                max + 1
            }
            _ => {
                let max = self
                    .partitions
                    .iter()
                    .filter(|p| p.kind != PartitionKind::Logical)
                    .map(|p| p.number)
                    .max()
                    .unwrap_or(0);
                max + 1
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskContent {
    Empty,
    Table(PartitionTable),
    // Whole disk used without a partition table (direct PV or filesystem)
    Direct(PartitionContent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub sid: Sid,
    pub name: String,
    pub size: DiskSize,
    pub block_size: u64,
    pub content: DiskContent,
}

impl Disk {
    pub fn table(&self) -> Option<&PartitionTable> {
        match &self.content {
            DiskContent::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn table_mut(&mut self) -> Option<&mut PartitionTable> {
        match &mut self.content {
            DiskContent::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Table kind governing geometry: the existing one, or the kind a new
    /// table would get on this disk
    pub fn effective_table_kind(&self) -> TableKind {
        self.table().map(|t| t.kind).unwrap_or(TableKind::Gpt)
    }

    pub fn blocks(&self) -> u64 {
        self.size.bytes() / self.block_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvmVg {
    pub sid: Sid,
    pub name: String,
    pub extent_size: DiskSize,
}

/// Arena of disks, partitions, and volume groups.
///
/// Sids are handed out monotonically and never reused; duplicating the graph
/// preserves them, which is what makes protected sets and cascade lookups
/// work across working copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Devicegraph {
    next_sid: Sid,
    pub disks: Vec<Disk>,
    pub vgs: Vec<LvmVg>,
}

impl Default for Devicegraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Devicegraph {
    pub fn new() -> Self {
        Devicegraph {
            next_sid: 1,
            disks: Vec::new(),
            vgs: Vec::new(),
        }
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    fn alloc_sid(&mut self) -> Sid {
        let sid = self.next_sid;
        self.next_sid += 1;

        sid
    }

    pub fn add_disk(
        &mut self,
        name: &str,
        size: DiskSize,
        block_size: u64,
    ) -> Sid {
        let sid = self.alloc_sid();
        self.disks.push(Disk {
            sid,
            name: name.to_string(),
            size,
            block_size,
            content: DiskContent::Empty,
        });

        sid
    }

    pub fn find_disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    pub fn find_disk_mut(&mut self, name: &str) -> Option<&mut Disk> {
        self.disks.iter_mut().find(|d| d.name == name)
    }

    pub fn disk_by_sid(&self, sid: Sid) -> Option<&Disk> {
        self.disks.iter().find(|d| d.sid == sid)
    }

    pub fn disk_by_sid_mut(&mut self, sid: Sid) -> Option<&mut Disk> {
        self.disks.iter_mut().find(|d| d.sid == sid)
    }

    /// All partitions with their owning disk
    pub fn partitions(&self) -> Vec<(&Disk, &Partition)> {
        let mut result = Vec::new();
        for disk in &self.disks {
            if let Some(table) = disk.table() {
                for part in &table.partitions {
                    result.push((disk, part));
                }
            }
        }

        result
    }

    pub fn find_partition(&self, sid: Sid) -> Option<(&Disk, &Partition)> {
        self.partitions().into_iter().find(|(_, p)| p.sid == sid)
    }

    /// Sid of the partition or disk with the given kernel name
    pub fn find_by_name(&self, name: &str) -> Option<Sid> {
        if let Some((_, part)) =
            self.partitions().into_iter().find(|(_, p)| p.name == name)
        {
            return Some(part.sid);
        }

        self.find_disk(name).map(|d| d.sid)
    }

    pub fn partition_by_name_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut Partition> {
        for disk in &mut self.disks {
            if let Some(table) = disk.table_mut() {
                if let Some(part) =
                    table.partitions.iter_mut().find(|p| p.name == name)
                {
                    return Some(part);
                }
            }
        }

        None
    }

    pub fn partition_mut(&mut self, sid: Sid) -> Option<&mut Partition> {
        for disk in &mut self.disks {
            if let Some(table) = disk.table_mut() {
                if let Some(part) =
                    table.partitions.iter_mut().find(|p| p.sid == sid)
                {
                    return Some(part);
                }
            }
        }

        None
    }

    /// Structurally removes one partition entry. No cascade, no table
    /// cleanup; that policy lives in the cascade deleter.
    pub fn delete_partition(&mut self, sid: Sid) -> bool {
        for disk in &mut self.disks {
            if let Some(table) = disk.table_mut() {
                let before = table.partitions.len();
                table.partitions.retain(|p| p.sid != sid);
                if table.partitions.len() != before {
                    return true;
                }
            }
        }

        false
    }

    pub fn wipe_partition(&mut self, sid: Sid) {
        if let Some(part) = self.partition_mut(sid) {
            part.content = PartitionContent::Empty;
            part.mount_point = None;
        }
    }

    pub fn wipe_disk(&mut self, sid: Sid) {
        if let Some(disk) = self.disk_by_sid_mut(sid) {
            disk.content = DiskContent::Empty;
        }
    }

    pub fn shrink_partition(&mut self, sid: Sid, new_length: u64) {
        if let Some(part) = self.partition_mut(sid) {
            part.region = part.region.with_length(new_length);
        }
    }

    pub fn drop_table_if_empty(&mut self, disk_sid: Sid) {
        if let Some(disk) = self.disk_by_sid_mut(disk_sid) {
            let empty = matches!(&disk.content, DiskContent::Table(t) if t.partitions.is_empty());
            if empty {
                disk.content = DiskContent::Empty;
            }
        }
    }

    pub fn create_vg(&mut self, name: &str, extent_size: DiskSize) -> Sid {
        let sid = self.alloc_sid();
        self.vgs.push(LvmVg {
            sid,
            name: name.to_string(),
            extent_size,
        });

        sid
    }

    pub fn remove_vg(&mut self, name: &str) {
        self.vgs.retain(|vg| vg.name != name);
    }

    /// Physical volumes (partitions or whole disks) still backing a VG
    pub fn vg_pv_count(&self, name: &str) -> usize {
        let in_parts = self
            .partitions()
            .iter()
            .filter(|(_, p)| {
                matches!(&p.content, PartitionContent::LvmPv { vg: Some(vg) } if vg.as_str() == name)
            })
            .count();
        let in_disks = self
            .disks
            .iter()
            .filter(|d| {
                matches!(
                    &d.content,
                    DiskContent::Direct(PartitionContent::LvmPv { vg: Some(vg) }) if vg.as_str() == name
                )
            })
            .count();

        in_parts + in_disks
    }

    /// Creates a partition table on the disk if it has none.
    /// Returns true when a new table was created.
    pub fn ensure_table(
        &mut self,
        disk_sid: Sid,
        kind: TableKind,
    ) -> Result<bool, PlanError> {
        let disk = self
            .disk_by_sid_mut(disk_sid)
            .ok_or_else(|| PlanError::PlanBug(format!("no disk with sid {disk_sid}")))?;

        match &disk.content {
            DiskContent::Table(_) => Ok(false),
            DiskContent::Empty => {
                disk.content = DiskContent::Table(PartitionTable::new(kind));
                Ok(true)
            }
            DiskContent::Direct(_) => Err(PlanError::PlanBug(format!(
                "disk {} still holds direct content",
                disk.name,
            ))),
        }
    }

    pub fn create_partition(
        &mut self,
        disk_sid: Sid,
        region: Region,
        kind: PartitionKind,
        content: PartitionContent,
    ) -> Result<Sid, PlanError> {
        let sid = self.alloc_sid();

        let disk = self
            .disk_by_sid_mut(disk_sid)
            .ok_or_else(|| PlanError::PlanBug(format!("no disk with sid {disk_sid}")))?;
        let disk_name = disk.name.clone();

        let table = disk.table_mut().ok_or_else(|| {
            PlanError::PlanBug(format!("disk {disk_name} has no partition table"))
        })?;

        for existing in &table.partitions {
            // Logicals live inside the extended region
            if existing.kind == PartitionKind::Extended
                && kind == PartitionKind::Logical
            {
                continue;
            }

            if existing.region.overlaps(&region) {
                return Err(PlanError::PlanBug(format!(
                    "new partition on {disk_name} overlaps {}",
                    existing.name,
                )));
            }
        }

        let number = table.next_number(kind);
        table.partitions.push(Partition {
            sid,
            name: partition_name(&disk_name, number),
            number,
            region,
            kind,
            content,
            resize: None,
            mount_point: None,
            boot: false,
        });

        Ok(sid)
    }
}

/// Kernel-style partition name: /dev/sda1, /dev/nvme0n1p1
pub fn partition_name(disk_name: &str, number: u32) -> String {
    let needs_p = disk_name
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);

    if needs_p {
        format!("{disk_name}p{number}")
    } else {
        format!("{disk_name}{number}")
    }
}
