use crate::devicegraph::FsType;
use crate::entity::size::DiskSize;

/// A requested future partition.
///
/// `size` starts at zero and is filled in by the allocator once the
/// partition has been assigned to a free space. The planner always works on
/// its own clones; callers keep their originals untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPartition {
    pub mount_point: Option<String>,
    pub fs_type: Option<FsType>,
    pub min_size: DiskSize,
    pub desired_size: Option<DiskSize>,
    pub max_size: DiskSize,
    pub weight: u64,
    pub disk: Option<String>,
    pub reuse: Option<String>,
    pub boot: bool,
    // Set when this partition will become a physical volume of a new VG
    pub vg: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
    pub size: DiskSize,
}

impl Default for PlannedPartition {
    fn default() -> Self {
        PlannedPartition {
            mount_point: None,
            fs_type: None,
            min_size: DiskSize::zero(),
            desired_size: None,
            max_size: DiskSize::unlimited(),
            weight: 0,
            disk: None,
            reuse: None,
            boot: false,
            vg: None,
            label: None,
            uuid: None,
            size: DiskSize::zero(),
        }
    }
}

impl PlannedPartition {
    pub fn new(mount_point: &str, min_size: DiskSize) -> Self {
        PlannedPartition {
            mount_point: Some(mount_point.to_string()),
            min_size,
            ..Default::default()
        }
    }

    pub fn is_reuse(&self) -> bool {
        self.reuse.is_some()
    }

    /// Copy whose minimum is raised to the desired size, for the ambitious
    /// first proposal attempt
    pub fn with_desired_min(&self) -> Self {
        let mut part = self.clone();
        if let Some(desired) = part.desired_size {
            part.min_size = part.min_size.max(desired);
        }

        part
    }

    /// Label used when reporting this request as unmet
    pub fn request_name(&self) -> String {
        match (&self.mount_point, &self.vg) {
            (Some(mount), _) => mount.clone(),
            (None, Some(vg)) => format!("lvm/{vg}"),
            _ => "(unnamed)".to_string(),
        }
    }
}

/// A volume group to be created on newly added physical volumes.
///
/// `strategy` stays a plain string here; the phys-vol calculator validates
/// it at construction and rejects unknown names up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedVg {
    pub name: String,
    pub strategy: String,
    pub target_size: DiskSize,
    pub extent_size: DiskSize,
}

impl PlannedVg {
    pub const PV_OVERHEAD: DiskSize = DiskSize::mib(1);

    pub fn new(name: &str, strategy: &str, target_size: DiskSize) -> Self {
        PlannedVg {
            name: name.to_string(),
            strategy: strategy.to_string(),
            target_size,
            extent_size: DiskSize::mib(4),
        }
    }

    /// Usable VG capacity a physical volume of `pv_size` contributes:
    /// metadata overhead off the top, then whole extents only
    pub fn pv_useful_size(&self, pv_size: DiskSize) -> DiskSize {
        (pv_size - Self::PV_OVERHEAD).floor_align(self.extent_size)
    }

    /// Smallest PV size contributing at least `useful` of VG capacity
    pub fn pv_size_for(&self, useful: DiskSize) -> DiskSize {
        useful.ceil_align(self.extent_size) + Self::PV_OVERHEAD
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlannedDevices {
    pub partitions: Vec<PlannedPartition>,
    pub vgs: Vec<PlannedVg>,
}
