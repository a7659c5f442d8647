pub mod build;

use serde::{
    Deserialize,
    Serialize,
};

use crate::devicegraph::{
    FsType,
    PartitionKind,
    TableKind,
};
use crate::entity::size::DiskSize;
use crate::errors::PlanError;
use crate::proposal::settings::SpaceSettings;

/// YAML description of the current disks plus the requested volumes and
/// policies. This is the whole input of a planning run.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub disks: Vec<ScenarioDisk>,

    /// Disks the planner may modify; all disks when omitted
    #[serde(alias = "candidate_disks")]
    pub candidates: Option<Vec<String>>,

    /// Devices that must never be deleted or resized
    #[serde(alias = "protected_devices")]
    pub protected: Option<Vec<String>>,

    #[serde(default)]
    pub settings: SpaceSettings,

    #[serde(alias = "volumes", alias = "requests")]
    pub planned: Vec<ScenarioPlanned>,

    #[serde(alias = "lvm", alias = "volume_groups")]
    pub planned_vgs: Option<Vec<ScenarioVg>>,
}

impl Scenario {
    #[inline]
    pub fn from_yaml(scenario_yaml: &str) -> Result<Self, PlanError> {
        serde_yaml::from_str(scenario_yaml)
            .map_err(|err| PlanError::BadScenario(err.to_string()))
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDisk {
    pub device: String,
    pub size: DiskSize,
    pub table: Option<TableKind>,

    #[serde(default)]
    pub partitions: Vec<ScenarioPartition>,

    /// Whole disk used directly as a physical volume of the named VG
    #[serde(alias = "pv_of")]
    pub pv: Option<String>,

    /// Whole disk formatted directly, no partition table
    #[serde(alias = "filesystem")]
    pub fs: Option<FsType>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPartition {
    pub size: DiskSize,

    /// Offset on disk; partitions are packed front to back when omitted
    pub start: Option<DiskSize>,

    #[serde(alias = "type")]
    pub kind: Option<PartitionKind>,

    #[serde(alias = "filesystem")]
    pub fs: Option<FsType>,

    pub label: Option<String>,
    pub uuid: Option<String>,

    /// Verdict of the external probing: a bootable foreign system
    #[serde(alias = "windows")]
    pub windows_system: Option<bool>,

    /// Physical volume of an existing VG
    pub vg: Option<String>,

    /// Member of an existing RAID
    pub raid: Option<String>,

    /// Member of a multidevice filesystem
    #[serde(alias = "multidevice_fs")]
    pub multi_fs: Option<String>,

    pub resize: Option<ScenarioResize>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResize {
    pub min: DiskSize,
    pub max: Option<DiskSize>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPlanned {
    #[serde(alias = "mount_point")]
    pub mount: Option<String>,

    #[serde(alias = "filesystem")]
    pub fs: Option<FsType>,

    #[serde(alias = "min_size")]
    pub min: Option<DiskSize>,

    #[serde(alias = "desired_size")]
    pub desired: Option<DiskSize>,

    #[serde(alias = "max_size")]
    pub max: Option<DiskSize>,

    pub weight: Option<u64>,

    /// Pin this request to one disk
    pub disk: Option<String>,

    /// Keep an existing device instead of creating a new partition
    pub reuse: Option<String>,

    pub boot: Option<bool>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioVg {
    pub name: String,

    /// "use_needed" or "use_available"
    pub strategy: Option<String>,

    #[serde(alias = "target_size")]
    pub size: DiskSize,

    pub extent_size: Option<DiskSize>,
}

#[test]
fn test_parse() {
    let example_yaml = include_str!("./examples/windows-linux.yaml");
    let scenario = Scenario::from_yaml(example_yaml).unwrap();

    assert_eq!(1, scenario.disks.len());
    assert_eq!(3, scenario.disks[0].partitions.len());
    assert_eq!(Some(true), scenario.disks[0].partitions[0].windows_system);
    assert_eq!(3, scenario.planned.len());
    assert!(scenario.settings.resize_windows);
}
