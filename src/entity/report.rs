use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;

use crate::devicegraph::{
    FsType,
    TableKind,
};
use crate::entity::size::DiskSize;

/// Machine-readable outcome of a planning run
#[derive(Debug)]
pub struct PlanReport {
    pub actions: Vec<PlanAction>,
    pub duration: std::time::Duration,
}

impl PlanReport {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "actions": self.actions,
            "elapsedTime": self.duration,
        })
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanAction {
    #[serde(rename = "deletePartition")]
    DeletePartition { device: String, size: DiskSize },

    #[serde(rename = "wipeDisk")]
    WipeDisk { device: String },

    #[serde(rename = "resizePartition")]
    ResizePartition {
        device: String,
        from: DiskSize,
        to: DiskSize,
    },

    #[serde(rename = "createPartitionTable")]
    CreatePartitionTable { device: String, table: TableKind },

    #[serde(rename = "createPartition")]
    CreatePartition {
        device: String,
        number: u32,
        size: DiskSize,

        #[serde(skip_serializing_if = "Option::is_none")]
        fs_type: Option<FsType>,

        #[serde(skip_serializing_if = "Option::is_none")]
        mount_point: Option<String>,
    },

    #[serde(rename = "createLvmPv")]
    CreateLvmPv(String),

    #[serde(rename = "createLvmVg")]
    CreateLvmVg { vg: String, pvs: Vec<String> },

    #[serde(rename = "reuseDevice")]
    ReuseDevice {
        device: String,

        #[serde(skip_serializing_if = "Option::is_none")]
        mount_point: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json() {
        let report = PlanReport {
            actions: vec![
                PlanAction::DeletePartition {
                    device: "/dev/sda3".to_string(),
                    size: DiskSize::gib(10),
                },
                PlanAction::CreatePartition {
                    device: "/dev/sda3".to_string(),
                    number: 3,
                    size: DiskSize::gib(40),
                    fs_type: Some(FsType::Ext4),
                    mount_point: Some("/".to_string()),
                },
            ],
            duration: std::time::Duration::from_millis(3),
        };

        let json = report.to_json_string();
        assert!(json.contains("deletePartition"));
        assert!(json.contains("createPartition"));
        assert!(json.contains("\"40 GiB\""));
    }
}
