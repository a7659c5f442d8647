use serde::{
    Deserialize,
    Serialize,
};

use super::analyzer::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    None,

    #[default]
    #[serde(alias = "ondemand")]
    OnDemand,

    All,
}

/// Policy knobs for making space.
///
/// `keep_partition_tables` is the import-mode flag: callers that manage
/// partition table reuse themselves set it so emptied tables survive.
/// `action_order` is the escalation policy, least destructive first; the
/// default tries Linux partitions before a Windows resize is even
/// attempted and deletes Windows only as a last resort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceSettings {
    pub resize_windows: bool,
    pub delete_windows: DeleteMode,
    pub delete_linux: DeleteMode,
    pub delete_other: DeleteMode,
    pub keep_partition_tables: bool,
    pub action_order: Vec<SpaceAction>,
}

impl Default for SpaceSettings {
    fn default() -> Self {
        SpaceSettings {
            resize_windows: true,
            delete_windows: DeleteMode::OnDemand,
            delete_linux: DeleteMode::OnDemand,
            delete_other: DeleteMode::OnDemand,
            keep_partition_tables: false,
            action_order: vec![
                SpaceAction::DeleteLinux,
                SpaceAction::ResizeWindows,
                SpaceAction::DeleteOther,
                SpaceAction::DeleteWindows,
            ],
        }
    }
}

/// One step the space maker may take when the current layout is not enough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceAction {
    DeleteLinux,
    ResizeWindows,
    DeleteOther,
    DeleteWindows,
}

impl SpaceSettings {
    pub fn delete_mode(&self, category: Category) -> DeleteMode {
        match category {
            Category::Windows => self.delete_windows,
            Category::Linux => self.delete_linux,
            Category::Other => self.delete_other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_modes() {
        let yaml = r#"
resize_windows: false
delete_windows: none
delete_linux: all
delete_other: ondemand
"#;
        let settings: SpaceSettings = serde_yaml::from_str(yaml).unwrap();

        assert!(!settings.resize_windows);
        assert_eq!(DeleteMode::None, settings.delete_windows);
        assert_eq!(DeleteMode::All, settings.delete_linux);
        assert_eq!(DeleteMode::OnDemand, settings.delete_other);
        assert!(!settings.keep_partition_tables);
    }

    #[test]
    fn test_defaults() {
        let settings: SpaceSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(SpaceSettings::default(), settings);
        assert!(settings.resize_windows);
    }

    #[test]
    fn test_action_order_is_configurable() {
        let yaml = "action_order: [delete_other, resize_windows, delete_linux, delete_windows]";
        let settings: SpaceSettings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(SpaceAction::DeleteOther, settings.action_order[0]);
        assert_eq!(4, settings.action_order.len());
    }
}
