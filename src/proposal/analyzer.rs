use std::collections::HashSet;

use crate::devicegraph::{
    Partition,
    PartitionContent,
    Sid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Windows,
    Linux,
    Other,
}

/// Classifies existing partitions for the deletion policies.
///
/// Whether an NTFS/FAT partition actually holds a bootable Windows system
/// is an external probing concern; the scenario supplies that verdict and
/// the analyzer only keeps the resulting sids.
#[derive(Debug, Clone, Default)]
pub struct DiskAnalyzer {
    windows_sids: HashSet<Sid>,
}

impl DiskAnalyzer {
    pub fn new(windows_sids: HashSet<Sid>) -> Self {
        DiskAnalyzer { windows_sids }
    }

    pub fn windows_partition(&self, sid: Sid) -> bool {
        self.windows_sids.contains(&sid)
    }

    pub fn category(&self, part: &Partition) -> Category {
        if self.windows_partition(part.sid) {
            return Category::Windows;
        }

        content_category(&part.content)
    }

    /// Category of direct whole-disk content (no partition involved)
    pub fn disk_content_category(&self, content: &PartitionContent) -> Category {
        content_category(content)
    }
}

fn content_category(content: &PartitionContent) -> Category {
    match content {
        PartitionContent::Filesystem(fs) if fs.fs_type.is_linux() => {
            Category::Linux
        }
        PartitionContent::LvmPv { .. }
        | PartitionContent::RaidMember { .. }
        | PartitionContent::MultiFsMember { .. } => Category::Linux,
        _ => Category::Other,
    }
}

#[cfg(test)]
mod tests {
    use crate::devicegraph::region::{
        Region,
        DEFAULT_BLOCK_SIZE,
    };
    use crate::devicegraph::{
        Filesystem,
        FsType,
        PartitionKind,
    };

    use super::*;

    fn partition(sid: Sid, content: PartitionContent) -> Partition {
        Partition {
            sid,
            name: format!("/dev/sda{sid}"),
            number: sid as u32,
            region: Region::new(2048, 2048, DEFAULT_BLOCK_SIZE),
            kind: PartitionKind::Primary,
            content,
            resize: None,
            mount_point: None,
            boot: false,
        }
    }

    fn fs(fs_type: FsType) -> PartitionContent {
        PartitionContent::Filesystem(Filesystem {
            fs_type,
            label: None,
            uuid: None,
        })
    }

    #[test]
    fn test_categories() {
        let analyzer = DiskAnalyzer::new(HashSet::from([1]));

        // Flagged NTFS is Windows, unflagged NTFS is just "other"
        assert_eq!(
            Category::Windows,
            analyzer.category(&partition(1, fs(FsType::Ntfs))),
        );
        assert_eq!(
            Category::Other,
            analyzer.category(&partition(2, fs(FsType::Ntfs))),
        );

        assert_eq!(
            Category::Linux,
            analyzer.category(&partition(3, fs(FsType::Ext4))),
        );
        assert_eq!(
            Category::Linux,
            analyzer.category(&partition(4, fs(FsType::Swap))),
        );
        assert_eq!(
            Category::Linux,
            analyzer.category(&partition(
                5,
                PartitionContent::LvmPv {
                    vg: Some("vg0".to_string()),
                },
            )),
        );
        assert_eq!(
            Category::Linux,
            analyzer.category(&partition(
                6,
                PartitionContent::RaidMember {
                    raid: "/dev/md0".to_string(),
                },
            )),
        );

        assert_eq!(
            Category::Other,
            analyzer.category(&partition(7, fs(FsType::Vfat))),
        );
        assert_eq!(
            Category::Other,
            analyzer.category(&partition(8, PartitionContent::Empty)),
        );
    }
}
