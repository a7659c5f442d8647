use thiserror::Error;

use crate::entity::size::DiskSize;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no such file")]
    NoSuchFile(std::io::Error, String),

    #[error("no such device")]
    NoSuchDevice(String),

    #[error("bad scenario")]
    BadScenario(String),

    #[error("bad cli arguments")]
    BadArgs(String),

    #[error("bad space settings")]
    BadSettings(String),

    #[error("not enough disk space")]
    NoDiskSpace {
        missing: DiskSize,
        unmet: Vec<String>,
    },

    #[error("not enough space on requested disk")]
    RestrictedDiskFull { disk: String, missing: DiskSize },

    #[error("partplan bug")]
    PlanBug(String),
}
