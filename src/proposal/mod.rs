pub mod analyzer;
pub mod cascade;
pub mod distribution;
pub mod generator;
pub mod phys_vol;
pub mod planned;
pub mod settings;
pub mod space;

use std::collections::HashSet;

use tracing::info;

use crate::devicegraph::{
    Devicegraph,
    Sid,
};
use crate::errors::PlanError;

use analyzer::DiskAnalyzer;
use generator::{
    PlanGenerator,
    PlanOutcome,
};
use planned::{
    PlannedDevices,
    PlannedPartition,
};
use settings::SpaceSettings;

/// A full proposal run.
///
/// The first attempt treats desired sizes as minima; if space runs out it
/// falls back to the real minima before the failure is surfaced to the
/// caller, so a tight disk still gets a (smaller) working layout.
pub struct Proposal<'a> {
    pub graph: &'a Devicegraph,
    pub analyzer: &'a DiskAnalyzer,
    pub settings: &'a SpaceSettings,
    pub candidates: Vec<String>,
    pub protected: HashSet<Sid>,
    pub devices: PlannedDevices,
}

impl Proposal<'_> {
    pub fn propose(&self) -> Result<PlanOutcome, PlanError> {
        let generator = PlanGenerator::new(self.analyzer, self.settings);

        if let Some(devices) = self.ambitious_devices() {
            match generator.generate(
                self.graph,
                &self.candidates,
                &devices,
                &self.protected,
            ) {
                Ok(outcome) => return Ok(outcome),
                Err(
                    PlanError::NoDiskSpace { .. }
                    | PlanError::RestrictedDiskFull { .. },
                ) => {
                    info!("desired sizes do not fit, retrying with the minima");
                }
                Err(err) => return Err(err),
            }
        }

        generator.generate(
            self.graph,
            &self.candidates,
            &self.devices,
            &self.protected,
        )
    }

    /// The planned devices with minima raised to the desired sizes, or
    /// None when no request has a desired size
    fn ambitious_devices(&self) -> Option<PlannedDevices> {
        if !self
            .devices
            .partitions
            .iter()
            .any(|p| p.desired_size.is_some())
        {
            return None;
        }

        Some(PlannedDevices {
            partitions: self
                .devices
                .partitions
                .iter()
                .map(PlannedPartition::with_desired_min)
                .collect(),
            vgs: self.devices.vgs.clone(),
        })
    }
}
