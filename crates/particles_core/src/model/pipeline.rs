//! Pipeline parameters needed to unbin legacy particle coordinates.

use super::coordinate::BinningFactor;
use serde::{Deserialize, Serialize};

/// How virions were picked for a tomogram pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirionDetectionMethod {
    None,
    Auto,
    Manual,
    PypTrain,
    PypEval,
}

/// Per-owner parameters supplied by the pipeline configuration.
///
/// Fields are optional because older pipeline runs may not record them;
/// the migrator reports which one is missing when it is actually needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub tomogram_binning: Option<BinningFactor>,
    pub virion_detection_method: VirionDetectionMethod,
    pub virion_binning: Option<BinningFactor>,
}

impl PipelineParams {
    pub fn new(
        tomogram_binning: BinningFactor,
        virion_detection_method: VirionDetectionMethod,
        virion_binning: BinningFactor,
    ) -> Self {
        Self {
            tomogram_binning: Some(tomogram_binning),
            virion_detection_method,
            virion_binning: Some(virion_binning),
        }
    }
}
