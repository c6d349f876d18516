//! Clusterer CLI wrapper.
//!
//! Density-clusters a user's liked-post vectors into weighted interest
//! centroids. Parameter choice is the tool's concern; only the output
//! contract is enforced here.

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInput {
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOutput {
    pub cluster_id: i32,
    pub centroid: Vec<f32>,
    pub weight: f64,
    pub post_count: i32,
}

#[derive(Clone)]
pub struct ClustererClient {
    bin: String,
}

impl ClustererClient {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }

    pub async fn cluster(&self, inputs: &[ClusterInput]) -> Result<Vec<ClusterOutput>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let workdir = tempfile::tempdir()
            .map_err(|e| CoreError::External(format!("clusterer tempdir: {e}")))?;
        let input_path = workdir.path().join("input.json");
        let output_path = workdir.path().join("output.json");

        let payload = serde_json::to_vec(inputs)
            .map_err(|e| CoreError::InvalidData(format!("cluster input serialization: {e}")))?;
        tokio::fs::write(&input_path, payload)
            .await
            .map_err(|e| CoreError::External(format!("clusterer input write: {e}")))?;

        let status = Command::new(&self.bin)
            .arg(&input_path)
            .arg(&output_path)
            .status()
            .await
            .map_err(|e| CoreError::External(format!("clusterer spawn: {e}")))?;
        if !status.success() {
            return Err(CoreError::External(format!(
                "clusterer exited with {status}"
            )));
        }

        let raw = tokio::fs::read(&output_path)
            .await
            .map_err(|e| CoreError::External(format!("clusterer output read: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| CoreError::External(format!("clusterer output parse: {e}")))
    }
}
