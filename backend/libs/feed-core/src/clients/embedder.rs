//! Embedder CLI wrapper.
//!
//! The embedder is an external tool: it reads a JSON array of
//! `{uri, text, image_urls, alt_text}` entries and writes
//! `{uri, vector}` with 512-dim vectors. This wrapper owns the temp-file
//! exchange and rejects zero vectors.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

use crate::clients::vector::VECTOR_DIM;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct EmbedInput {
    pub uri: String,
    pub text: String,
    pub image_urls: Vec<String>,
    pub alt_text: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedOutput {
    pub uri: String,
    pub vector: Vec<f32>,
}

#[derive(Clone)]
pub struct EmbedderClient {
    bin: String,
    model_path: String,
    batch_size: usize,
}

impl EmbedderClient {
    pub fn new(bin: String, model_path: String, batch_size: usize) -> Self {
        Self {
            bin,
            model_path,
            batch_size,
        }
    }

    /// Embed a batch of inputs. Outputs with zero or wrongly-sized vectors
    /// are dropped with a warning.
    pub async fn embed(&self, inputs: &[EmbedInput]) -> Result<Vec<EmbedOutput>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let workdir = tempfile::tempdir()
            .map_err(|e| CoreError::External(format!("embedder tempdir: {e}")))?;
        let input_path = workdir.path().join("input.json");
        let output_path = workdir.path().join("output.json");

        let payload = serde_json::to_vec(inputs)
            .map_err(|e| CoreError::InvalidData(format!("embed input serialization: {e}")))?;
        tokio::fs::write(&input_path, payload)
            .await
            .map_err(|e| CoreError::External(format!("embedder input write: {e}")))?;

        let status = Command::new(&self.bin)
            .arg(&input_path)
            .arg(&output_path)
            .arg("--model-path")
            .arg(&self.model_path)
            .arg("--batch-size")
            .arg(self.batch_size.to_string())
            .status()
            .await
            .map_err(|e| CoreError::External(format!("embedder spawn: {e}")))?;
        if !status.success() {
            return Err(CoreError::External(format!(
                "embedder exited with {status}"
            )));
        }

        let raw = tokio::fs::read(&output_path)
            .await
            .map_err(|e| CoreError::External(format!("embedder output read: {e}")))?;
        let outputs: Vec<EmbedOutput> = serde_json::from_slice(&raw)
            .map_err(|e| CoreError::External(format!("embedder output parse: {e}")))?;

        Ok(outputs
            .into_iter()
            .filter(|o| {
                if o.vector.len() != VECTOR_DIM {
                    warn!(uri = %o.uri, len = o.vector.len(), "Dropping wrong-dimension embedding");
                    return false;
                }
                if o.vector.iter().all(|v| *v == 0.0) {
                    warn!(uri = %o.uri, "Dropping zero-vector embedding");
                    return false;
                }
                true
            })
            .collect())
    }
}
