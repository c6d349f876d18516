//! Keyword extractor CLI wrapper.
//!
//! Compares a liked-post corpus against a random background corpus and
//! emits `keyword\tscore` lines on stdout, lowercased and trimmed.

use tokio::process::Command;
use tracing::warn;

use crate::error::{CoreError, Result};

#[derive(Clone)]
pub struct KeywordExtractorClient {
    bin: String,
}

impl KeywordExtractorClient {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }

    pub async fn extract(
        &self,
        liked_corpus: &[String],
        background_corpus: &[String],
    ) -> Result<Vec<(String, f64)>> {
        if liked_corpus.is_empty() {
            return Ok(Vec::new());
        }

        let workdir = tempfile::tempdir()
            .map_err(|e| CoreError::External(format!("extractor tempdir: {e}")))?;
        let liked_path = workdir.path().join("liked.txt");
        let background_path = workdir.path().join("background.txt");

        tokio::fs::write(&liked_path, corpus_file(liked_corpus))
            .await
            .map_err(|e| CoreError::External(format!("extractor corpus write: {e}")))?;
        tokio::fs::write(&background_path, corpus_file(background_corpus))
            .await
            .map_err(|e| CoreError::External(format!("extractor corpus write: {e}")))?;

        let output = Command::new(&self.bin)
            .arg(&liked_path)
            .arg(&background_path)
            .output()
            .await
            .map_err(|e| CoreError::External(format!("extractor spawn: {e}")))?;
        if !output.status.success() {
            return Err(CoreError::External(format!(
                "extractor exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_extractor_output(&stdout))
    }
}

/// One document per line; embedded newlines are flattened so line counts
/// match document counts.
fn corpus_file(texts: &[String]) -> String {
    texts
        .iter()
        .map(|t| t.replace(['\n', '\r'], " "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_extractor_output(stdout: &str) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((keyword, score)) = line.split_once('\t') else {
            warn!(line, "Skipping malformed extractor line");
            continue;
        };
        match score.trim().parse::<f64>() {
            Ok(score) if score.is_finite() => {
                out.push((keyword.trim().to_lowercase(), score));
            }
            _ => warn!(line, "Skipping extractor line with bad score"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tsv_lines_and_skips_garbage() {
        let parsed = parse_extractor_output("Rust\t0.8\n\nbadline\nnan\tNaN\nsynth\t-0.3\n");
        assert_eq!(
            parsed,
            vec![("rust".to_string(), 0.8), ("synth".to_string(), -0.3)]
        );
    }

    #[test]
    fn corpus_file_flattens_newlines() {
        let corpus = vec!["a\nb".to_string(), "c".to_string()];
        assert_eq!(corpus_file(&corpus), "a b\nc");
    }
}
