// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Command prefix used to launch the inference worker. The model path
    /// and input path are appended as the final two arguments.
    pub worker_cmd: Vec<String>,
    /// Wall-clock bound on a single worker run. On expiry the process is
    /// killed and the prediction fails without spending a credit.
    pub worker_timeout: Duration,
    pub max_model_bytes: usize,
    pub max_input_bytes: usize,
    pub max_output_bytes: usize,
    /// Credits burned per successful prediction.
    pub spend_per_prediction: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker_cmd: vec!["python3".to_string(), "worker/predict.py".to_string()],
            worker_timeout: Duration::from_secs(30),
            max_model_bytes: 256 * 1024 * 1024,
            max_input_bytes: 1024 * 1024,
            max_output_bytes: 4 * 1024 * 1024,
            spend_per_prediction: 1,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let worker_cmd = match std::env::var("VERIML_WORKER_CMD") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split_whitespace()
                .map(|part| part.to_string())
                .collect(),
            _ => defaults.worker_cmd,
        };
        Self {
            worker_cmd,
            worker_timeout: Duration::from_secs(read_env_u64(
                "VERIML_WORKER_TIMEOUT_SECS",
                defaults.worker_timeout.as_secs(),
            )),
            max_model_bytes: read_env_usize("VERIML_MAX_MODEL_BYTES", defaults.max_model_bytes),
            max_input_bytes: read_env_usize("VERIML_MAX_INPUT_BYTES", defaults.max_input_bytes),
            max_output_bytes: read_env_usize("VERIML_MAX_OUTPUT_BYTES", defaults.max_output_bytes),
            spend_per_prediction: read_env_u64(
                "VERIML_SPEND_PER_PREDICTION",
                defaults.spend_per_prediction,
            ),
        }
    }
}

fn read_env_u64(key: &str, default_value: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(key: &str, default_value: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(default_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.spend_per_prediction, 1);
        assert!(cfg.worker_timeout >= Duration::from_secs(1));
        assert!(!cfg.worker_cmd.is_empty());
    }
}
