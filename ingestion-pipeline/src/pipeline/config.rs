use std::path::PathBuf;

use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct ImportTuning {
    /// Documents with fewer trimmed characters than this count as "no usable text".
    pub min_text_chars: usize,
    pub extraction_concurrency: usize,
    pub reconcile_lease_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ImportTuning {
    fn default() -> Self {
        Self {
            min_text_chars: 50,
            extraction_concurrency: 4,
            reconcile_lease_secs: 600,
            temperature: 0.1,
            max_output_tokens: 8_192,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub tuning: ImportTuning,
    /// Root under which `tmp/batch-{id}` scratch directories are created.
    pub scratch_root: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            tuning: ImportTuning::default(),
            scratch_root: PathBuf::from("./data"),
        }
    }
}

impl ImportConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: ImportTuning {
                extraction_concurrency: config.extraction_concurrency.max(1),
                ..ImportTuning::default()
            },
            scratch_root: PathBuf::from(&config.data_dir),
        }
    }

    pub fn scratch_dir(&self, batch_id: &str) -> PathBuf {
        self.scratch_root.join("tmp").join(format!("batch-{batch_id}"))
    }
}
