//! Driver configuration, generalized from the teacher's per-document-type
//! `ParsingConfig`/`ConfigManager` (`config.rs`) into per-compiler-pipeline
//! settings: timeouts, run limits, and the addon-tree/watermark toggles.

use std::collections::HashMap;
use std::fs;

use anyhow::Result;
use serde::{Deserialize, Serialize};

fn default_max_latex_runs() -> u32 {
    5
}

fn default_max_time_budget_secs() -> u64 {
    600
}

fn default_image_threshold_mpixels() -> f64 {
    25.0
}

fn default_true() -> bool {
    true
}

fn default_kpse_script() -> String {
    "kpse_search.lua".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Total wall-clock budget for one submission's compilation, across all
    /// toplevels and postprocess steps.
    #[serde(default = "default_max_time_budget_secs")]
    pub max_time_budget_secs: u64,
    /// Stability-test iteration cap (`MAX_LATEX_RUNS`).
    #[serde(default = "default_max_latex_runs")]
    pub max_latex_runs: u32,
    /// Whether to ask the resolver for an addon TeX tree on top of the base
    /// distribution.
    #[serde(default)]
    pub use_addon_tree: bool,
    /// Oversized-image threshold used by `parser::check_image_sizes`.
    #[serde(default = "default_image_threshold_mpixels")]
    pub image_size_threshold_mpixels: f64,
    /// Whether to run the watermark overlay step when ZZRM `stamp` is true.
    #[serde(default = "default_true")]
    pub watermark_enabled: bool,
    /// Path to the `kpse_search.lua` script invoked by `KpseLuaResolver`.
    #[serde(default = "default_kpse_script")]
    pub kpse_script_path: String,
    /// Hard cap on number of TeX files considered per submission.
    #[serde(default)]
    pub max_tex_files: Option<usize>,
    /// Hard cap on number of figure files appended during assembly.
    #[serde(default)]
    pub max_appending_files: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_time_budget_secs: default_max_time_budget_secs(),
            max_latex_runs: default_max_latex_runs(),
            use_addon_tree: false,
            image_size_threshold_mpixels: default_image_threshold_mpixels(),
            watermark_enabled: default_true(),
            kpse_script_path: default_kpse_script(),
            max_tex_files: None,
            max_appending_files: None,
        }
    }
}

impl DriverConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = if path.ends_with(".toml") {
            toml::from_str(&contents)?
        } else if path.ends_with(".json") {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };
        Ok(config)
    }

    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_default(),
            None => Self::default(),
        }
    }
}

/// Holds one `DriverConfig` per compiler pipeline (keyed by canonical
/// `compiler_string`, e.g. `"pdflatex"`) plus a fallback used for pipelines
/// with no specific override — mirrors the teacher's per-`DocumentType`
/// `ConfigManager`.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    configs: HashMap<String, DriverConfig>,
    default_config: DriverConfig,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self { configs: HashMap::new(), default_config: DriverConfig::default() }
    }

    pub fn with_default(default_config: DriverConfig) -> Self {
        Self { configs: HashMap::new(), default_config }
    }

    pub fn set_config(&mut self, pipeline: impl Into<String>, config: DriverConfig) {
        self.configs.insert(pipeline.into(), config);
    }

    pub fn get_config(&self, pipeline: &str) -> &DriverConfig {
        self.configs.get(pipeline).unwrap_or(&self.default_config)
    }

    pub fn load_config_from_file(&mut self, pipeline: impl Into<String>, path: &str) -> Result<()> {
        let config = DriverConfig::load_from_file(path)?;
        self.configs.insert(pipeline.into(), config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_budgets() {
        let config = DriverConfig::default();
        assert_eq!(config.max_latex_runs, 5);
        assert!(config.watermark_enabled);
    }

    #[test]
    fn config_manager_falls_back_to_default() {
        let manager = ConfigManager::new();
        let config = manager.get_config("pdflatex");
        assert_eq!(config.max_latex_runs, 5);
    }

    #[test]
    fn config_manager_honors_per_pipeline_override() {
        let mut manager = ConfigManager::new();
        manager.set_config("pdflatex", DriverConfig { max_latex_runs: 2, ..Default::default() });
        assert_eq!(manager.get_config("pdflatex").max_latex_runs, 2);
        assert_eq!(manager.get_config("etex+dvips_ps2pdf").max_latex_runs, 5);
    }

    #[test]
    fn load_with_fallback_survives_missing_file() {
        let config = DriverConfig::load_with_fallback(Some("/nonexistent/path.toml"));
        assert_eq!(config.max_latex_runs, 5);
    }
}
