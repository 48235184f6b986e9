//! Suite configuration
//!
//! Everything needed to go from a run list to fitted parameters, persisted as
//! JSON:
//!
//! ```json
//! {
//!   "runs": "100:102",
//!   "groups": [{ "forward": "1:2", "backward": "3:4", "alpha": 1.02 }],
//!   "offset": 20,
//!   "background": { "first": 5, "last": 80 },
//!   "model": "blml",
//!   "fit": { "first_bin": 0, "last_bin": 2000 },
//!   "optimizer": { "max_iterations": 200 }
//! }
//! ```

use crate::asymmetry::engine::{AsymmetryEngine, BackgroundWindow};
use crate::asymmetry::grouping::DetectorGroup;
use crate::error::{MuFitError, Result};
use crate::fit::minimizer::LmMinimizer;
use crate::fit::session::FitOptions;
use crate::lm::LmConfig;
use crate::models::Registry;
use crate::parameters::dashboard::{parse_model, Dashboard};
use crate::suite::parse_run_list;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Configuration of a suite fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Run list, see [`parse_run_list`]
    pub runs: String,

    /// Detector groups, fitted together when more than one
    pub groups: Vec<DetectorGroup>,

    /// First good bin after each counter's prompt
    #[serde(default)]
    pub offset: usize,

    /// Pre-prompt background window
    #[serde(default)]
    pub background: Option<BackgroundWindow>,

    /// Model string, see [`parse_model`]
    pub model: String,

    #[serde(default)]
    pub fit: FitOptions,

    #[serde(default)]
    pub optimizer: LmConfig,
}

impl SuiteConfig {
    pub fn new(runs: &str, groups: Vec<DetectorGroup>, model: &str) -> Self {
        Self {
            runs: runs.to_string(),
            groups,
            offset: 0,
            background: None,
            model: model.to_string(),
            fit: FitOptions::default(),
            optimizer: LmConfig::default(),
        }
    }

    /// Check that the run list and model can be read and agree with the
    /// groups.
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        parse_run_list(&self.runs)?;
        let spec = parse_model(&self.model, registry)?;
        if usize::from(spec.groups) != self.groups.len() {
            return Err(MuFitError::Configuration(format!(
                "model '{}' fits {} group(s), {} configured",
                self.model,
                spec.groups,
                self.groups.len()
            )));
        }
        if let Some(window) = self.background {
            BackgroundWindow::new(window.first, window.last)?;
        }
        Ok(())
    }

    pub fn engine(&self) -> AsymmetryEngine {
        AsymmetryEngine {
            offset: self.offset,
            background: self.background,
        }
    }

    /// Fresh dashboard for the model, after validation.
    pub fn dashboard(&self, registry: &Registry) -> Result<Dashboard> {
        self.validate(registry)?;
        Dashboard::from_model(&self.model, registry)
    }

    pub fn minimizer(&self) -> LmMinimizer {
        LmMinimizer::new(self.optimizer.clone())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }
}
