//! Tunables of the whole pipeline, loadable from a JSON file. Every field is optional in the
//! file and falls back to its default.
use crate::fit::FitterConfig;
use crate::pnp::PnpConfig;
use crate::stereo::SgbmParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fitter: FitterConfig,
    pub sgbm: SgbmParams,
    pub pnp: PnpConfig,
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        log::debug!("loaded pipeline config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Loads `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_json_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnp::PnpMethod;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"fitter": {{"margin_px": 8}}, "pnp": {{"method": "ransac", "ransac": {{"random_seed": 5}}}}}}"#
        )?;
        let config = PipelineConfig::from_json_file(file.path())?;
        assert_eq!(config.fitter.margin_px, 8);
        assert_eq!(config.fitter.canny_high, FitterConfig::default().canny_high);
        assert_eq!(config.pnp.method, PnpMethod::Ransac);
        assert_eq!(config.pnp.ransac.random_seed, Some(5));
        assert_eq!(config.pnp.ransac.max_iterations, 1000);
        assert_eq!(config.sgbm, SgbmParams::default());
        Ok(())
    }

    #[test]
    fn test_defaults_without_file() -> anyhow::Result<()> {
        assert_eq!(PipelineConfig::load_or_default(None)?, PipelineConfig::default());
        Ok(())
    }
}
