//! Silo document files.

use anyhow::{Context, Result};
use sensor_silo_core::{Silo, Streams};
use std::path::{Path, PathBuf};
use tracing::info;

/// Suffix every silo document carries.
pub const SUFFIX: &str = ".toml";

/// A silo document on disk.
#[derive(Debug, Clone)]
pub struct SiloFile {
    path: PathBuf,
}

/// Keeps alphanumerics plus `.` and `_`; empty names fall back to `default`.
pub fn sanitize(name: &str, default: &str) -> String {
    let stem = name.trim().strip_suffix(SUFFIX).unwrap_or(name.trim());
    let mut clean: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
        .collect();
    if clean.is_empty() {
        clean = default.to_string();
    }
    format!("{}{}", clean, SUFFIX)
}

impl SiloFile {
    pub fn new<P: AsRef<Path>>(dir: P, name: &str, default: &str) -> Self {
        Self {
            path: dir.as_ref().join(sanitize(name, default)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document, or a fresh silo when the file does not exist yet.
    pub fn load(&self, streams: &Streams) -> Result<Silo> {
        if !self.path.exists() {
            info!("{} not found, starting a new silo", self.path.display());
            return Ok(Silo::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Silo::unpack(&content, streams)
            .with_context(|| format!("Failed to load {}", self.path.display()))
    }

    pub fn save(&self, silo: &Silo) -> Result<()> {
        let content = silo.pack().context("Failed to serialize silo")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Saved {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("deployment", "x"), "deployment.toml");
        assert_eq!(sanitize("deployment.toml", "x"), "deployment.toml");
        assert_eq!(sanitize("../etc/pass wd", "x"), "..etcpasswd.toml");
        assert_eq!(sanitize(" tank_2.v1 ", "x"), "tank_2.v1.toml");
        assert_eq!(sanitize("", "deployment"), "deployment.toml");
        assert_eq!(sanitize("/// ", "deployment"), "deployment.toml");
    }

    #[test]
    fn test_missing_file_is_new_silo() {
        let file = SiloFile::new(std::env::temp_dir(), "silo_missing_file_test", "x");
        let silo = file.load(&Streams::new()).unwrap();
        assert!(silo.sensors().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let name = format!("silo_store_{}", std::process::id());
        let file = SiloFile::new(std::env::temp_dir(), &name, "x");
        let mut silo = Silo::new();
        silo.deployment_mut().set_key_name("bench pi");
        file.save(&silo).unwrap();

        let loaded = file.load(&Streams::new()).unwrap();
        std::fs::remove_file(file.path()).unwrap();
        assert_eq!(loaded.deployment().key_name(), "bench_pi");
    }
}
