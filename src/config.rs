//! Harness configuration.
//!
//! Settings come from an optional TOML file:
//!
//! ```toml
//! threads = 4
//! fp_tolerance = 1e-6
//! extensions = ["cs"]
//! arch = "arm"
//! modes = ["thumb"]
//! ```
//!
//! Every key is optional. Command line flags override whatever the file sets.

use crate::compare::DEFAULT_FP_TOLERANCE;
use crate::directive::{Arch, ArchDirective, Mode};
use anyhow::{Context as _, Result, anyhow, bail};
use serde_derive::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HarnessConfig {
    /// Worker threads; `None` lets the pool pick.
    pub threads: Option<usize>,
    /// Tolerance for floating point operand comparisons.
    pub fp_tolerance: f64,
    /// File extensions picked up when scanning directories.
    pub extensions: Vec<String>,
    /// Only run cases for this architecture.
    pub arch: Option<String>,
    /// Only run cases whose directive names all of these modes.
    pub modes: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads: None,
            fp_tolerance: DEFAULT_FP_TOLERANCE,
            extensions: vec!["cs".to_string()],
            arch: None,
            modes: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse harness configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            bail!("`threads` must be at least 1");
        }
        if !(self.fp_tolerance >= 0.0 && self.fp_tolerance.is_finite()) {
            bail!("`fp_tolerance` must be a finite, non-negative number");
        }
        if self.extensions.is_empty() {
            bail!("`extensions` must name at least one file extension");
        }
        self.selection()?;
        Ok(())
    }

    /// Resolve the architecture and mode filters.
    pub fn selection(&self) -> Result<Selection> {
        let arch = match &self.arch {
            Some(name) => Some(name.parse::<Arch>().map_err(|e| anyhow!(e))?),
            None => None,
        };
        let modes = self
            .modes
            .iter()
            .map(|m| m.parse::<Mode>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Selection { arch, modes })
    }
}

/// Which test cases to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub arch: Option<Arch>,
    pub modes: Vec<Mode>,
}

impl Selection {
    /// Does a case under `directive` run?
    pub fn selects(&self, directive: &ArchDirective) -> bool {
        self.arch.is_none_or(|arch| arch == directive.arch)
            && self.modes.iter().all(|&m| directive.modes.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse_arch_directive;
    use crate::error::Location;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(HarnessConfig::from_toml("").unwrap(), HarnessConfig::default());
    }

    #[test]
    fn full_file() {
        let c = HarnessConfig::from_toml(
            r#"
            threads = 2
            fp_tolerance = 0.001
            extensions = ["cs", "txt"]
            arch = "CS_ARCH_ARM"
            modes = ["thumb", "CS_MODE_V8"]
            "#,
        )
        .unwrap();
        assert_eq!(c.threads, Some(2));
        assert_eq!(c.extensions.len(), 2);
        let sel = c.selection().unwrap();
        assert_eq!(sel.arch, Some(Arch::Arm));
        assert_eq!(sel.modes, vec![Mode::Thumb, Mode::V8]);
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(HarnessConfig::from_toml("thread = 2").is_err());
        assert!(HarnessConfig::from_toml("threads = 0").is_err());
        assert!(HarnessConfig::from_toml("fp_tolerance = -1.0").is_err());
        assert!(HarnessConfig::from_toml("arch = \"vax\"").is_err());
        assert!(HarnessConfig::from_toml("modes = [\"warp\"]").is_err());
        assert!(HarnessConfig::from_toml("extensions = []").is_err());
    }

    #[test]
    fn selection_filters_directives() {
        let thumb_v8 =
            parse_arch_directive("CS_ARCH_ARM, CS_MODE_THUMB | CS_MODE_V8", Location::line(1))
                .unwrap();
        let x86 = parse_arch_directive("CS_ARCH_X86, CS_MODE_64", Location::line(2)).unwrap();

        assert!(Selection::default().selects(&thumb_v8));
        let arm = Selection {
            arch: Some(Arch::Arm),
            modes: vec![Mode::Thumb],
        };
        assert!(arm.selects(&thumb_v8));
        assert!(!arm.selects(&x86));
        let mclass = Selection {
            arch: None,
            modes: vec![Mode::MClass],
        };
        assert!(!mclass.selects(&thumb_v8));
    }
}
