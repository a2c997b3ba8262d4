//! Configuration surface: attribute-style updates and configuration files.
//!
//! Hosts describe a run declaratively. Each change arrives as a
//! [`ConfigUpdate`], either built directly or parsed from an attribute
//! name/value pair with [`ConfigUpdate::from_attribute`]. Applying an update is
//! a pure operation on [`RunConfiguration`] that reports through
//! [`UpdateEffect`] whether the host should start a run (the `autorun` rule).
//!
//! # Example
//!
//! ```
//! use sandterm::config::ConfigUpdate;
//! use sandterm::model::RunConfiguration;
//!
//! # fn example() -> Result<(), sandterm::error::SandtermError> {
//! let mut config = RunConfiguration::default();
//! config.apply(ConfigUpdate::from_attribute("args", "a b  c")?, false);
//! assert_eq!(config.args, vec!["a", "b", "c"]);
//!
//! let effect = config.apply(ConfigUpdate::from_attribute("autorun", "")?, false);
//! assert!(effect.trigger_run);
//! # Ok(())
//! # }
//! ```

use crate::error::{SandtermError, SandtermResult};
use crate::model::{FsSnapshot, ProgramRef, RunConfiguration};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Attribute names a host may observe and forward.
pub const OBSERVED_ATTRIBUTES: &[&str] = &[
    "src",
    "name",
    "args",
    "disable-echo",
    "disable-tty",
    "controls",
    "autorun",
];

/// Declarative attribute understood by the configuration surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigAttribute {
    Src,
    Name,
    Args,
    DisableEcho,
    DisableTty,
    Controls,
    Autorun,
}

impl ConfigAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Src => "src",
            Self::Name => "name",
            Self::Args => "args",
            Self::DisableEcho => "disable-echo",
            Self::DisableTty => "disable-tty",
            Self::Controls => "controls",
            Self::Autorun => "autorun",
        }
    }

    /// Presence-triggered attributes: any assignment sets them to `true`.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            Self::DisableEcho | Self::DisableTty | Self::Controls | Self::Autorun
        )
    }
}

impl fmt::Display for ConfigAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigAttribute {
    type Err = SandtermError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "src" => Ok(Self::Src),
            "name" => Ok(Self::Name),
            "args" => Ok(Self::Args),
            "disable-echo" => Ok(Self::DisableEcho),
            "disable-tty" => Ok(Self::DisableTty),
            "controls" => Ok(Self::Controls),
            "autorun" => Ok(Self::Autorun),
            other => Err(SandtermError::config(
                format!("unknown attribute '{other}'"),
                serde_json::json!({
                    "received": other,
                    "supported": OBSERVED_ATTRIBUTES,
                }),
            )),
        }
    }
}

/// A single field-level change to a [`RunConfiguration`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigUpdate {
    Src(ProgramRef),
    Name(String),
    /// Already-split argument list.
    Args(Vec<String>),
    Env(BTreeMap<String, String>),
    Fs(FsSnapshot),
    DisableEcho,
    DisableTty,
    Controls,
    Autorun,
}

impl ConfigUpdate {
    /// Build an update from an attribute name and its raw string value.
    ///
    /// # Errors
    /// Returns `E_CONFIG` for unknown attribute names.
    pub fn from_attribute(name: &str, value: &str) -> SandtermResult<Self> {
        let attribute: ConfigAttribute = name.parse()?;
        Ok(match attribute {
            ConfigAttribute::Src => Self::Src(ProgramRef::new(value)),
            ConfigAttribute::Name => Self::Name(value.to_string()),
            ConfigAttribute::Args => Self::Args(parse_args(value)),
            ConfigAttribute::DisableEcho => Self::DisableEcho,
            ConfigAttribute::DisableTty => Self::DisableTty,
            ConfigAttribute::Controls => Self::Controls,
            ConfigAttribute::Autorun => Self::Autorun,
        })
    }
}

/// Split an argument string on whitespace, dropping empty tokens.
pub fn parse_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Side effect requested by applying an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateEffect {
    /// The host should invoke `run()` once.
    pub trigger_run: bool,
}

impl RunConfiguration {
    /// Apply `update`, reporting whether it should start a run.
    ///
    /// Only an `autorun` update on a controller that has never run triggers a
    /// run; every other update is a plain field assignment.
    pub fn apply(&mut self, update: ConfigUpdate, has_run: bool) -> UpdateEffect {
        let mut effect = UpdateEffect::default();
        match update {
            ConfigUpdate::Src(src) => self.src = src,
            ConfigUpdate::Name(name) => self.name = name,
            ConfigUpdate::Args(args) => self.args = args,
            ConfigUpdate::Env(env) => self.env = env,
            ConfigUpdate::Fs(fs) => self.fs = fs,
            ConfigUpdate::DisableEcho => self.disable_echo = true,
            ConfigUpdate::DisableTty => self.disable_tty = true,
            ConfigUpdate::Controls => self.controls = true,
            ConfigUpdate::Autorun => {
                effect.trigger_run = !has_run;
                self.autorun = true;
            }
        }
        effect
    }
}

/// Load a configuration from a JSON file, or YAML for `.yaml`/`.yml` paths.
///
/// # Errors
/// - `E_IO`: the file cannot be read
/// - `E_CONFIG`: the contents do not parse
pub fn load_config_file(path: &Path) -> SandtermResult<RunConfiguration> {
    let data = fs::read_to_string(path)
        .map_err(|err| SandtermError::io("failed to read config file", err))?;
    let display = path.display().to_string();
    if display.ends_with(".yaml") || display.ends_with(".yml") {
        serde_yml::from_str(&data).map_err(|err| {
            SandtermError::config(
                "failed to parse yaml config",
                serde_json::json!({ "path": display, "source": err.to_string() }),
            )
        })
    } else {
        serde_json::from_str(&data).map_err(|err| {
            SandtermError::config(
                "failed to parse json config",
                serde_json::json!({ "path": display, "source": err.to_string() }),
            )
        })
    }
}
