//! Configuration management for the Redfire IVR engine

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::core::{ActionKind, DEFAULT_MAX_MENU_DEPTH};
use crate::core::menu::{DEFAULT_MAX_FAILURES, DEFAULT_TIMEOUT_MS};
use crate::protocols::DigitAlphabet;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvrConfig {
    pub general: GeneralConfig,
    pub dtmf: DtmfConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub menus: Vec<MenuConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub node_id: String,
    pub max_calls: u32,
    #[serde(default = "default_max_menu_depth")]
    pub max_menu_depth: usize,
    /// Menu every call starts in unless the caller names another.
    pub main_menu: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmfConfig {
    /// Symbols accepted on top of `0-9 * #`, e.g. `"ABCD"`.
    #[serde(default)]
    pub extra_digits: String,
    #[serde(default)]
    pub default_terminator: Option<char>,
    pub default_timeout_ms: u64,
    pub default_max_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuConfig {
    pub name: String,
    #[serde(default)]
    pub greeting_sound: Option<String>,
    #[serde(default)]
    pub short_greeting_sound: Option<String>,
    #[serde(default)]
    pub exit_sound: Option<String>,
    #[serde(default)]
    pub invalid_sound: Option<String>,
    #[serde(default)]
    pub tts_engine: Option<String>,
    #[serde(default)]
    pub tts_voice: Option<String>,
    /// Falls back to `dtmf.default_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub terminator: Option<char>,
    #[serde(default)]
    pub entries: Vec<MenuEntryConfig>,
}

/// One digit binding. `action` is either a `menu-*` action name or the
/// name of a callback registered with the engine before loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuEntryConfig {
    pub action: String,
    pub digits: String,
    #[serde(default)]
    pub param: String,
}

fn default_max_menu_depth() -> usize {
    DEFAULT_MAX_MENU_DEPTH
}

impl MenuEntryConfig {
    fn new(action: ActionKind, digits: &str, param: &str) -> Self {
        Self {
            action: action.as_str().to_string(),
            digits: digits.to_string(),
            param: param.to_string(),
        }
    }
}

impl IvrConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: IvrConfig = toml::from_str(&contents)
            .map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    /// Defaults overlaid with `REDFIRE_IVR__<SECTION>__<KEY>` variables.
    pub fn load_from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default_config())?)
            .add_source(
                config::Environment::with_prefix("REDFIRE_IVR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let ivr_config = settings.try_deserialize()?;
        Ok(ivr_config)
    }

    pub fn alphabet(&self) -> Result<DigitAlphabet> {
        DigitAlphabet::with_extra(&self.dtmf.extra_digits)
    }

    pub fn menu(&self, name: &str) -> Option<&MenuConfig> {
        self.menus.iter().find(|menu| menu.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.max_calls == 0 {
            return Err(Error::parse("max_calls must be greater than zero"));
        }
        if self.general.max_menu_depth == 0 {
            return Err(Error::parse("max_menu_depth must be greater than zero"));
        }
        if self.dtmf.default_timeout_ms == 0 || self.dtmf.default_max_failures == 0 {
            return Err(Error::parse("DTMF defaults must be greater than zero"));
        }

        let alphabet = self.alphabet()?;
        if let Some(terminator) = self.dtmf.default_terminator {
            if !alphabet.contains(terminator) {
                return Err(Error::parse(format!("Invalid default terminator {:?}", terminator)));
            }
        }

        if self.menus.is_empty() {
            return Err(Error::parse("No menus configured"));
        }

        let mut names = HashSet::new();
        for menu in &self.menus {
            if menu.name.trim().is_empty() {
                return Err(Error::parse("Menu without a name"));
            }
            if !names.insert(menu.name.as_str()) {
                return Err(Error::parse(format!("Duplicate menu {}", menu.name)));
            }
            if menu.timeout_ms == Some(0) {
                return Err(Error::parse(format!("Menu {} has a zero timeout", menu.name)));
            }
            if menu.max_failures == Some(0) {
                return Err(Error::parse(format!("Menu {} has max_failures = 0", menu.name)));
            }
            if let Some(terminator) = menu.terminator {
                if !alphabet.contains(terminator) {
                    return Err(Error::parse(format!(
                        "Menu {} terminator {:?} is not a DTMF digit",
                        menu.name, terminator
                    )));
                }
            }
            for entry in &menu.entries {
                if entry.action.trim().is_empty() {
                    return Err(Error::parse(format!(
                        "Menu {} entry {} has no action",
                        menu.name, entry.digits
                    )));
                }
                alphabet.validate(&entry.digits)?;
            }
        }

        if !names.contains(self.general.main_menu.as_str()) {
            return Err(Error::menu_not_found(self.general.main_menu.clone()));
        }

        for menu in &self.menus {
            for entry in &menu.entries {
                if entry.action.parse::<ActionKind>().ok() == Some(ActionKind::SubMenu)
                    && !names.contains(entry.param.trim())
                {
                    return Err(Error::menu_not_found(format!(
                        "{} (referenced from {})",
                        entry.param, menu.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            general: GeneralConfig {
                node_id: "redfire-ivr-1".to_string(),
                max_calls: 500,
                max_menu_depth: DEFAULT_MAX_MENU_DEPTH,
                main_menu: "main".to_string(),
            },
            dtmf: DtmfConfig {
                extra_digits: String::new(),
                default_terminator: None,
                default_timeout_ms: DEFAULT_TIMEOUT_MS,
                default_max_failures: DEFAULT_MAX_FAILURES,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
                format: LogFormat::Full,
            },
            menus: vec![
                MenuConfig {
                    name: "main".to_string(),
                    greeting_sound: Some("ivr/welcome.wav".to_string()),
                    short_greeting_sound: Some("ivr/main-options.wav".to_string()),
                    exit_sound: Some("ivr/goodbye.wav".to_string()),
                    invalid_sound: Some("ivr/invalid.wav".to_string()),
                    tts_engine: Some("flite".to_string()),
                    tts_voice: Some("kal".to_string()),
                    entries: vec![
                        MenuEntryConfig::new(ActionKind::SubMenu, "1", "sales"),
                        MenuEntryConfig::new(ActionKind::SubMenu, "2", "support"),
                        MenuEntryConfig::new(ActionKind::SayText, "3", "We are open nine to five"),
                        MenuEntryConfig::new(ActionKind::Transfer, "0", "1000 XML default"),
                        MenuEntryConfig::new(ActionKind::Terminate, "9", ""),
                    ],
                    ..Default::default()
                },
                MenuConfig {
                    name: "sales".to_string(),
                    greeting_sound: Some("ivr/sales.wav".to_string()),
                    exit_sound: Some("ivr/sales-bye.wav".to_string()),
                    invalid_sound: Some("ivr/invalid.wav".to_string()),
                    entries: vec![
                        MenuEntryConfig::new(ActionKind::Transfer, "1", "2001"),
                        MenuEntryConfig::new(ActionKind::PlaySound, "2", "ivr/pricing.wav"),
                        MenuEntryConfig::new(ActionKind::Back, "*", ""),
                        MenuEntryConfig::new(ActionKind::Terminate, "9", ""),
                    ],
                    ..Default::default()
                },
                MenuConfig {
                    name: "support".to_string(),
                    greeting_sound: Some("ivr/support.wav".to_string()),
                    invalid_sound: Some("ivr/invalid.wav".to_string()),
                    terminator: Some('#'),
                    entries: vec![
                        MenuEntryConfig::new(ActionKind::ExecApp, "1", "voicemail check default"),
                        MenuEntryConfig::new(ActionKind::Transfer, "2", "3000"),
                        MenuEntryConfig::new(ActionKind::PlaySound, "1234#", "ivr/account-found.wav"),
                        MenuEntryConfig::new(ActionKind::Back, "*", ""),
                        MenuEntryConfig::new(ActionKind::ToMain, "0", ""),
                    ],
                    ..Default::default()
                },
            ],
        }
    }
}
