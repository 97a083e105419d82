//! Menu definitions and the catalog that holds them

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use super::binding::{ActionKind, Binding, CallbackHandle, CallbackRegistry};
use super::registry::PatternRegistry;
use crate::protocols::DigitAlphabet;
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// A named menu: prompts, timing, and its own digit bindings.
///
/// Each menu owns a private [`PatternRegistry`], so the same digits can mean
/// different things in different menus.
pub struct Menu {
    name: String,
    greeting_sound: Option<String>,
    short_greeting_sound: Option<String>,
    exit_sound: Option<String>,
    invalid_sound: Option<String>,
    tts_engine: Option<String>,
    tts_voice: Option<String>,
    timeout: Duration,
    max_failures: u32,
    registry: PatternRegistry,
}

impl Menu {
    pub fn builder<S: Into<String>>(name: S) -> MenuBuilder {
        MenuBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn greeting_sound(&self) -> Option<&str> {
        self.greeting_sound.as_deref()
    }

    /// Prompt for repeat visits; falls back to the full greeting.
    pub fn short_greeting_sound(&self) -> Option<&str> {
        self.short_greeting_sound
            .as_deref()
            .or(self.greeting_sound.as_deref())
    }

    pub fn exit_sound(&self) -> Option<&str> {
        self.exit_sound.as_deref()
    }

    pub fn invalid_sound(&self) -> Option<&str> {
        self.invalid_sound.as_deref()
    }

    pub fn tts_engine(&self) -> Option<&str> {
        self.tts_engine.as_deref()
    }

    pub fn tts_voice(&self) -> Option<&str> {
        self.tts_voice.as_deref()
    }

    /// Inter-digit timeout for this menu.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Binds `digits` to a static action.
    pub fn bind_action<S: Into<String>>(&self, kind: ActionKind, arg: S, digits: &str) -> Result<()> {
        let binding = Binding::action(kind, arg)?;
        self.registry.bind(digits, binding)?;
        debug!("Menu {} bound {} to {}", self.name, digits, kind);
        Ok(())
    }

    /// Binds `digits` to a callback resolved at match time.
    pub fn bind_callback<S: Into<String>>(&self, handle: CallbackHandle, arg: S, digits: &str) -> Result<()> {
        debug!("Menu {} bound {} to callback {}", self.name, digits, handle);
        self.registry.bind(digits, Binding::callback(handle, arg))?;
        Ok(())
    }

    pub fn unbind(&self, digits: &str) -> Option<Arc<Binding>> {
        self.registry.unbind(digits)
    }

    /// Names of the sub-menus this menu refers to through static bindings.
    pub fn submenu_references(&self) -> Vec<String> {
        self.registry
            .patterns()
            .into_iter()
            .filter_map(|(_, binding)| match binding.as_ref() {
                Binding::Action {
                    kind: ActionKind::SubMenu,
                    arg,
                } => Some(arg.trim().to_string()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for Menu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Menu")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_failures", &self.max_failures)
            .field("bindings", &self.registry.len())
            .finish()
    }
}

/// Builder for [`Menu`].
#[derive(Debug, Clone)]
pub struct MenuBuilder {
    name: String,
    greeting_sound: Option<String>,
    short_greeting_sound: Option<String>,
    exit_sound: Option<String>,
    invalid_sound: Option<String>,
    tts_engine: Option<String>,
    tts_voice: Option<String>,
    timeout: Duration,
    max_failures: u32,
    terminator: Option<char>,
    alphabet: DigitAlphabet,
}

impl MenuBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            greeting_sound: None,
            short_greeting_sound: None,
            exit_sound: None,
            invalid_sound: None,
            tts_engine: None,
            tts_voice: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_failures: DEFAULT_MAX_FAILURES,
            terminator: None,
            alphabet: DigitAlphabet::standard(),
        }
    }

    pub fn greeting<S: Into<String>>(mut self, uri: S) -> Self {
        self.greeting_sound = Some(uri.into());
        self
    }

    pub fn short_greeting<S: Into<String>>(mut self, uri: S) -> Self {
        self.short_greeting_sound = Some(uri.into());
        self
    }

    pub fn exit_sound<S: Into<String>>(mut self, uri: S) -> Self {
        self.exit_sound = Some(uri.into());
        self
    }

    pub fn invalid_sound<S: Into<String>>(mut self, uri: S) -> Self {
        self.invalid_sound = Some(uri.into());
        self
    }

    pub fn tts<E: Into<String>, V: Into<String>>(mut self, engine: E, voice: V) -> Self {
        self.tts_engine = Some(engine.into());
        self.tts_voice = Some(voice.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn terminator(mut self, terminator: Option<char>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn alphabet(mut self, alphabet: DigitAlphabet) -> Self {
        self.alphabet = alphabet;
        self
    }

    pub fn build(self) -> Result<Menu> {
        if self.name.trim().is_empty() {
            return Err(Error::parse("menu name must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::parse(format!("menu {} has a zero timeout", self.name)));
        }
        if self.max_failures == 0 {
            return Err(Error::parse(format!("menu {} has max_failures = 0", self.name)));
        }

        let registry = PatternRegistry::with_alphabet(self.alphabet);
        registry.set_terminator(self.terminator)?;

        Ok(Menu {
            name: self.name,
            greeting_sound: self.greeting_sound,
            short_greeting_sound: self.short_greeting_sound,
            exit_sound: self.exit_sound,
            invalid_sound: self.invalid_sound,
            tts_engine: self.tts_engine,
            tts_voice: self.tts_voice,
            timeout: self.timeout,
            max_failures: self.max_failures,
            registry,
        })
    }
}

/// Process-wide set of menu definitions, looked up by name, together with
/// the callback table their callback bindings resolve through.
///
/// Built once at configuration time and shared by reference with every
/// call's executor.
#[derive(Debug, Default)]
pub struct MenuCatalog {
    menus: DashMap<String, Arc<Menu>>,
    callbacks: CallbackRegistry,
}

impl MenuCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callbacks(callbacks: CallbackRegistry) -> Self {
        Self {
            menus: DashMap::new(),
            callbacks,
        }
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Adds a menu, replacing any menu with the same name.
    pub fn insert(&self, menu: Menu) -> Arc<Menu> {
        let menu = Arc::new(menu);
        if self
            .menus
            .insert(menu.name().to_string(), Arc::clone(&menu))
            .is_some()
        {
            info!("Menu {} replaced", menu.name());
        }
        menu
    }

    pub fn get(&self, name: &str) -> Option<Arc<Menu>> {
        self.menus.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Menu>> {
        self.menus.remove(name).map(|(_, menu)| menu)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.menus.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.menus.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.menus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.menus.is_empty()
    }

    /// Releases every definition. Calls already running keep their own
    /// `Arc`s until they finish.
    pub fn clear(&self) {
        let count = self.menus.len();
        self.menus.clear();
        info!("Menu catalog cleared ({} menus released)", count);
    }

    /// Checks that every static sub-menu reference names a known menu.
    pub fn validate(&self) -> Result<()> {
        for entry in self.menus.iter() {
            for target in entry.value().submenu_references() {
                if !self.contains(&target) {
                    return Err(Error::menu_not_found(format!(
                        "{} (referenced from {})",
                        target,
                        entry.key()
                    )));
                }
            }
        }
        Ok(())
    }
}
