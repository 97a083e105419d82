//! Builds a menu catalog from configuration

use std::time::Duration;

use tracing::{debug, info};

use crate::config::{IvrConfig, MenuConfig};
use crate::core::{ActionKind, CallbackHandle, CallbackRegistry, Menu, MenuCatalog};
use crate::protocols::DigitAlphabet;
use crate::{Error, Result};

/// Creates every configured menu and binds its entries.
///
/// Entry actions are either `menu-*` action names or names registered in
/// `callbacks` beforehand. Anything else fails with `UnknownAction`, and a
/// sub-menu reference to a menu that does not exist fails the whole load.
pub fn build_catalog(config: &IvrConfig, callbacks: CallbackRegistry) -> Result<MenuCatalog> {
    let alphabet = config.alphabet()?;
    let catalog = MenuCatalog::with_callbacks(callbacks);

    for menu_config in &config.menus {
        let menu = build_menu(config, menu_config, &alphabet, catalog.callbacks())?;
        catalog.insert(menu);
    }
    catalog.validate()?;

    info!(
        "Loaded {} menus ({} callbacks available)",
        catalog.len(),
        catalog.callbacks().len()
    );
    Ok(catalog)
}

fn build_menu(
    config: &IvrConfig,
    menu_config: &MenuConfig,
    alphabet: &DigitAlphabet,
    callbacks: &CallbackRegistry,
) -> Result<Menu> {
    let timeout_ms = menu_config.timeout_ms.unwrap_or(config.dtmf.default_timeout_ms);
    let mut builder = Menu::builder(menu_config.name.clone())
        .timeout(Duration::from_millis(timeout_ms))
        .max_failures(menu_config.max_failures.unwrap_or(config.dtmf.default_max_failures))
        .terminator(menu_config.terminator.or(config.dtmf.default_terminator))
        .alphabet(alphabet.clone());

    if let Some(uri) = &menu_config.greeting_sound {
        builder = builder.greeting(uri.clone());
    }
    if let Some(uri) = &menu_config.short_greeting_sound {
        builder = builder.short_greeting(uri.clone());
    }
    if let Some(uri) = &menu_config.exit_sound {
        builder = builder.exit_sound(uri.clone());
    }
    if let Some(uri) = &menu_config.invalid_sound {
        builder = builder.invalid_sound(uri.clone());
    }
    if let (Some(engine), Some(voice)) = (&menu_config.tts_engine, &menu_config.tts_voice) {
        builder = builder.tts(engine.clone(), voice.clone());
    }

    let menu = builder.build()?;
    for entry in &menu_config.entries {
        match entry.action.parse::<ActionKind>() {
            Ok(kind) => menu.bind_action(kind, entry.param.clone(), &entry.digits)?,
            Err(_) if callbacks.contains(&entry.action) => {
                menu.bind_callback(CallbackHandle::new(entry.action.clone()), entry.param.clone(), &entry.digits)?
            }
            Err(_) => {
                return Err(Error::unknown_action(format!(
                    "{} (menu {}, digits {})",
                    entry.action, menu_config.name, entry.digits
                )))
            }
        }
    }

    debug!("Built menu {} with {} bindings", menu.name(), menu.registry().len());
    Ok(menu)
}
