//! Digit bindings and the actions they resolve to
//!
//! A [`Binding`] is what a pattern registry stores at a terminal node: either
//! a static action with its argument string, or a handle to a callback that
//! decides the action at match time. Callbacks are looked up by name in a
//! [`CallbackRegistry`] rather than stored as function pointers, so menu
//! definitions stay plain data and can be built from configuration.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Default dialplan used by transfer when the argument omits one.
pub const DEFAULT_DIALPLAN: &str = "XML";
/// Default context used by transfer when the argument omits one.
pub const DEFAULT_CONTEXT: &str = "default";

/// The kinds of action a binding (or a callback) can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "menu-exit")]
    Terminate,
    #[serde(rename = "menu-sub")]
    SubMenu,
    #[serde(rename = "menu-exec-app")]
    ExecApp,
    #[serde(rename = "menu-play-sound")]
    PlaySound,
    #[serde(rename = "menu-say-text")]
    SayText,
    #[serde(rename = "menu-back")]
    Back,
    #[serde(rename = "menu-top")]
    ToMain,
    #[serde(rename = "menu-transfer")]
    Transfer,
    #[serde(rename = "menu-noop")]
    Noop,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::Terminate,
        ActionKind::SubMenu,
        ActionKind::ExecApp,
        ActionKind::PlaySound,
        ActionKind::SayText,
        ActionKind::Back,
        ActionKind::ToMain,
        ActionKind::Transfer,
        ActionKind::Noop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Terminate => "menu-exit",
            ActionKind::SubMenu => "menu-sub",
            ActionKind::ExecApp => "menu-exec-app",
            ActionKind::PlaySound => "menu-play-sound",
            ActionKind::SayText => "menu-say-text",
            ActionKind::Back => "menu-back",
            ActionKind::ToMain => "menu-top",
            ActionKind::Transfer => "menu-transfer",
            ActionKind::Noop => "menu-noop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::unknown_action(s))
    }
}

/// A fully resolved action, ready for the executor to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Terminate,
    SubMenu(String),
    ExecApp { name: String, args: String },
    PlaySound(String),
    SayText(String),
    Back,
    ToMain,
    Transfer {
        extension: String,
        dialplan: String,
        context: String,
    },
    Noop,
}

impl MenuAction {
    /// Builds an action from its kind and raw argument string.
    ///
    /// `menu-exec-app` takes `"<app> [args]"`, `menu-transfer` takes
    /// `"<extension> [dialplan] [context]"`. Kinds that need an argument fail
    /// with a parse error when it is blank.
    pub fn from_kind(kind: ActionKind, arg: &str) -> Result<Self> {
        let arg = arg.trim();
        let required = |what: &str| -> Result<String> {
            if arg.is_empty() {
                Err(Error::parse(format!("{} requires {}", kind, what)))
            } else {
                Ok(arg.to_string())
            }
        };

        match kind {
            ActionKind::Terminate => Ok(MenuAction::Terminate),
            ActionKind::SubMenu => Ok(MenuAction::SubMenu(required("a menu name")?)),
            ActionKind::ExecApp => {
                let spec = required("an application")?;
                let (name, args) = match spec.split_once(char::is_whitespace) {
                    Some((name, args)) => (name.to_string(), args.trim().to_string()),
                    None => (spec.clone(), String::new()),
                };
                Ok(MenuAction::ExecApp { name, args })
            }
            ActionKind::PlaySound => Ok(MenuAction::PlaySound(required("a sound uri")?)),
            ActionKind::SayText => Ok(MenuAction::SayText(required("text")?)),
            ActionKind::Back => Ok(MenuAction::Back),
            ActionKind::ToMain => Ok(MenuAction::ToMain),
            ActionKind::Transfer => {
                let spec = required("an extension")?;
                let mut parts = spec.split_whitespace();
                let extension = parts.next().unwrap_or_default().to_string();
                let dialplan = parts.next().unwrap_or(DEFAULT_DIALPLAN).to_string();
                let context = parts.next().unwrap_or(DEFAULT_CONTEXT).to_string();
                Ok(MenuAction::Transfer {
                    extension,
                    dialplan,
                    context,
                })
            }
            ActionKind::Noop => Ok(MenuAction::Noop),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            MenuAction::Terminate => ActionKind::Terminate,
            MenuAction::SubMenu(_) => ActionKind::SubMenu,
            MenuAction::ExecApp { .. } => ActionKind::ExecApp,
            MenuAction::PlaySound(_) => ActionKind::PlaySound,
            MenuAction::SayText(_) => ActionKind::SayText,
            MenuAction::Back => ActionKind::Back,
            MenuAction::ToMain => ActionKind::ToMain,
            MenuAction::Transfer { .. } => ActionKind::Transfer,
            MenuAction::Noop => ActionKind::Noop,
        }
    }
}

/// Name under which a callback is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackHandle(String);

impl CallbackHandle {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a pattern registry stores for a digit sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Action { kind: ActionKind, arg: String },
    Callback { handle: CallbackHandle, arg: String },
}

impl Binding {
    /// Static action binding. The argument is checked up front so a bad
    /// menu definition fails at configuration time, not mid-call.
    pub fn action<S: Into<String>>(kind: ActionKind, arg: S) -> Result<Self> {
        let arg = arg.into();
        MenuAction::from_kind(kind, &arg)?;
        Ok(Binding::Action { kind, arg })
    }

    pub fn callback<S: Into<String>>(handle: CallbackHandle, arg: S) -> Self {
        Binding::Callback {
            handle,
            arg: arg.into(),
        }
    }

    pub fn arg(&self) -> &str {
        match self {
            Binding::Action { arg, .. } | Binding::Callback { arg, .. } => arg,
        }
    }
}

/// Information handed to a callback when its binding matches.
pub struct CallbackContext<'a> {
    pub call_id: &'a str,
    pub menu: &'a str,
    pub digits: &'a str,
    pub user_data: Option<&'a (dyn Any + Send + Sync)>,
}

/// Decides the action for a callback binding.
///
/// `buffer` starts out holding the binding's argument; whatever it holds when
/// the callback returns becomes the argument of the returned action.
pub trait MenuCallback: Send + Sync {
    fn resolve(&self, ctx: &CallbackContext<'_>, buffer: &mut String) -> Result<ActionKind>;
}

impl<F> MenuCallback for F
where
    F: Fn(&CallbackContext<'_>, &mut String) -> Result<ActionKind> + Send + Sync,
{
    fn resolve(&self, ctx: &CallbackContext<'_>, buffer: &mut String) -> Result<ActionKind> {
        self(ctx, buffer)
    }
}

/// Capability table mapping callback names to implementations.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: DashMap<String, Arc<dyn MenuCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under `name`, replacing any previous entry.
    pub fn register<S, C>(&self, name: S, callback: C) -> CallbackHandle
    where
        S: Into<String>,
        C: MenuCallback + 'static,
    {
        let name = name.into();
        if self
            .callbacks
            .insert(name.clone(), Arc::new(callback))
            .is_some()
        {
            debug!("Replaced menu callback {}", name);
        } else {
            info!("Registered menu callback {}", name);
        }
        CallbackHandle(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs the callback behind `handle` and turns its answer into an action.
    pub fn resolve(
        &self,
        handle: &CallbackHandle,
        ctx: &CallbackContext<'_>,
        arg: &str,
    ) -> Result<MenuAction> {
        // Clone the Arc so the shard lock is not held while user code runs.
        let callback = self
            .callbacks
            .get(handle.name())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::callback(handle.name(), "callback is not registered"))?;

        let mut buffer = arg.to_string();
        let kind = callback
            .resolve(ctx, &mut buffer)
            .map_err(|e| Error::callback(handle.name(), e.to_string()))?;
        MenuAction::from_kind(kind, &buffer).map_err(|e| Error::callback(handle.name(), e.to_string()))
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.callbacks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("CallbackRegistry").field("callbacks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> CallbackContext<'a> {
        CallbackContext {
            call_id: "call-1",
            menu: "main",
            digits: "5",
            user_data: None,
        }
    }

    #[test]
    fn test_action_kind_names() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!(matches!("menu-jump".parse::<ActionKind>(), Err(Error::UnknownAction(_))));
    }

    #[test]
    fn test_exec_app_argument_split() {
        let action = MenuAction::from_kind(ActionKind::ExecApp, "playback  ivr/welcome.wav").unwrap();
        assert_eq!(
            action,
            MenuAction::ExecApp {
                name: "playback".to_string(),
                args: "ivr/welcome.wav".to_string(),
            }
        );

        let bare = MenuAction::from_kind(ActionKind::ExecApp, "answer").unwrap();
        assert_eq!(
            bare,
            MenuAction::ExecApp {
                name: "answer".to_string(),
                args: String::new(),
            }
        );
    }

    #[test]
    fn test_transfer_defaults() {
        let action = MenuAction::from_kind(ActionKind::Transfer, "1000").unwrap();
        assert_eq!(
            action,
            MenuAction::Transfer {
                extension: "1000".to_string(),
                dialplan: DEFAULT_DIALPLAN.to_string(),
                context: DEFAULT_CONTEXT.to_string(),
            }
        );

        let full = MenuAction::from_kind(ActionKind::Transfer, "2000 XML sales").unwrap();
        assert_eq!(full.kind(), ActionKind::Transfer);
        if let MenuAction::Transfer { context, .. } = full {
            assert_eq!(context, "sales");
        }
    }

    #[test]
    fn test_missing_argument_rejected() {
        assert!(Binding::action(ActionKind::SubMenu, "  ").is_err());
        assert!(Binding::action(ActionKind::PlaySound, "").is_err());
        assert!(Binding::action(ActionKind::Back, "").is_ok());
    }

    #[test]
    fn test_callback_fills_buffer() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            "pick-queue",
            |ctx: &CallbackContext<'_>, buffer: &mut String| -> Result<ActionKind> {
                buffer.push_str(&format!("-{}", ctx.digits));
                Ok(ActionKind::SubMenu)
            },
        );

        let action = registry.resolve(&handle, &ctx(), "queue").unwrap();
        assert_eq!(action, MenuAction::SubMenu("queue-5".to_string()));
    }

    #[test]
    fn test_callback_error_and_missing_handle() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            "broken",
            |_: &CallbackContext<'_>, _: &mut String| -> Result<ActionKind> {
                Err(Error::internal("database unavailable"))
            },
        );

        assert!(matches!(
            registry.resolve(&handle, &ctx(), ""),
            Err(Error::Callback { .. })
        ));
        assert!(matches!(
            registry.resolve(&CallbackHandle::new("missing"), &ctx(), ""),
            Err(Error::Callback { .. })
        ));
        assert!(registry.unregister("broken"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_user_data() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            "vip",
            |ctx: &CallbackContext<'_>, buffer: &mut String| -> Result<ActionKind> {
                let vip = ctx
                    .user_data
                    .and_then(|data| data.downcast_ref::<bool>())
                    .copied()
                    .unwrap_or(false);
                if vip {
                    *buffer = "9000".to_string();
                    Ok(ActionKind::Transfer)
                } else {
                    Ok(ActionKind::Noop)
                }
            },
        );

        let flag = true;
        let vip_ctx = CallbackContext {
            user_data: Some(&flag as &(dyn Any + Send + Sync)),
            ..ctx()
        };
        assert_eq!(registry.resolve(&handle, &vip_ctx, "").unwrap().kind(), ActionKind::Transfer);
        assert_eq!(registry.resolve(&handle, &ctx(), "").unwrap(), MenuAction::Noop);
    }
}
