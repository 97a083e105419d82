//! Core IVR engine: digit matching, menus and the per-call executor

pub mod binding;
pub mod context;
pub mod executor;
pub mod menu;
pub mod registry;
pub mod stack;
pub mod stream;

pub use binding::{
    ActionKind, Binding, CallbackContext, CallbackHandle, CallbackRegistry, MenuAction, MenuCallback,
};
pub use context::{CallContext, IvrEvent, DEFAULT_MAX_MENU_DEPTH};
pub use executor::{execute, MenuOutcome};
pub use menu::{Menu, MenuBuilder, MenuCatalog};
pub use registry::{FeedResult, PatternRegistry};
pub use stack::{MenuFrame, MenuStack};
pub use stream::DigitStream;
