//! Per-call execution context and the events an executor reports

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::binding::ActionKind;
use super::executor::MenuOutcome;
use crate::interfaces::{CallControl, ChannelIo, DtmfReceiver};

/// Default ceiling on nested sub-menus for one call.
pub const DEFAULT_MAX_MENU_DEPTH: usize = 16;

/// IVR lifecycle events
#[derive(Debug, Clone)]
pub enum IvrEvent {
    CallStarted {
        call_id: String,
        entry_menu: String,
    },
    MenuEntered {
        call_id: String,
        menu: String,
        depth: usize,
    },
    ActionDispatched {
        call_id: String,
        menu: String,
        action: ActionKind,
        digits: Option<String>,
    },
    MenuExited {
        call_id: String,
        menu: String,
        depth: usize,
    },
    CallFinished {
        call_id: String,
        outcome: MenuOutcome,
        duration: Duration,
    },
    Error {
        call_id: Option<String>,
        message: String,
    },
}

/// Everything one call's executor owns: identity, capabilities, its digit
/// queue and the token that signals hangup.
pub struct CallContext {
    pub(crate) call_id: String,
    pub(crate) channel: Arc<dyn ChannelIo>,
    pub(crate) control: Arc<dyn CallControl>,
    pub(crate) digits: DtmfReceiver,
    pub(crate) cancel: CancellationToken,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) events: Option<mpsc::UnboundedSender<IvrEvent>>,
    pub(crate) max_depth: usize,
}

impl CallContext {
    pub fn new<S: Into<String>>(
        call_id: S,
        channel: Arc<dyn ChannelIo>,
        control: Arc<dyn CallControl>,
        digits: DtmfReceiver,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            channel,
            control,
            digits,
            cancel: CancellationToken::new(),
            user_data: None,
            events: None,
            max_depth: DEFAULT_MAX_MENU_DEPTH,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attaches an object that callback bindings can downcast and inspect.
    pub fn with_user_data(mut self, data: Arc<dyn Any + Send + Sync>) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<IvrEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Token that, once cancelled, makes the executor unwind with
    /// `ChannelGone`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_hung_up(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn emit(&self, event: IvrEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.call_id)
            .field("hung_up", &self.cancel.is_cancelled())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
