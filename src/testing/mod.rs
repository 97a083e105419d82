//! Scripted channel and call-control doubles
//!
//! Used by the unit tests and by the `run` command of the CLI to drive a menu
//! tree without a media stack. Every operation is recorded so callers can
//! inspect what the executor asked for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::core::CallContext;
use crate::interfaces::{dtmf_channel, CallControl, ChannelIo, DtmfSender, PlayOutcome};
use crate::{Error, Result};

/// One recorded capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    Played(String),
    Spoke { engine: Option<String>, voice: Option<String>, text: String },
    Transferred { extension: String, dialplan: String, context: String },
    Application { name: String, args: String },
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Channel that "plays" prompts instantly, optionally interrupting
/// specific prompts with digits or hanging up on them.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    ops: Mutex<Vec<ChannelOp>>,
    interrupts: Mutex<HashMap<String, Vec<String>>>,
    hangup_on: Mutex<Option<String>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next playback of `uri` reports `digits` as pressed during it.
    /// Repeated calls queue further interruptions for later playbacks.
    pub fn interrupt(&self, uri: &str, digits: &str) {
        lock(&self.interrupts)
            .entry(uri.to_string())
            .or_default()
            .push(digits.to_string());
    }

    /// Playback of `uri` reports the channel as gone.
    pub fn hang_up_on(&self, uri: &str) {
        *lock(&self.hangup_on) = Some(uri.to_string());
    }

    pub fn ops(&self) -> Vec<ChannelOp> {
        lock(&self.ops).clone()
    }

    /// URIs played so far, in order.
    pub fn played(&self) -> Vec<String> {
        lock(&self.ops)
            .iter()
            .filter_map(|op| match op {
                ChannelOp::Played(uri) => Some(uri.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn play_count(&self, uri: &str) -> usize {
        self.played().iter().filter(|played| played.as_str() == uri).count()
    }
}

#[async_trait]
impl ChannelIo for ScriptedChannel {
    async fn play_prompt(&self, uri: &str) -> PlayOutcome {
        lock(&self.ops).push(ChannelOp::Played(uri.to_string()));
        debug!("Scripted playback of {}", uri);

        if lock(&self.hangup_on).as_deref() == Some(uri) {
            return PlayOutcome::ChannelGone;
        }

        let mut interrupts = lock(&self.interrupts);
        match interrupts.get_mut(uri) {
            Some(queue) if !queue.is_empty() => PlayOutcome::InterruptedWithDigits(queue.remove(0)),
            _ => PlayOutcome::Completed,
        }
    }

    async fn speak_text(&self, engine: Option<&str>, voice: Option<&str>, text: &str) -> Result<()> {
        lock(&self.ops).push(ChannelOp::Spoke {
            engine: engine.map(str::to_string),
            voice: voice.map(str::to_string),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Call control that records requests and can be told to fail them.
#[derive(Debug, Default)]
pub struct RecordingCallControl {
    ops: Mutex<Vec<ChannelOp>>,
    failing_apps: Mutex<Vec<String>>,
    reject_transfers: Mutex<bool>,
}

impl RecordingCallControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_application(&self, name: &str) {
        lock(&self.failing_apps).push(name.to_string());
    }

    pub fn reject_transfers(&self) {
        *lock(&self.reject_transfers) = true;
    }

    pub fn ops(&self) -> Vec<ChannelOp> {
        lock(&self.ops).clone()
    }
}

#[async_trait]
impl CallControl for RecordingCallControl {
    async fn transfer(&self, extension: &str, dialplan: &str, context: &str) -> Result<()> {
        lock(&self.ops).push(ChannelOp::Transferred {
            extension: extension.to_string(),
            dialplan: dialplan.to_string(),
            context: context.to_string(),
        });
        if *lock(&self.reject_transfers) {
            return Err(Error::invalid_state(format!("transfer to {} rejected", extension)));
        }
        Ok(())
    }

    async fn run_application(&self, name: &str, args: &str) -> Result<()> {
        lock(&self.ops).push(ChannelOp::Application {
            name: name.to_string(),
            args: args.to_string(),
        });
        if lock(&self.failing_apps).iter().any(|app| app == name) {
            return Err(Error::internal(format!("application {} failed", name)));
        }
        Ok(())
    }
}

/// A call context wired to scripted doubles.
pub struct ScriptedCall {
    pub context: CallContext,
    pub digits: DtmfSender,
    pub channel: Arc<ScriptedChannel>,
    pub control: Arc<RecordingCallControl>,
}

impl ScriptedCall {
    pub fn new(call_id: &str) -> Self {
        let (digits, receiver) = dtmf_channel();
        let channel = Arc::new(ScriptedChannel::new());
        let control = Arc::new(RecordingCallControl::new());
        let context = CallContext::new(
            call_id,
            Arc::clone(&channel) as Arc<dyn ChannelIo>,
            Arc::clone(&control) as Arc<dyn CallControl>,
            receiver,
        );
        Self {
            context,
            digits,
            channel,
            control,
        }
    }
}
