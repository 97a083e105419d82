//! Capabilities the IVR engine consumes from the media and call layers
//!
//! Audio playback, speech synthesis, transfers and dialplan applications are
//! performed by whatever owns the call leg. The engine only relies on the
//! contracts below; every method is a suspension point that the executor
//! races against the call's hangup token.

use async_trait::async_trait;

use crate::Result;

/// Result of playing a prompt on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Playback ran to the end.
    Completed,
    /// The caller pressed keys during playback; playback stopped and the
    /// detected digits are handed over in order.
    InterruptedWithDigits(String),
    /// The call leg went away during playback.
    ChannelGone,
}

/// Media operations on one call leg.
#[async_trait]
pub trait ChannelIo: Send + Sync {
    /// Plays the sound at `uri`, stopping early if digits arrive.
    async fn play_prompt(&self, uri: &str) -> PlayOutcome;

    /// Speaks `text`. `engine` and `voice` fall back to the channel's
    /// defaults when absent. Returns [`Error::ChannelGone`] on hangup.
    ///
    /// [`Error::ChannelGone`]: crate::Error::ChannelGone
    async fn speak_text(&self, engine: Option<&str>, voice: Option<&str>, text: &str) -> Result<()>;
}

/// Call-control operations on one call leg.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Hands the call to `extension` in `dialplan`/`context`.
    async fn transfer(&self, extension: &str, dialplan: &str, context: &str) -> Result<()>;

    /// Runs a dialplan application to completion.
    async fn run_application(&self, name: &str, args: &str) -> Result<()>;
}
