//! External interfaces of the IVR engine

pub mod channel;
pub mod dtmf_queue;

pub use channel::{CallControl, ChannelIo, PlayOutcome};
pub use dtmf_queue::{dtmf_channel, DigitEvent, DtmfReceiver, DtmfSender};
