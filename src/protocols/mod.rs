//! Protocol-level definitions shared by the IVR engine

pub mod dtmf;

pub use dtmf::DigitAlphabet;
