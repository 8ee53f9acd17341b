pub mod client;
pub mod message;

#[cfg(feature = "test-utils")]
pub mod test_util;

pub use client::{ChannelClient, ChannelError, ConsoleChannel};
pub use message::{
    ButtonOption, EventContent, InboundEvent, LogLevel, MessageHeader, OptionRow, OptionSection,
    OutgoingKind, OutgoingMessage, OutgoingOptions, Participant,
};
