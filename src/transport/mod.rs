pub mod coalescer;
pub mod protocol;

pub use coalescer::{CoalescerConfig, Emitter, MessageCoalescer};
pub use protocol::{
    parse_message, parse_value, ChatDirectives, InboundMessage, ProtocolError, SuggestionUpdate,
};
