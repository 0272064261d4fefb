//! Addressed (point-to-point) payloads
//!
//! The gossip engine only interprets `Dest`, `HopLimit` and `Origin`. Every
//! other key belongs to the subsystem riding on top (private chat, block
//! transfer, search replies, trust challenges) and is carried through
//! untouched.

use murmur_core::Origin;
use serde_json::{Map, Value};

/// Subsystem key carrying private chat text
pub const CHAT_TEXT: &str = "ChatText";

/// Hop limit used when the caller does not pick one
pub const DEFAULT_HOP_LIMIT: u32 = 10;

/// A payload routed hop by hop towards a named origin
#[derive(Clone, Debug, PartialEq)]
pub struct AddressedPayload {
    /// Destination origin
    pub dest: Origin,
    /// Remaining hops before the payload is dropped
    pub hop_limit: u32,
    /// Sender, stamped by the originating engine
    pub origin: Option<Origin>,
    /// Subsystem-specific fields
    pub fields: Map<String, Value>,
}

impl AddressedPayload {
    pub fn new(dest: Origin, hop_limit: u32) -> Self {
        AddressedPayload {
            dest,
            hop_limit,
            origin: None,
            fields: Map::new(),
        }
    }

    /// Build a private chat line
    pub fn private_chat(dest: Origin, hop_limit: u32, text: impl Into<String>) -> Self {
        Self::new(dest, hop_limit).with_field(CHAT_TEXT, Value::String(text.into()))
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Private chat text, if this payload is a chat line
    pub fn chat_text(&self) -> Option<&str> {
        self.fields.get(CHAT_TEXT).and_then(Value::as_str)
    }

    /// Consume one hop. Returns `false` once the payload may travel no
    /// further.
    pub fn take_hop(&mut self) -> bool {
        self.hop_limit = self.hop_limit.saturating_sub(1);
        self.hop_limit > 0
    }
}
