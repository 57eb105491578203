//! Well-known module ids, node addresses and message types.
//!
//! Message types below [`MOD_MSG_START`] are kernel messages; module-defined
//! types start there.

/// Destination address that reaches every node.
pub const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// Node address the PC side of the bus uses unless configured otherwise.
pub const PC_NODE_ADDRESS: u16 = 0xFFFE;

/// Module id used for both ends of a message unless configured otherwise.
pub const DEFAULT_MODULE_ID: u8 = 128;

/// First module-defined message type.
pub const MOD_MSG_START: u8 = 32;

/// Returns true if the address is the broadcast address.
pub fn is_broadcast(addr: u16) -> bool {
    addr == BROADCAST_ADDRESS
}

/// Returns a human-readable class for a message type.
pub fn msg_type_class(msg_type: u8) -> &'static str {
    if msg_type < MOD_MSG_START {
        "KERNEL"
    } else {
        "MODULE"
    }
}
