use bytes::Bytes;
use sosbus_frame::{
    Message, BROADCAST_ADDRESS, DEFAULT_MODULE_ID, MOD_MSG_START, PC_NODE_ADDRESS,
};

/// Session-level values for the routing fields of outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDefaults {
    pub dest_module: u8,
    pub src_module: u8,
    pub dest_addr: u16,
    pub src_addr: u16,
    pub msg_type: u8,
}

impl Default for MessageDefaults {
    fn default() -> Self {
        Self {
            dest_module: DEFAULT_MODULE_ID,
            src_module: DEFAULT_MODULE_ID,
            dest_addr: BROADCAST_ADDRESS,
            src_addr: PC_NODE_ADDRESS,
            msg_type: MOD_MSG_START,
        }
    }
}

impl MessageDefaults {
    /// Overwrite only the fields present in `route`.
    pub fn update(&mut self, route: &Route) {
        if let Some(value) = route.dest_module {
            self.dest_module = value;
        }
        if let Some(value) = route.src_module {
            self.src_module = value;
        }
        if let Some(value) = route.dest_addr {
            self.dest_addr = value;
        }
        if let Some(value) = route.src_addr {
            self.src_addr = value;
        }
        if let Some(value) = route.msg_type {
            self.msg_type = value;
        }
    }
}

/// Routing fields of an outgoing message. Omitted fields take the session
/// defaults when the message is built.
///
/// ```
/// use sosbus_client::{MessageDefaults, Route};
///
/// let message = Route::new()
///     .dest_addr(5)
///     .msg_type(33)
///     .build(&MessageDefaults::default(), vec![1, 2, 3])
///     .unwrap();
/// assert_eq!(message.dest_addr(), 5);
/// assert_eq!(message.src_addr(), 0xFFFE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    pub dest_module: Option<u8>,
    pub src_module: Option<u8>,
    pub dest_addr: Option<u16>,
    pub src_addr: Option<u16>,
    pub msg_type: Option<u8>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dest_module(mut self, value: u8) -> Self {
        self.dest_module = Some(value);
        self
    }

    pub fn src_module(mut self, value: u8) -> Self {
        self.src_module = Some(value);
        self
    }

    pub fn dest_addr(mut self, value: u16) -> Self {
        self.dest_addr = Some(value);
        self
    }

    pub fn src_addr(mut self, value: u16) -> Self {
        self.src_addr = Some(value);
        self
    }

    pub fn msg_type(mut self, value: u8) -> Self {
        self.msg_type = Some(value);
        self
    }

    /// Build a message, filling omitted fields from `defaults`.
    pub fn build(
        &self,
        defaults: &MessageDefaults,
        payload: impl Into<Bytes>,
    ) -> sosbus_frame::Result<Message> {
        Message::new(
            self.dest_module.unwrap_or(defaults.dest_module),
            self.src_module.unwrap_or(defaults.src_module),
            self.dest_addr.unwrap_or(defaults.dest_addr),
            self.src_addr.unwrap_or(defaults.src_addr),
            self.msg_type.unwrap_or(defaults.msg_type),
            payload,
        )
    }
}
