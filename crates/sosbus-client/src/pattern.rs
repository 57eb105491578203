use std::fmt;

use sosbus_frame::{Header, Message};

/// One routing field of a [`Pattern`]: either a wildcard or a concrete value.
///
/// Zero is an ordinary concrete value; only [`Field::Any`] is a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Field<T> {
    /// Matches every value.
    #[default]
    Any,
    /// Matches exactly this value.
    Exact(T),
}

impl<T: Copy + PartialEq> Field<T> {
    /// Whether a received header value satisfies this field.
    pub fn matches(&self, value: T) -> bool {
        match self {
            Field::Any => true,
            Field::Exact(expected) => *expected == value,
        }
    }

    /// Whether a stored field is selected by this field used as a query.
    ///
    /// A wildcard query selects anything; a concrete query only selects a
    /// stored field holding the same concrete value.
    pub fn selects(&self, stored: &Field<T>) -> bool {
        match self {
            Field::Any => true,
            Field::Exact(expected) => *stored == Field::Exact(*expected),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Field::Any)
    }

    pub fn value(&self) -> Option<T> {
        match self {
            Field::Any => None,
            Field::Exact(value) => Some(*value),
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Exact(value),
            None => Field::Any,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Any => f.write_str("*"),
            Field::Exact(value) => write!(f, "{value}"),
        }
    }
}

/// A header shape used to select messages for triggers and blocking waits.
///
/// ```
/// use sosbus_client::Pattern;
///
/// let replies = Pattern::any().src_addr(5).msg_type(33);
/// assert!(!replies.is_any());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pattern {
    pub dest_module: Field<u8>,
    pub src_module: Field<u8>,
    pub dest_addr: Field<u16>,
    pub src_addr: Field<u16>,
    pub msg_type: Field<u8>,
}

impl Pattern {
    /// A pattern with every field wildcarded.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn dest_module(mut self, value: u8) -> Self {
        self.dest_module = Field::Exact(value);
        self
    }

    pub fn src_module(mut self, value: u8) -> Self {
        self.src_module = Field::Exact(value);
        self
    }

    pub fn dest_addr(mut self, value: u16) -> Self {
        self.dest_addr = Field::Exact(value);
        self
    }

    pub fn src_addr(mut self, value: u16) -> Self {
        self.src_addr = Field::Exact(value);
        self
    }

    pub fn msg_type(mut self, value: u8) -> Self {
        self.msg_type = Field::Exact(value);
        self
    }

    /// True when every field is a wildcard.
    pub fn is_any(&self) -> bool {
        self.dest_module.is_any()
            && self.src_module.is_any()
            && self.dest_addr.is_any()
            && self.src_addr.is_any()
            && self.msg_type.is_any()
    }

    /// Whether a received header satisfies every concrete field.
    pub fn matches_header(&self, header: &Header) -> bool {
        self.dest_module.matches(header.dest_module)
            && self.src_module.matches(header.src_module)
            && self.dest_addr.matches(header.dest_addr)
            && self.src_addr.matches(header.src_addr)
            && self.msg_type.matches(header.msg_type)
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.matches_header(message.header())
    }

    /// Whether a stored pattern is selected by this pattern used as a
    /// removal query. See [`Field::selects`].
    pub fn selects(&self, stored: &Pattern) -> bool {
        self.dest_module.selects(&stored.dest_module)
            && self.src_module.selects(&stored.src_module)
            && self.dest_addr.selects(&stored.dest_addr)
            && self.src_addr.selects(&stored.src_addr)
            && self.msg_type.selects(&stored.msg_type)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "did={} sid={} daddr={} saddr={} type={}",
            self.dest_module, self.src_module, self.dest_addr, self.src_addr, self.msg_type
        )
    }
}
