//! Builder-style configuration surface for [`crate::pager::Pager::open`]
//! (§2 ambient stack: "a builder-style configuration surface").

use cask_types::{PageSize, SafetyLevel};

use crate::busy::{BusyHandler, NoBusyHandler};
use crate::codec::{NullCodec, PageCodec};

/// Options consumed once at [`crate::pager::Pager::open`]. Knobs that
/// make sense to change on a live pager (cache size, safety level,
/// codec, ...) are mutators on `Pager` instead; see §6.
pub struct OpenOptions {
    pub(crate) page_size: PageSize,
    pub(crate) cache_capacity: usize,
    pub(crate) reserved_bytes: u8,
    pub(crate) safety_level: SafetyLevel,
    pub(crate) busy_handler: Box<dyn BusyHandler>,
    pub(crate) codec: Option<Box<dyn PageCodec>>,
    pub(crate) read_only: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::DEFAULT,
            cache_capacity: 256,
            reserved_bytes: 0,
            safety_level: SafetyLevel::Normal,
            busy_handler: Box::new(NoBusyHandler),
            codec: None,
            read_only: false,
        }
    }
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_reserved_bytes(mut self, reserved: u8) -> Self {
        self.reserved_bytes = reserved;
        self
    }

    #[must_use]
    pub const fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety_level = level;
        self
    }

    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn with_busy_handler(mut self, handler: impl BusyHandler + 'static) -> Self {
        self.busy_handler = Box::new(handler);
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: impl PageCodec + 'static) -> Self {
        self.codec = Some(Box::new(codec));
        self
    }
}
