use uuid::timestamp::context::ContextV7;
use uuid::{Timestamp, Uuid};

/// Mints UUIDv7 identifiers: the leading 48 bits are milliseconds since
/// the epoch, so lexical order approximates temporal order. The shared
/// [`ContextV7`] counter keeps ids from one generator strictly increasing
/// even within a single millisecond.
///
/// One generator serves both task ids and oplog entry ids.
pub struct IdGenerator {
    ctx: ContextV7,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator {
            ctx: ContextV7::new(),
        }
    }

    pub fn mint(&self) -> String {
        Uuid::new_v7(Timestamp::now(&self.ctx)).to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-installation device identifier, minted once and persisted in `meta`.
pub fn mint_device_id() -> String {
    Uuid::new_v4().to_string()
}
