//! Data types shared by the transport, the buffer and the session manager.
//!
//! - [`session`]: session records and REST bodies
//! - [`message`]: the stream envelope ([`StreamMessage`]) and its payload
//! - [`point`]: normalized buffer entries ([`CtgDataPoint`])

mod message;
mod point;
mod session;

pub use message::{DataPayload, DataType, MessageKind, StreamMessage};
pub use point::{CtgDataPoint, LOSS_SENTINEL};
pub use session::{
    validate_card_id, ApiErrorBody, Session, SessionList, SessionStatus, StartSessionRequest,
};

pub(crate) use session::SessionEnvelope;
