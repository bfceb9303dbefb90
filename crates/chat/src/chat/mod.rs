/// Domain entities for the live conversation.
pub mod message;
/// Single-flight exchange lifecycle.
pub mod state;

pub use message::{GREETING, HINT, Message, Role, Transcript};
pub use state::{
    ExchangeKind, ExchangeRejection, ExchangeState, ExchangeTransition, ExchangeTransitionResult,
    PendingExchange,
};
