//! OneBot-V11 integration: WebSocket transport and chat command handling.

pub mod dispatcher;
pub mod events;
pub mod transport;

pub use dispatcher::CommandDispatcher;
pub use events::MessageEvent;
pub use transport::{BotTransport, EventHandler};
