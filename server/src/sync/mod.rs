mod broadcast;
mod inject;
pub mod polling;
mod protocol;
#[cfg(test)]
mod tests;
pub mod ws;

pub use broadcast::{Broadcaster, ClientConnection, SyncOptions, TransportKind};
pub use inject::inject_client_script;
pub use protocol::{ProgressPayload, SyncMessage, encode};
