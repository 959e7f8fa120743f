//! Connection engine: socket acquisition, handshake, request pipeline and
//! reconnection.

mod call;
mod handshake;
mod manager;
mod pending;
mod session;
mod socket_provider;
mod write_buffer;

pub use call::CallFuture;
pub use manager::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use session::ConnectionId;
pub use socket_provider::{RoundRobinSocketProvider, SingleSocketProvider, SocketProvider};

pub(crate) use call::Call;
