mod backend;
mod dispatcher;
mod error;
mod forwarder;
mod headers;
mod pool;
mod transport;

pub use backend::{Backend, BackendState};
pub use dispatcher::Dispatcher;
pub use error::ProxyError;
pub use forwarder::RequestForwarder;
pub use headers::{strip_hop_by_hop, HOP_BY_HOP};
pub use pool::ServerPool;
pub use transport::{HyperTransport, Transport};
