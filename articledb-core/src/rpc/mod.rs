pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{RpcClient, TcpDialer};
pub use handler::Handler;
pub use protocol::{Request, Response};
pub use server::{RpcServer, serve_connection};
