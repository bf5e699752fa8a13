pub mod factory;
pub mod handlers;
pub mod handshake;
pub mod routes;
pub mod server;
pub mod target;

pub use factory::{HandlerContext, HandlerFactory};
pub use routes::RouteTable;
pub use server::SidecarServer;
pub use target::ProxyTargets;
