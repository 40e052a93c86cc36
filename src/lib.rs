pub mod backend;
pub mod banner;
pub mod client;
pub mod config;
pub mod consts;
pub mod envelope;
pub mod events;
pub mod invoker;
pub mod request;
pub mod resolver;
pub mod router;
pub mod server;
pub mod telemetry;
pub mod wire;
