pub mod client;
pub mod server;

pub use client::Endpoint;
pub use server::Server;
