pub mod audit;
pub mod http;
pub mod roots;
pub mod server;
pub mod tools;
pub mod types;

pub use http::HttpMcpServer;
pub use server::McpServer;
