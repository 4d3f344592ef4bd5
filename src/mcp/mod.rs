//! MCP endpoint: JSON-RPC 2.0 over HTTP POST at `/mcp/rss`.
//!
//! **Auth** (`auth`): `MCP-<prefix>_<secret>` bearer tokens, separate from REST sessions.
//!
//! **Tools** (`tools`): the fixed LLM tool catalogue.
//!
//! **Server** (`server`): envelope handling and method routing.
//!
//! Protocol: <https://spec.modelcontextprotocol.io/2024-11-05/>

pub mod auth;
pub mod rpc;
pub mod server;
pub mod tools;
