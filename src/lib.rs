//! Serverless chat between peers on a local network
//!
//! Peers announce themselves with UDP broadcasts and negotiate one TCP
//! connection per conversation. [`network::ChatNode`] runs a complete peer;
//! the [`cli`] module is a terminal front end for it.

pub mod cli;
pub mod network;
pub mod utils;
