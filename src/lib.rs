pub mod acceptor;
pub mod config;
pub mod error;
pub mod gateway;
pub mod learner;
pub mod message;
pub mod proposer;
pub mod rpc;
pub mod server;
pub mod types;
