pub mod blob_sink;
pub mod broker_port;
pub mod core;
pub mod error_log;
pub mod simulated_broker;
