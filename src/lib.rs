pub mod commands;
pub mod compensation;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod decode;
pub mod features;
pub mod modbus;
pub mod output;
pub mod planner;
pub mod registers;
pub mod snapshot;
pub mod transport;
