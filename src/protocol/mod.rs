pub mod ber;
pub mod command;
pub mod connection;
pub mod pdu;
pub mod query;
