pub mod decision;
pub mod errors;
pub mod events;
pub mod helios;
pub mod market;
pub mod order;
pub mod ports;
pub mod position;
pub mod signal;
