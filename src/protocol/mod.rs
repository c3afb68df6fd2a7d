pub mod accumulator;
pub mod framer;
pub mod health;
pub mod multiplexer;
pub mod reconnect;
pub mod scheduler;
pub mod sync;
pub mod transport;
pub mod wire;
