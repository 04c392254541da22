pub mod config;
pub mod error;
pub mod exchange;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transcript;
pub mod transport;

mod util;
