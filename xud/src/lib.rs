pub mod config;
pub mod connext;
pub mod lnd;
pub mod logging;
pub mod swap_client;
pub mod swaps;
pub mod units;
