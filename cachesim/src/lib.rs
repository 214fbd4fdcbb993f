pub mod addr;
pub mod cache;
pub mod config;
pub mod eval;
pub mod sim;
pub mod trace;
pub mod transpose;

#[cfg(feature = "stat")]
pub mod stat;
