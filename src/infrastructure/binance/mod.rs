pub mod mapping;
pub mod rest;
pub mod signing;
pub mod websocket;

pub use rest::BinanceAdapter;
