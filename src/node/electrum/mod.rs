pub mod client;

pub use client::ElectrumClient;
