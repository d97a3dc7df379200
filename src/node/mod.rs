pub mod cache;
pub mod client;

pub use client::{NodeClient, NodeInfo, RawBlock};
