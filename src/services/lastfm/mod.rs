pub mod client;

pub use client::LastfmClient;

pub const CONNECTOR_NAME: &str = "lastfm";
