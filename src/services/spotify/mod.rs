pub mod client;

pub use client::SpotifyClient;

pub const CONNECTOR_NAME: &str = "spotify";
