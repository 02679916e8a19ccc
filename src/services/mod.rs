pub mod identity;
pub mod imports;
pub mod lastfm;
pub mod likes;
pub mod matching;
pub mod metadata;
pub mod playlists;
pub mod spotify;
