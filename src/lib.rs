//! Downloader for Supercell game asset patches.
//!
//! The game server is asked for the live patch over its binary protocol
//! ([`protocol`]), recovering the client version when it is out of date
//! ([`protocol::prober`]). The announced fingerprint is then fetched file by
//! file from the asset host by a pool of workers ([`download`]), optionally
//! unpacking the compressed containers on the way ([`compression`]).

pub mod codec;
pub mod compression;
pub mod download;
pub mod engine;
pub mod env;
pub mod networking;
pub mod protocol;
pub mod storage;
pub mod ui;
pub mod util;
