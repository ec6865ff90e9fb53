// Library root for the shared pieces of the Dukkho chat relay: wire types,
// configuration, the SQLite chat store, and score-tag extraction.

pub mod config;
pub mod db;
pub mod protocol;
pub mod score;
