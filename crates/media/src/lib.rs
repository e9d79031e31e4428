//! Song search and download-link resolution for the `/song` command.
//!
//! Thin client over two remote HTTP APIs: a search index and a download
//! resolver. No retries, no caching — failures surface as one error for
//! the command handler to translate into its uniform reply.

pub mod song;

pub use song::{SongClient, SongError, SongHit, SongLink};
