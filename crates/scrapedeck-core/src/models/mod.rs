//! Data models for the scraping service.
//!
//! This module contains the data structures exchanged with the backend:
//!
//! - `Identity`, `Role`: The signed-in operator and other console users
//! - `FileEntry`, `ScrapedDocument`: Stored scrape artifacts
//! - `ScrapeRequest`, `YoutubeScrapeRequest`: Job submissions

pub mod file;
pub mod identity;
pub mod scrape;

pub use file::{FileEntry, PageMetadata, ScrapedDocument};
pub use identity::{Identity, Role, UserUpdate};
pub use scrape::{
    ScrapeInfo, ScrapeMethod, ScrapeRequest, ScrapeType, Selector, YoutubeScrapeRequest,
};
