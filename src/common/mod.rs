pub mod api {
    pub mod client;
    pub mod error;
    pub mod models;

    mod source;
    pub use source::ComicSource;
}

pub mod cache;
pub mod config;
pub mod logger;
pub mod naming;
pub mod storage;
