pub mod common;
pub mod descramble;
pub mod downloader;

pub use common::api::ComicSource;
pub use common::api::client::JmClient;
pub use common::config::Settings;
pub use downloader::ChapterDownloader;
