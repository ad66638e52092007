pub mod article_fetcher;
pub mod atproto;
pub mod database;
pub mod jetstream;
pub mod repository;
pub mod supervisor;
