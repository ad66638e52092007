pub mod article_service;
pub mod canonical;
pub mod feed_service;
pub mod follows_service;
pub mod ingest;
pub mod models;
pub mod scoring_service;
