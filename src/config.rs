use std::env;

/// Default Jetstream endpoint; any instance speaking the same subscribe
/// protocol can be swapped in via JETSTREAM_URL.
const DEFAULT_JETSTREAM_URL: &str = "wss://jetstream2.us-east.bsky.network/subscribe";

/// Public AppView; follows/profile lookups need no credentials against it.
const DEFAULT_BSKY_API_BASE: &str = "https://public.api.bsky.app";

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub host: String,
    pub jetstream_url: String,
    pub bsky_api_base: String,
    pub bsky_access_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://newsflux.db".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let jetstream_url =
            env::var("JETSTREAM_URL").unwrap_or_else(|_| DEFAULT_JETSTREAM_URL.to_string());

        let bsky_api_base =
            env::var("BSKY_API_BASE").unwrap_or_else(|_| DEFAULT_BSKY_API_BASE.to_string());

        let bsky_access_token = env::var("BSKY_ACCESS_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Config {
            database_url,
            port,
            host,
            jetstream_url,
            bsky_api_base,
            bsky_access_token,
        })
    }
}
