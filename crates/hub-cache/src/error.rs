use homelink_hub_connection::ConnectionError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache has not been initialized yet")]
    NotInitialized,

    #[error("failed to load snapshot: {0}")]
    Connection(#[from] ConnectionError),
}
