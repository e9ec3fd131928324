use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlSurfaceError {
    #[error("Failed to construct a Redis client: {0}")]
    ClientBuild(#[from] redis::RedisError),

    #[error("Read or write to the control surface timed out")]
    Timeout,
}
