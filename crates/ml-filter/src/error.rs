use thiserror::Error;

#[derive(Error, Debug)]
pub enum MlFilterError {
    #[error("Failed to read model bundle at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deserialize model bundle: {0}")]
    Deserialize(#[from] bincode::Error),

    #[error("Threshold must be in [0, 1], got {0}")]
    InvalidThreshold(f64),
}
