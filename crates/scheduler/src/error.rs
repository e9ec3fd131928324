use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler has not been started")]
    NotRunning,

    #[error("job id '{0}' is not registered")]
    UnknownJob(String),
}
