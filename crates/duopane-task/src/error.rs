#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown task: {0}")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, Error>;
