#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("consumer group '{group}' already exists on stream '{stream}'")]
    GroupAlreadyExists { stream: String, group: String },
    #[error("no such consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup { stream: String, group: String },
    #[error("malformed response from stream store for command '{command}'")]
    Protocol { command: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
