use std::fmt::Display;

#[derive(Debug)]
pub struct ServiceError {
    pub error: String,
}

impl ServiceError {
    pub fn from_string(error: String) -> Self {
        ServiceError { error }
    }

    pub fn from_error<E: Display>(prefix: &str) -> impl Fn(E) -> Self + '_ {
        move |e: E| ServiceError::from_string(format!("{}: {}", prefix, e))
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetadataInjector error: {}", self.error)
    }
}

impl std::error::Error for ServiceError {}

impl From<serde_json::error::Error> for ServiceError {
    fn from(error: serde_json::error::Error) -> Self {
        ServiceError::from_string(error.to_string())
    }
}
