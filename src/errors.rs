use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntityGraphError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate entity: {0}")]
    Duplicate(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("incompatible reference: {0}")]
    IncompatibleReference(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("query error: {0}")]
    QueryError(String),
}

impl EntityGraphError {
    pub fn invalid_id<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::InvalidId(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::NotFound(msg.into())
    }

    pub fn duplicate<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::Duplicate(msg.into())
    }

    pub fn unknown_field<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::UnknownField(msg.into())
    }

    pub fn incompatible_reference<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::IncompatibleReference(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::InvalidInput(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::Config(msg.into())
    }

    pub fn connection<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::ConnectionError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        EntityGraphError::QueryError(msg.into())
    }

    /// True for conditions a bulk sweep tolerates by skipping the item.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EntityGraphError::NotFound(_))
    }
}
