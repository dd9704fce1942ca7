//! Error types for ormlens operations.

use std::fmt;

/// The primary error type for all ormlens operations.
#[derive(Debug)]
pub enum Error {
    /// No inspection handler accepts objects of this type.
    NoInspectionAvailable {
        /// Rust type name of the inspected subject.
        type_name: String,
    },
    /// The class has no mapper.
    UnmappedClass(String),
    /// The instance's class has no mapper.
    UnmappedInstance(String),
    /// The request is not valid for the target object.
    InvalidRequest(String),
    /// Mapping configuration errors
    Mapping(MappingError),
    /// Session and unit-of-work errors
    Session(SessionError),
    /// Backing storage errors
    Storage(String),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No foreign key joins the two tables
    NoForeignKeys,
    /// The mapped table has no primary key
    NoPrimaryKey,
    /// The class already has a mapper
    AlreadyMapped,
    /// A referenced class or table is not mapped
    UnresolvedTarget,
    /// Declared type ancestry forms a cycle
    AncestryCycle,
    /// Invalid attribute key or property definition
    InvalidProperty,
}

#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Instance is not bound to a session; lazy load cannot proceed
    DetachedInstance,
    /// The row backing a persistent instance no longer exists
    ObjectDeleted,
    /// Instance is attached to a different session
    AlreadyAttached,
    /// Instance is not present in this session
    NotInSession,
    /// Flush found a dependency cycle between tables
    CycleDetected,
}

impl Error {
    /// Build an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Build a mapping error.
    pub fn mapping(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            kind,
            message: message.into(),
        })
    }

    /// Build a session error.
    pub fn session(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Error::Session(SessionError {
            kind,
            message: message.into(),
        })
    }

    /// Is this the dispatch failure raised by `inspect`?
    pub fn is_no_inspection(&self) -> bool {
        matches!(self, Error::NoInspectionAvailable { .. })
    }

    /// Get the session error kind, if this is a session error.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            Error::Session(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Get the mapping error kind, if this is a mapping error.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoInspectionAvailable { type_name } => write!(
                f,
                "No inspection system is available for object of type {}",
                type_name
            ),
            Error::UnmappedClass(name) => write!(f, "Class '{}' is not mapped", name),
            Error::UnmappedInstance(name) => {
                write!(f, "Instance of class '{}' is not mapped", name)
            }
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Session(e) => write!(f, "Session error: {}", e.message),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MappingError {}

impl std::error::Error for SessionError {}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for ormlens operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_inspection_message_names_type() {
        let err = Error::NoInspectionAvailable {
            type_name: "app::Foo".to_string(),
        };
        assert!(err.is_no_inspection());
        assert_eq!(
            err.to_string(),
            "No inspection system is available for object of type app::Foo"
        );
    }

    #[test]
    fn kind_helpers() {
        let err = Error::session(SessionErrorKind::DetachedInstance, "not bound");
        assert_eq!(err.session_kind(), Some(SessionErrorKind::DetachedInstance));
        assert_eq!(err.mapping_kind(), None);
        assert!(!err.is_no_inspection());

        let err = Error::mapping(MappingErrorKind::NoForeignKeys, "users / addresses");
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::NoForeignKeys));
        assert_eq!(err.to_string(), "Mapping error: users / addresses");
    }
}
