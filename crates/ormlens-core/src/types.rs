//! SQL type definitions.

/// Column types known to the mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    Json,
    // Custom type name
    Custom(&'static str),
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    /// Whether storage may generate values for a single-column primary key
    /// of this type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }
}
