// Error kinds and the builder-style error shared by every storage and index path.
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Schema,
    NotFound,
    AlreadyExists,
    Permission,
    Corrupt,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    table: Option<String>,
    field: Option<String>,
    row_id: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            table: None,
            field: None,
            row_id: None,
            source: None,
        }
    }

    /// Wraps an I/O failure on `path`, classifying it by `io::ErrorKind`.
    pub fn io(err: io::Error, path: &Path) -> Self {
        Self::new(io_error_kind(&err)).with_path(path).with_source(err)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn row_id(&self) -> Option<u64> {
        self.row_id
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_row_id(mut self, row_id: u64) -> Self {
        self.row_id = Some(row_id);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(table) = &self.table {
            write!(f, " (table: {table})")?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field: {field})")?;
        }
        if let Some(row_id) = self.row_id {
            write!(f, " (row: {row_id})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::Schema => 5,
        ErrorKind::Permission => 6,
        ErrorKind::Corrupt => 7,
        ErrorKind::Io => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, io_error_kind, to_exit_code};
    use std::io;
    use std::path::Path;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::AlreadyExists, 4),
            (ErrorKind::Schema, 5),
            (ErrorKind::Permission, 6),
            (ErrorKind::Corrupt, 7),
            (ErrorKind::Io, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn io_errors_map_to_expected_kinds() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(io_error_kind(&err), ErrorKind::NotFound);

        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(io_error_kind(&err), ErrorKind::Permission);

        let err = io::Error::from(io::ErrorKind::AlreadyExists);
        assert_eq!(io_error_kind(&err), ErrorKind::AlreadyExists);

        let err = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(io_error_kind(&err), ErrorKind::Io);
    }

    #[test]
    fn display_includes_context() {
        let err = Error::io(
            io::Error::from(io::ErrorKind::UnexpectedEof),
            Path::new("/tmp/orders/rows/3.row"),
        )
        .with_message("failed to read row")
        .with_table("orders")
        .with_row_id(3);
        let text = err.to_string();
        assert!(text.starts_with("Io: failed to read row"));
        assert!(text.contains("(table: orders)"));
        assert!(text.contains("(row: 3)"));
        assert!(text.contains("3.row"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
