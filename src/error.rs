use crate::android::chunk::ResourceError;
use crate::dex::error::DexError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiffuseError>;

/// Broad classification of a [`DiffuseError`], looking through artifact context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A magic number or structural invariant was violated.
    Malformed,
    /// A named entry does not exist in the archive.
    NotFound,
    /// A type descriptor outside the JVM/DEX grammar.
    UnknownDescriptor,
    Io,
}

#[derive(Debug, Error)]
pub enum DiffuseError {
    #[error("{0}")]
    Dex(#[from] DexError),

    #[error("{0}")]
    Resource(#[from] ResourceError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unable to parse line {line} of mapping: {text}")]
    Mapping { line: usize, text: String },

    #[error("malformed signature block: {0}")]
    Signature(String),

    #[error("no entry: {0}")]
    NotFound(String),

    #[error("unknown type descriptor {0:?}")]
    UnknownDescriptor(String),

    #[error("{0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{name}: {source}")]
    Artifact {
        name: String,
        #[source]
        source: Box<DiffuseError>,
    },
}

impl DiffuseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiffuseError::Artifact { source, .. } => source.kind(),
            DiffuseError::NotFound(_) => ErrorKind::NotFound,
            DiffuseError::UnknownDescriptor(_) => ErrorKind::UnknownDescriptor,
            DiffuseError::Io(_) => ErrorKind::Io,
            DiffuseError::Zip(zip::result::ZipError::Io(_)) => ErrorKind::Io,
            DiffuseError::Zip(zip::result::ZipError::FileNotFound) => ErrorKind::NotFound,
            _ => ErrorKind::Malformed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Wraps this error with the name of the artifact or entry being decoded.
    pub fn in_artifact(self, name: impl Into<String>) -> DiffuseError {
        DiffuseError::Artifact { name: name.into(), source: Box::new(self) }
    }
}

/// Attaches an artifact name to the error side of a result.
pub(crate) trait ArtifactContext<T> {
    fn in_artifact(self, name: &str) -> Result<T>;
}

impl<T, E: Into<DiffuseError>> ArtifactContext<T> for std::result::Result<T, E> {
    fn in_artifact(self, name: &str) -> Result<T> {
        self.map_err(|e| e.into().in_artifact(name))
    }
}
