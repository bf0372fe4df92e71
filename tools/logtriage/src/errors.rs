use thiserror::Error;

pub const EXIT_USAGE: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("input not found: {0}")]
    MissingInput(String),
    #[error("unsafe path in archive: {0}")]
    UnsafeArchivePath(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("empty bundle: {0}")]
    EmptyBundle(String),
    #[error("invalid catalogue: {0}")]
    InvalidCatalogue(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("report parse error: {0}")]
    ReportParse(String),
    #[error("narrator error: {0}")]
    Narrator(String),
}

impl TriageError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::MissingInput(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}
