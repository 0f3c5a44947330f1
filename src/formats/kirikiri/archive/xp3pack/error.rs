use thiserror::Error;

/// Conditions raised by the XP3 reader and writer that callers may need to
/// tell apart. They travel inside [anyhow::Error]; use `downcast_ref`.
#[derive(Debug, Error)]
pub enum Xp3Error {
    #[error("File {name} is too large to be stored ({size} bytes)")]
    FileTooLarge { name: String, size: u64 },
    #[error("Encryption is not implemented for scheme {0}")]
    EncryptionNotSupported(String),
    #[error("Unknown encryption scheme: {0}")]
    UnknownScheme(String),
    #[error("Operation not supported on an archive entry stream: {0}")]
    UnsupportedOperation(&'static str),
}
