use thiserror::Error;

/// Error taxonomy for the core event/crypto/filter model.
///
/// Crypto and encoding errors propagate synchronously to the caller; there is
/// no equivalent of the relay's absorbed connection-error state here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NostrError {
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("malformed bech32 address: {0}")]
    MalformedAddress(String),

    #[error("EncryptedDirectMessage `id` is undefined until its message is encrypted and stored in the `content` field")]
    UndefinedId,

    #[error("cannot sign: EncryptedDirectMessage content is not encrypted yet")]
    NotEncrypted,

    #[error("must specify a recipient_pubkey")]
    MissingRecipient,

    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, NostrError>;
