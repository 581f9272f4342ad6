use thiserror::Error;

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("publish rejected: {0}")]
    PublishRejected(String),
    #[error("broker did not acknowledge publish within timeout")]
    AckTimeout,
    #[error("no response within timeout")]
    ResponseTimeout,
    #[error("connection lost while waiting for response")]
    ConnectionLost,
    #[error("TLS setup failed: {0}")]
    TlsSetupFailed(String),
}

/// Errors raised by the Modbus-RTU protocol codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated { expected: usize, actual: usize },
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("unsupported function code {0:#04x}")]
    UnsupportedFunctionCode(u8),
    #[error("byte count mismatch: header says {header}, data has {actual}")]
    ByteCountMismatch { header: usize, actual: usize },
    #[error("modbus exception: {message} (code {code:#04x})")]
    ModbusException { code: u8, message: String },
    #[error("malformed error frame")]
    MalformedErrorFrame,
}

/// Errors raised by schema registration and block parsing.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("schema not registered for block {block_id}")]
    SchemaNotRegistered { block_id: u32 },
    #[error("schema conflict at block {block_id}: {reason}")]
    SchemaConflict { block_id: u32, reason: String },
    #[error("strict validation failed for block {block_id}: {errors:?}")]
    StrictValidationFailed { block_id: u32, errors: Vec<String> },
    #[error("required field '{field}' failed to parse at offset {offset}: {reason}")]
    RequiredFieldFailed {
        field: String,
        offset: usize,
        reason: String,
    },
    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),
}

/// Errors raised by the device model, profile resolution, and registries.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown group '{0}' for this device profile")]
    UnknownGroup(String),
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("unknown transport '{key}'. available transports: {available}")]
    UnknownTransport { key: String, available: String },
    #[error("unknown protocol '{key}'. available: {available}")]
    UnknownProtocol { key: String, available: String },
    #[error("invalid transport options: {0}")]
    InvalidTransportOptions(String),
}

/// Top-level error type returned from public SDK operations.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl SdkError {
    /// True if this error is the kind the retry policy should retry on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SdkError::Transport(_))
    }
}
