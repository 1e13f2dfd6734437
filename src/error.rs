use thiserror::Error;

/// Failures reported by a [`Device`](crate::device::Device) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device is out of memory")]
    OutOfMemory,
    #[error("Device was lost")]
    DeviceLost,
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Device error: {0}")]
    Other(String),
}

/// Errors that abort the execution of a frame.
///
/// Misuse of the builder is not reported through this type, it panics while validation is enabled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Transient heap exhausted: {requested} bytes requested with a limit of {limit} bytes")]
    TransientHeapExhausted { requested: u64, limit: u64 },
    #[error("Resource pool could not provide '{name}'")]
    PoolExhausted { name: String },
    #[error("Failed to build the recording thread pool: {0}")]
    ThreadPool(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

#[test]
fn test_error_display() {
    let err = GraphError::from(DeviceError::OutOfMemory);
    assert_eq!(err.to_string(), "Device is out of memory");

    let err = GraphError::TransientHeapExhausted {
        requested: 512,
        limit: 256,
    };
    assert!(err.to_string().contains("512 bytes requested"));
}
