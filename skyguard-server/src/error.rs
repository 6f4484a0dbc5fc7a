use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse JSON '{0}'")]
    ParseJson(String),
    #[error("Control loop is not running")]
    ControlLoopGone,
    #[error("Cannot listen for the detection unit on port {0}")]
    DetectionBind(u16, #[source] std::io::Error),
}

impl From<serde_json::Error> for StationError {
    fn from(e: serde_json::Error) -> Self {
        StationError::ParseJson(e.to_string())
    }
}
