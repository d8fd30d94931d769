pub use anyhow::*;
use thiserror::*;

#[derive(Error, Debug)]
pub enum VesperError {
    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Notify Error: {0}")]
    NotifyError(#[from] notify::Error),

    #[error("Build error: {0}")]
    Build(#[from] anyhow::Error),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Server is closed")]
    ServerClosed,
}

pub type VesperResult<T = ()> = Result<T, VesperError>;

impl VesperError {
    pub fn response(&self) -> axum::http::Response<String> {
        use axum::http::{Response, StatusCode};

        let (message, code) = match self {
            VesperError::IoError(e) => (e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
            VesperError::FileNotFound(file) => {
                (format!("File not found: {}", file), StatusCode::NOT_FOUND)
            }
            VesperError::ServerClosed => {
                ("Server is closed".to_string(), StatusCode::SERVICE_UNAVAILABLE)
            }
            _ => (self.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        };

        Response::builder()
            .status(code)
            .body(message)
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body("Internal Server Error".to_string())
                    .unwrap()
            })
    }
}
