use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backlight driver error: {0}")]
    Backlight(String),
    #[error("idle timer error: {0}")]
    Timer(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
