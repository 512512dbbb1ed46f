use thiserror::Error;

use tunnistamo_core::config::ConfigError;
use tunnistamo_core::signin::SignInError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),

    #[error("Config: {}", .0)]
    Config(#[from] ConfigError),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error("SignIn: {}", .0)]
    SignIn(#[from] SignInError),
}
