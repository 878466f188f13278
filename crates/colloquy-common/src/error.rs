use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CommonError {
    #[error("{field} must be between {min} and {max}, got {got}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },

    #[error("Message content is required")]
    EmptyMessage,
}

pub type CommonResult<T> = std::result::Result<T, CommonError>;
