use std::{backtrace::Backtrace, fmt::Debug};

use tracing::{error, warn};

pub trait LogErrorExt<T> {
    /// Logs the error with a backtrace and discards it
    fn log_error(self, message: &str) -> Option<T>;
    /// Logs the error without a backtrace, for failures that are expected to happen
    fn log_warn(self, message: &str) -> Option<T>;
}

impl<T, E: Debug> LogErrorExt<T> for Result<T, E> {
    fn log_error(self, message: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                error!(
                    "{}: {:?}, Backtrace: {}",
                    message,
                    err,
                    Backtrace::force_capture()
                );
                None
            }
        }
    }

    fn log_warn(self, message: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("{}: {:?}", message, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LogErrorExt;

    #[test]
    fn passes_values_through() {
        let ok: Result<u32, &str> = Ok(7);
        assert_eq!(ok.log_error("unused"), Some(7));

        let err: Result<u32, &str> = Err("broken");
        assert_eq!(err.log_warn("expected failure"), None);
    }
}
