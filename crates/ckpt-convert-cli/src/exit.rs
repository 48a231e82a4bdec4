// Exit codes for scripted callers
use ckpt_convert::{ConfigError, ConvertError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_LOAD_FAIL: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_TIMEOUT: i32 = 4;

/// Exit code for a failed command. Tool failures pass the tool's own code through.
pub fn code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<ConvertError>() {
            return match err {
                ConvertError::Load { .. } => EXIT_LOAD_FAIL,
                ConvertError::Config(_) => EXIT_CONFIG,
                ConvertError::Timeout { .. } => EXIT_TIMEOUT,
                ConvertError::ConversionTool { code, .. } => {
                    code.filter(|&c| c != 0).unwrap_or(EXIT_GENERIC_FAIL)
                }
                _ => EXIT_GENERIC_FAIL,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
    }
    EXIT_GENERIC_FAIL
}
