use crate::RecorderError;
use crate::server::protocol::{Response, error_codes};
use serde::Serialize;

fn map_error_code(err: &RecorderError) -> i32 {
    match err {
        RecorderError::InvalidCommand(_) => error_codes::INVALID_PARAMS,
        RecorderError::ControllerGone => error_codes::RECORDER_UNAVAILABLE,
        RecorderError::Export(_) | RecorderError::IoError(_) => error_codes::EXPORT_FAILED,
        RecorderError::JsonError(_) => error_codes::INTERNAL_ERROR,
        _ => error_codes::BROWSER_ERROR,
    }
}

pub trait ToResponse {
    fn to_response(self, id: u64) -> Response;
}

impl<T: Serialize> ToResponse for crate::Result<T> {
    fn to_response(self, id: u64) -> Response {
        match self {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => Response::success(id, value),
                Err(e) => Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
            },
            Err(e) => Response::error(id, map_error_code(&e), e.to_string()),
        }
    }
}

macro_rules! req_bool {
    ($params:expr, $name:literal) => {
        $params
            .get($name)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| {
                $crate::RecorderError::InvalidCommand(format!(
                    "missing boolean parameter '{}'",
                    $name
                ))
            })
    };
}

pub(crate) use req_bool;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Ack {
        success: bool,
    }

    #[test]
    fn test_to_response_success() {
        let result: crate::Result<Ack> = Ok(Ack { success: true });
        let response = result.to_response(1);
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["success"], true);
    }

    #[test]
    fn test_to_response_error_codes() {
        let result: crate::Result<Ack> = Err(RecorderError::InvalidCommand("bad".into()));
        assert_eq!(
            result.to_response(1).error.unwrap().code,
            error_codes::INVALID_PARAMS
        );

        let result: crate::Result<Ack> = Err(RecorderError::ControllerGone);
        assert_eq!(
            result.to_response(2).error.unwrap().code,
            error_codes::RECORDER_UNAVAILABLE
        );
    }

    #[test]
    fn test_param_macros() {
        let params = json!({"enabled": false, "text": "yes"});
        assert!(!req_bool!(params, "enabled").unwrap());
        assert!(req_bool!(params, "text").is_err());
        assert!(req_bool!(params, "missing").is_err());
    }
}
