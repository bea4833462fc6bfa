use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HandlerError, JobHandler};

const DEFAULT_DURATION_SECS: f64 = 1.0;

/// Sleeps for `duration` seconds (default 1.0).
///
/// With a `fail_probability` between 0.0 and 1.0 the handler fails that fraction of the time. The
/// failure is decided before sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHandler;

impl SleepHandler {
    pub const JOB_TYPE: &'static str = "sleep";
}

fn number(payload: &Value, key: &str, default: f64) -> Result<f64, HandlerError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| HandlerError::InvalidPayload(format!("'{key}' must be a number"))),
    }
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, payload: Value) -> Result<Value, HandlerError> {
        let duration = number(&payload, "duration", DEFAULT_DURATION_SECS)?;
        let fail_probability = number(&payload, "fail_probability", 0.0)?;
        let sleep_for = Duration::try_from_secs_f64(duration).map_err(|_| {
            HandlerError::InvalidPayload(format!(
                "'duration' must be a non-negative number of seconds, got {duration}"
            ))
        })?;

        if rand::random::<f64>() < fail_probability {
            return Err(HandlerError::Failed(format!(
                "Simulated failure (fail_probability={fail_probability})"
            )));
        }

        tokio::time::sleep(sleep_for).await;
        Ok(json!({
            "slept_for": duration,
            "message": format!("Completed sleep of {duration}s"),
        }))
    }
}
