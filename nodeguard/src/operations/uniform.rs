//! Result normalization at the facade boundary.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

use crate::engine::EngineError;
use crate::envelope::{IntoEnvelope, ResultEnvelope};

/// Awaits an engine command and folds every outcome into an envelope.
///
/// Engine errors and panics inside the command future become
/// `Unexpected` envelopes carrying the error text as detail; they never
/// propagate to the caller.
pub async fn uniform_result<T, Fut>(operation: &str, command: Fut) -> ResultEnvelope
where
    Fut: Future<Output = Result<T, EngineError>>,
    T: IntoEnvelope,
{
    match AssertUnwindSafe(command).catch_unwind().await {
        Ok(Ok(value)) => value.into_envelope(),
        Ok(Err(err)) => {
            let message = format!("task operation error: {err}");
            error!(operation, error = %err, "engine command failed");
            ResultEnvelope::unexpected(message, err.message)
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            error!(operation, panic = %detail, "engine command panicked");
            ResultEnvelope::unexpected(format!("task operation error: {detail}"), detail)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineReply;
    use crate::envelope::ErrorKind;

    #[tokio::test]
    async fn test_accepted_reply_passes_through() {
        let env = uniform_result("skip", async { Ok::<_, EngineError>(EngineReply::accepted()) }).await;
        assert!(env.ok);
    }

    #[tokio::test]
    async fn test_rejected_reply_is_engine_failure() {
        let env = uniform_result("skip", async {
            Ok::<_, EngineError>(EngineReply::rejected("node not failed"))
        })
        .await;
        assert!(!env.ok);
        assert_eq!(env.error_kind, Some(ErrorKind::EngineCallFailure));
        assert_eq!(env.message, "node not failed");
    }

    #[tokio::test]
    async fn test_error_is_unexpected() {
        let env = uniform_result("retry", async {
            Err::<EngineReply, _>(EngineError::new("connection refused"))
        })
        .await;
        assert!(!env.ok);
        assert_eq!(env.error_kind, Some(ErrorKind::Unexpected));
        assert_eq!(env.error_detail.as_deref(), Some("connection refused"));
        assert!(env.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let env = uniform_result("retry", async {
            if true {
                panic!("engine exploded");
            }
            Ok::<EngineReply, EngineError>(EngineReply::accepted())
        })
        .await;
        assert!(!env.ok);
        assert_eq!(env.error_kind, Some(ErrorKind::Unexpected));
        assert_eq!(env.error_detail.as_deref(), Some("engine exploded"));
    }

    #[tokio::test]
    async fn test_mapping_output() {
        let env = uniform_result("states", async {
            Ok::<_, EngineError>(serde_json::json!({"state": "FINISHED"}))
        })
        .await;
        assert!(env.ok);
        assert_eq!(env.data, Some(serde_json::json!({"state": "FINISHED"})));
    }
}
