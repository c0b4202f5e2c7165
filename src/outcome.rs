use futures::Future;
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::util::dispatch_async_app_result;
use crate::{AppError, AppResult};

/// Discriminated result returned across the service boundary.
///
/// Serializes as `{"success": true, ...data}` or `{"error": "...", "code": "..."}`.
/// Object payloads are flattened into the envelope; anything else lands under `data`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(AppError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> AppResult<T> {
        match self {
            Outcome::Success(data) => Ok(data),
            Outcome::Failure(err) => Err(err),
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(err) => Some(err),
        }
    }
}

impl<T> From<AppResult<T>> for Outcome<T> {
    fn from(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => Outcome::Success(data),
            Err(err) => Outcome::Failure(err),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success(data) => {
                let value = serde_json::to_value(data).map_err(S::Error::custom)?;
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("success", &true)?;
                match value {
                    Value::Object(fields) => {
                        for (key, field) in fields.iter().filter(|(k, _)| k.as_str() != "success") {
                            map.serialize_entry(key, field)?;
                        }
                    }
                    Value::Null => {}
                    other => map.serialize_entry("data", &other)?,
                }
                map.end()
            }
            Outcome::Failure(err) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("error", err.message())?;
                map.serialize_entry("code", err.code())?;
                if err.is_retryable() {
                    map.serialize_entry("retryable", &true)?;
                }
                if let Some(crash_id) = err.context().get("crash_id") {
                    map.serialize_entry("crashId", crash_id)?;
                }
                map.end()
            }
        }
    }
}

/// Runs one boundary operation inside the panic fence and folds the result into an [`Outcome`].
pub async fn dispatch<T, F, Fut>(operation: &'static str, f: F) -> Outcome<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let result = dispatch_async_app_result(f).await;
    if let Err(err) = &result {
        tracing::info!(
            target: "couplefy",
            event = "operation_failed",
            operation,
            code = %err.code()
        );
    }
    Outcome::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Joined {
        group_id: String,
        group_name: String,
    }

    #[test]
    fn object_payloads_are_flattened() {
        let outcome = Outcome::Success(Joined {
            group_id: "g1".into(),
            group_name: "Home".into(),
        });
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": true, "groupId": "g1", "groupName": "Home"})
        );
    }

    #[test]
    fn unit_and_list_payloads() {
        assert_eq!(
            serde_json::to_value(Outcome::Success(())).unwrap(),
            json!({"success": true})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Success(vec![1, 2])).unwrap(),
            json!({"success": true, "data": [1, 2]})
        );
    }

    #[test]
    fn failures_carry_message_and_code_only() {
        let err = ErrorCode::Conflict
            .with_message("Category is in use")
            .with_context("db_code", "787");
        let value = serde_json::to_value(Outcome::<()>::Failure(err)).unwrap();
        assert_eq!(
            value,
            json!({"error": "Category is in use", "code": "RECORD/CONFLICT"})
        );
    }

    #[test]
    fn retryable_failures_are_flagged() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        let value = serde_json::to_value(Outcome::<()>::Failure(err)).unwrap();
        assert_eq!(value.get("retryable"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn dispatch_fences_panics() {
        let outcome: Outcome<()> = dispatch("test", || async {
            if std::hint::black_box(true) {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        let err = outcome.error().expect("failure");
        assert!(err.is(ErrorCode::OperationFailed));
    }
}
