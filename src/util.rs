use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::Future;
use futures::FutureExt;
use uuid::Uuid;

use crate::{AppError, AppResult, ErrorCode};

pub(crate) fn panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The panic message stays in the log; callers only see the crash id.
fn app_error_from_panic(payload: Box<dyn Any + Send>) -> AppError {
    let message = panic_payload(payload.as_ref());
    let crash_id = Uuid::now_v7().to_string();
    tracing::error!(
        target: "couplefy",
        event = "panic_caught",
        crash_id = %crash_id,
        panic = %message
    );
    ErrorCode::OperationFailed
        .into_error()
        .with_context("crash_id", crash_id)
}

#[allow(clippy::result_large_err)]
pub fn dispatch_with_fence<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}

#[allow(clippy::result_large_err)]
pub async fn dispatch_async_with_fence<F, Fut, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let fut = dispatch_with_fence(|| AssertUnwindSafe(f()).catch_unwind())?;
    match fut.await {
        Ok(value) => Ok(value),
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}

#[allow(clippy::result_large_err)]
pub async fn dispatch_async_app_result<F, Fut, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    dispatch_async_with_fence(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::panic_any;

    #[test]
    fn dispatch_with_fence_passes_through() {
        let value = dispatch_with_fence(|| 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn str_panic_becomes_operation_failed_with_crash_id() {
        let err = dispatch_with_fence(|| panic!("boom"))
            .err()
            .expect("should convert panic into error");
        assert!(err.is(ErrorCode::OperationFailed));
        assert!(!err.message().contains("boom"));
        assert!(err.context().contains_key("crash_id"));
    }

    #[test]
    fn non_string_payloads_are_described_generically() {
        assert_eq!(panic_payload(&123_i32), "unknown panic payload");
        assert_eq!(panic_payload(&String::from("kaboom")), "kaboom");
        let err = dispatch_with_fence(|| panic_any(123_i32)).expect_err("panic");
        assert!(err.is(ErrorCode::OperationFailed));
    }

    #[tokio::test]
    async fn async_panics_are_fenced() {
        let res: AppResult<i32> = dispatch_async_app_result(|| async {
            if std::hint::black_box(true) {
                panic!("async boom");
            }
            Ok(1)
        })
        .await;
        let err = res.expect_err("panic fenced");
        assert!(err.is(ErrorCode::OperationFailed));
    }

    #[tokio::test]
    async fn async_errors_pass_through_unchanged() {
        let res: AppResult<i32> =
            dispatch_async_app_result(|| async { Err(AppError::unauthorized()) }).await;
        assert!(res.expect_err("error").is(ErrorCode::Unauthorized));
    }
}
