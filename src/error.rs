use thiserror::Error;

/// Tagged error kinds propagated through the core pipeline.
///
/// C5/C6/C7 return these to the Intent Router (C8), which surfaces them in
/// the unified result with `success=false` and a bilingual catalog message.
/// LLM failures are never fatal to a request that has a rule-based path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("missing or empty query")]
    BadRequest,

    #[error("semantic validation failed: {0}")]
    ValidationError(String),

    #[error("could not resolve sensor entity: {0}")]
    MappingError(String),

    #[error("store execution failed: {0}")]
    ExecutionError(String),

    #[error("no data available after fallback")]
    EmptyResult,

    #[error("llm endpoint unavailable: {0}")]
    LLMUnavailable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable tag surfaced in `validation.error_details.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::BadRequest => "BadRequest",
            CoreError::ValidationError(_) => "ValidationError",
            CoreError::MappingError(_) => "MappingError",
            CoreError::ExecutionError(_) => "ExecutionError",
            CoreError::EmptyResult => "EmptyResult",
            CoreError::LLMUnavailable(_) => "LLMUnavailable",
            CoreError::Timeout => "Timeout",
            CoreError::Cancelled => "Cancelled",
            CoreError::Internal(_) => "Internal",
        }
    }

    /// Bilingual catalog message shown to the user. English/Persian pair.
    pub fn bilingual_summary(&self, sensor_hint: Option<&str>, window_hint: Option<&str>) -> (String, String) {
        match self {
            CoreError::EmptyResult => {
                let sensor = sensor_hint.unwrap_or("the requested sensor");
                let window = window_hint.unwrap_or("the requested time window");
                (
                    format!(
                        "No data is available for {sensor} in {window}. Check that the sensor is reporting and that the time window overlaps ingested data."
                    ),
                    format!(
                        "داده‌ای برای {sensor} در {window} موجود نیست. بررسی کنید سنسور داده ارسال می‌کند و بازه زمانی با داده‌های ثبت‌شده هم‌پوشانی دارد."
                    ),
                )
            }
            CoreError::ValidationError(msg) => (
                format!("Your request could not be understood or executed safely: {msg}"),
                format!("درخواست شما قابل فهم یا اجرای امن نبود: {msg}"),
            ),
            CoreError::MappingError(msg) => (
                format!("Could not match your question to a known sensor: {msg}"),
                format!("سوال شما به سنسور شناخته‌شده‌ای تطبیق نیافت: {msg}"),
            ),
            CoreError::BadRequest => (
                "Please provide a question.".to_string(),
                "لطفاً یک سوال وارد کنید.".to_string(),
            ),
            CoreError::ExecutionError(msg) => (
                format!("The data store could not execute this request: {msg}"),
                format!("امکان اجرای این درخواست روی پایگاه داده نبود: {msg}"),
            ),
            CoreError::LLMUnavailable(_) => (
                "The language model is unavailable; a rule-based answer was not possible either.".to_string(),
                "مدل زبانی در دسترس نیست و پاسخ مبتنی بر قواعد نیز ممکن نشد.".to_string(),
            ),
            CoreError::Timeout => (
                "The request timed out.".to_string(),
                "درخواست با وقفه زمانی مواجه شد.".to_string(),
            ),
            CoreError::Cancelled => (
                "The request was cancelled.".to_string(),
                "درخواست لغو شد.".to_string(),
            ),
            CoreError::Internal(msg) => (
                format!("Internal error: {msg}"),
                format!("خطای داخلی: {msg}"),
            ),
        }
    }
}
