use serde_json::json;

use crate::confirm::REDIRECT_SEE_OTHER;
use crate::nav::Destination;

pub const NOTICE_STORAGE_BUSY: &str = "storage_busy";
pub const NOTICE_DENIED: &str = "denied";
pub const NOTICE_LOGIN_REQUIRED: &str = "login_required";
pub const NOTICE_CONFIRMATION_EXPIRED: &str = "confirmation_expired";
pub const NOTICE_UNEXPECTED: &str = "unexpected";

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// A flash message shown on the page the UI is redirected to.
#[derive(Debug, Clone)]
pub struct Notice {
    pub message: String,
    pub code: Option<&'static str>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn coded(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

pub fn redirect_result(to: Destination, notice: Option<Notice>) -> serde_json::Value {
    let params = if to.params.is_null() {
        json!({})
    } else {
        to.params
    };
    let mut result = json!({
        "redirect": {
            "status": REDIRECT_SEE_OTHER,
            "view": to.view,
            "params": params,
        }
    });
    if let Some(n) = notice {
        result["notice"] = json!(n.message);
        if let Some(code) = n.code {
            result["noticeCode"] = json!(code);
        }
    }
    result
}

pub fn redirect(id: &str, to: Destination, notice: Option<Notice>) -> serde_json::Value {
    ok(id, redirect_result(to, notice))
}

pub fn validation_failed(id: &str, field: &str, message: impl Into<String>) -> serde_json::Value {
    err(
        id,
        "validation_failed",
        message,
        Some(json!({ "field": field })),
    )
}
