use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VIEW_LOGIN: &str = "auth.login";
pub const VIEW_REGISTER: &str = "auth.register";
pub const VIEW_FORGOT: &str = "auth.forgot";
pub const VIEW_DASHBOARD: &str = "dashboard.get";
pub const VIEW_RECORDS: &str = "records.list";
pub const VIEW_SECTIONS: &str = "records.sections";
pub const VIEW_USERS: &str = "users.list";
pub const VIEW_AUDIT: &str = "audit.list";
pub const VIEW_CONFIRM: &str = "confirm.view";
pub const VIEW_IMPORT: &str = "exchange.previewCsv";

/// Views that count as a "dashboard area" for the back button.
pub const AREA_VIEWS: &[&str] = &[
    VIEW_DASHBOARD,
    VIEW_RECORDS,
    VIEW_SECTIONS,
    VIEW_USERS,
    VIEW_AUDIT,
];

const NAV_HISTORY_LIMIT: usize = 20;

/// Where the UI should go next: a view (method name) plus the params to issue it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub view: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Destination {
    pub fn view(view: &str) -> Self {
        Self {
            view: view.to_string(),
            params: Value::Null,
        }
    }

    pub fn with_params(view: &str, params: Value) -> Self {
        Self {
            view: view.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NavHistory {
    entries: Vec<String>,
}

impl NavHistory {
    pub fn visit(&mut self, view: &str) {
        if self.entries.last().map(|v| v == view).unwrap_or(false) {
            return;
        }
        self.entries.push(view.to_string());
        if self.entries.len() > NAV_HISTORY_LIMIT {
            let overflow = self.entries.len() - NAV_HISTORY_LIMIT;
            self.entries.drain(..overflow);
        }
    }

    /// Drops the current area and returns the one before it, if any.
    pub fn back(&mut self) -> Option<String> {
        self.entries.pop();
        self.entries.last().cloned()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub fn is_area_view(method: &str) -> bool {
    AREA_VIEWS.contains(&method)
}
