//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hrms_core::{Error, Result, Transport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// In-memory backend: per-path JSON answers, optional latency, call log.
#[derive(Default)]
pub struct FakeBackend {
    routes: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, Error>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `path` with a successful envelope around `data`.
    pub fn ok(&self, path: &str, data: Value) {
        self.failures.lock().remove(path);
        self.routes
            .lock()
            .insert(path.to_string(), json!({"success": true, "data": data}));
    }

    /// Answer `path` with a raw body.
    pub fn raw(&self, path: &str, body: Value) {
        self.failures.lock().remove(path);
        self.routes.lock().insert(path.to_string(), body);
    }

    /// Fail `path` with `error`.
    pub fn fail(&self, path: &str, error: Error) {
        self.failures.lock().insert(path.to_string(), error);
    }

    /// Delay answers on `path`.
    pub fn slow(&self, path: &str, latency: Duration) {
        self.latency.lock().insert(path.to_string(), latency);
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|p| p.as_str() == path).count()
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }

    async fn answer(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        self.calls.lock().push(path.to_string());
        let latency = self.latency.lock().get(path).copied();
        if let Some(latency) = latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if let Some(error) = self.failures.lock().get(path).cloned() {
            return Err(error);
        }
        self.routes.lock().get(path).cloned().ok_or(Error::Transport {
            status: Some(404),
            message: format!("no route for {path}"),
        })
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        self.answer(path, cancel).await
    }

    async fn post(&self, path: &str, _body: Value, cancel: &CancellationToken) -> Result<Value> {
        self.answer(path, cancel).await
    }
}

/// The module list used across tests.
pub fn hr_modules() -> Value {
    json!([
        {"id": 1, "name": "employees", "display_name": "Employee List", "read_permission": "employee.read", "category": "HR", "parent_id": null},
        {"id": 2, "name": "employee_management", "display_name": "Employees", "read_permission": "employee.read", "category": "HR", "parent_id": null},
        {"id": 3, "name": "leave_requests", "display_name": "Leave Requests", "read_permission": "leave.read", "category": "Leave", "parent_id": null},
        {"id": 4, "name": "leave_types", "display_name": "Leave Types", "read_permission": "leave_type.read", "category": "Leave", "parent_id": null},
        {"id": 5, "name": "payroll", "display_name": "Payroll Runs", "read_permission": "payroll.read", "category": "Payroll", "parent_id": null}
    ])
}

/// Menu sections as the frontend config ships them.
pub fn hr_menu() -> Value {
    json!([
        {
            "title": "Main",
            "menus": [{"label": "Dashboard", "route": "/dashboard"}]
        },
        {
            "title": "People",
            "menus": [{
                "label": "Employees",
                "route": "/employees",
                "subMenus": [
                    {"label": "Employee List", "route": "/employees/list"},
                    {
                        "label": "Employee Reports",
                        "route": "/employees/reports",
                        "subMenusTwo": [{"label": "Headcount", "route": "/employees/reports/headcount"}]
                    }
                ]
            }]
        },
        {
            "title": "Time Off",
            "menus": [{
                "label": "Leave Management",
                "route": "",
                "subMenus": [
                    {"label": "Leave Requests", "route": "/leave/requests"},
                    {"label": "Leave Types", "route": "/leave/types"}
                ]
            }]
        },
        {
            "title": "Finance",
            "menus": [{"label": "Payroll Runs", "route": "/payroll"}]
        }
    ])
}
