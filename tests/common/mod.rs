#![allow(dead_code)]

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

type Seen = Arc<Mutex<Vec<String>>>;

/// Account page double served by axum on `127.0.0.1:0`. Answers the given
/// `METHOD path` routes below `/api/` with canned JSON and records every
/// request it saw, matched or not.
pub struct AccountPageStub {
    pub url: String,
    requests: Seen,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _runtime: Runtime,
}

impl AccountPageStub {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for AccountPageStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn record(State(seen): State<Seen>, request: Request, next: Next) -> Response {
    let path = request.uri().path().trim_start_matches("/api/").to_string();
    seen.lock()
        .expect("requests lock")
        .push(format!("{} {path}", request.method()));
    next.run(request).await
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"detail":"not found"}"#,
    )
}

fn method_filter(method: &str) -> MethodFilter {
    match method {
        "GET" => MethodFilter::GET,
        "PATCH" => MethodFilter::PATCH,
        "POST" => MethodFilter::POST,
        other => panic!("unsupported stub method {other}"),
    }
}

fn router(routes: BTreeMap<String, String>, seen: Seen) -> Router {
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
    for (key, body) in routes {
        let (method, path) = key.split_once(' ').expect("route key is `METHOD path`");
        let answer = move || {
            let body = body.clone();
            async move { ([(header::CONTENT_TYPE, "application/json")], body) }
        };
        let entry = by_path.remove(path).unwrap_or_default();
        by_path.insert(path.to_string(), entry.on(method_filter(method), answer));
    }

    let app = by_path
        .into_iter()
        .fold(Router::new(), |app, (path, methods)| {
            app.route(&format!("/api/{path}"), methods)
        });
    app.fallback(not_found)
        .layer(middleware::from_fn_with_state(seen, record))
}

pub fn serve(routes: BTreeMap<String, String>) -> AccountPageStub {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("stub runtime");
    let requests: Seen = Arc::new(Mutex::new(Vec::new()));
    let app = router(routes, Arc::clone(&requests));

    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    runtime.spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    AccountPageStub {
        url: format!("http://{addr}/api/"),
        requests,
        shutdown_tx: Some(shutdown_tx),
        _runtime: runtime,
    }
}

pub fn route(method: &str, path: &str, body: &str) -> (String, String) {
    (format!("{method} {path}"), body.to_string())
}

pub fn account_json(vsc_id: &str, uid: u32, status: &str, isactive: bool) -> String {
    format!(
        r#"{{"vsc_id":"{vsc_id}","vsc_id_number":{uid},"status":"{status}","isactive":{isactive},"person":{{"gecos":null,"institute":{{"name":"gent"}},"institute_login":null}}}}"#
    )
}

pub fn group_json(vsc_id: &str, gid: u32) -> String {
    format!(r#"{{"vsc_id":"{vsc_id}","vsc_id_number":{gid},"members":[],"moderators":[]}}"#)
}

pub fn vo_json(vsc_id: &str, gid: u32, fairshare: u32, members: &[&str]) -> String {
    let members: Vec<String> = members.iter().map(|m| format!("\"{m}\"")).collect();
    format!(
        r#"{{"vsc_id":"{vsc_id}","vsc_id_number":{gid},"status":"active","institute":{{"name":"gent"}},"fairshare":{fairshare},"members":[{}],"moderators":[]}}"#,
        members.join(",")
    )
}

pub fn project_json(vsc_id: &str, gid: u32, submitter: &str) -> String {
    format!(
        r#"{{"vsc_id":"{vsc_id}","status":"active","institute":{{"name":"gent"}},"group":{},"submitter":"{submitter}","moderators":[]}}"#,
        group_json(vsc_id, gid)
    )
}

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/usr/bin/env bash\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }
}
