//! Router dispatch through the configured global chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{HeaderValue, AUTHORIZATION};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use keystone_config::KeystoneConfig;
use keystone_core::{Principal, Request, Response, StructuredError};
use keystone_middleware::{AuthMiddleware, Authenticator, BoxFuture, BoxedMiddleware, FnMiddleware, RoleGuard};
use keystone_server::{session::logout_handler, App, Router};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorder(name: &'static str, log: &Log) -> BoxedMiddleware {
    let log = Arc::clone(log);
    Arc::new(FnMiddleware::new(name, move |req, next| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().unwrap().push(name);
            next.run(req).await
        })
    }))
}

async fn job(req: Request) -> Result<Response, StructuredError> {
    Ok(Response::ok(serde_json::json!({ "id": req.param("id") })))
}

struct Tokens;

impl Authenticator for Tokens {
    fn authenticate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, StructuredError>> {
        Box::pin(async move {
            match token {
                "instructor" => Ok(Principal::new("u-7", "i@example.com", "instructor")),
                "student" => Ok(Principal::new("u-8", "s@example.com", "student")),
                _ => Err(StructuredError::authentication("Invalid token")),
            }
        })
    }
}

fn with_token(request: Request, token: &str) -> Request {
    request.with_header(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

#[tokio::test]
async fn binds_params_and_rejects_partial_matches() {
    let app = {
        let mut app = App::new(KeystoneConfig::default()).unwrap();
        app.router_mut().get("/jobs/:id", job);
        app
    };

    let found = app.router().dispatch(Request::new(Method::GET, "/jobs/42")).await.unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    assert_eq!(found.envelope().data, Some(serde_json::json!({ "id": "42" })));

    let extra = app
        .router()
        .dispatch(Request::new(Method::GET, "/jobs/42/extra"))
        .await
        .unwrap();
    assert_eq!(extra.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unmatched_route_is_rendered_with_method_and_path() {
    let app = App::new(KeystoneConfig::default()).unwrap();
    let response = app
        .router()
        .dispatch(Request::new(Method::GET, "/does/not/exist"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = response.envelope().error.as_ref().unwrap();
    assert_eq!(error.code, "NOT_FOUND");
    assert!(error.message.contains("GET"));
    assert!(error.message.contains("/does/not/exist"));
    let meta = response.envelope().meta.as_ref().unwrap();
    assert!(meta.request_id.is_some());
}

#[tokio::test]
async fn global_middleware_runs_before_route_middleware() {
    let log: Log = Arc::default();
    let mut router = Router::new();
    router.use_shared(recorder("A", &log)).use_shared(recorder("B", &log));
    router.register(Method::GET, "/x", vec![recorder("C", &log)], |_req: Request| async {
        Ok(Response::ok(serde_json::Value::Null))
    });

    router.dispatch(Request::new(Method::GET, "/x")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), ["A", "B", "C"]);
}

#[tokio::test]
async fn registration_order_resolves_ambiguity() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let mut router = Router::new();
    router.get("/users/me", move |_req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::ok(serde_json::json!("me")))
        }
    });
    router.get("/users/:id", job);

    let me = router.dispatch(Request::new(Method::GET, "/users/me")).await.unwrap();
    assert_eq!(me.envelope().data, Some(serde_json::json!("me")));
    let other = router.dispatch(Request::new(Method::GET, "/users/u-3")).await.unwrap();
    assert_eq!(other.envelope().data, Some(serde_json::json!({ "id": "u-3" })));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn auth_and_role_guard_on_route() {
    let mut app = App::new(KeystoneConfig::default()).unwrap();
    let auth: BoxedMiddleware = Arc::new(AuthMiddleware::new(Arc::new(Tokens)));
    let instructors: BoxedMiddleware = Arc::new(RoleGuard::new(["instructor", "admin"]));
    app.router_mut().register(
        Method::POST,
        "/courses",
        vec![auth, instructors],
        |_req: Request| async { Ok(Response::created(serde_json::json!({ "id": "c-1" }))) },
    );

    let router = app.router();
    let anonymous = router.dispatch(Request::new(Method::POST, "/courses")).await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let student = router
        .dispatch(with_token(Request::new(Method::POST, "/courses"), "student"))
        .await
        .unwrap();
    assert_eq!(student.status(), StatusCode::FORBIDDEN);

    let instructor = router
        .dispatch(with_token(Request::new(Method::POST, "/courses"), "instructor"))
        .await
        .unwrap();
    assert_eq!(instructor.status(), StatusCode::CREATED);

    let stats = app.aggregator().stats();
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn handle_round_trips_wire_format() {
    let mut app = App::new(KeystoneConfig::default()).unwrap();
    app.router_mut().post("/auth/logout", logout_handler(Arc::new(Tokens)));

    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/auth/logout")
        .header("x-real-ip", "198.51.100.20")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = app.router().handle(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["message"], "Logged out successfully");
}

#[tokio::test]
async fn malformed_body_runs_through_global_chain() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut app = App::new(KeystoneConfig::default()).unwrap();
    let limit = app.login_limit();
    let counter = Arc::clone(&hits);
    app.router_mut().register(Method::POST, "/auth/login", vec![limit], move |_req: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Response::ok(serde_json::json!({ "token": "t" }))) }
    });

    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header("x-real-ip", "198.51.100.21")
        .body(Full::new(Bytes::from_static(b"{nope")))
        .unwrap();
    let response = app.router().handle(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(app.aggregator().stats().total, 1);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn failed_handler_keeps_rate_limit_headers() {
    let mut app = App::new(KeystoneConfig::default()).unwrap();
    app.router_mut().get("/jobs/:id", |req: Request| async move {
        let id = req.param("id").unwrap_or_default().to_string();
        Err::<Response, _>(StructuredError::not_found_resource("Job", id))
    });

    let response = app
        .router()
        .dispatch(Request::new(Method::GET, "/jobs/404").with_ip("198.51.100.22"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.header("x-ratelimit-limit").is_some());
    assert!(response.header("x-ratelimit-remaining").is_some());
    assert!(response.header("x-ratelimit-reset").is_some());
    assert!(response.header("x-request-id").is_some());
    assert_eq!(app.aggregator().stats().total, 1);
}

#[test]
fn routes_snapshot_lists_route_middleware() {
    let mut app = App::new(KeystoneConfig::default()).unwrap();
    let limit = app.login_limit();
    app.router_mut()
        .register(Method::POST, "/auth/login", vec![limit], job)
        .get("/jobs/:id", job);

    let routes = app.router().routes();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].pattern, "/auth/login");
    assert_eq!(routes[0].middleware_names, ["rate_limit"]);
    assert_eq!(routes[1].method, Method::GET);
}
