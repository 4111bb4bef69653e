//! The prelude is enough to build and exercise a router.

use keystone::prelude::*;

#[tokio::test]
async fn prelude_builds_a_working_app() {
    let mut app = App::new(KeystoneConfig::development()).unwrap();
    app.router_mut().get("/panic-free", |_req: Request| async {
        Err(StructuredError::system("database pool exhausted"))
    });

    let response = app
        .router()
        .dispatch(Request::new(Method::GET, "/panic-free"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = response.envelope().error.as_ref().unwrap();
    assert_eq!(error.message, "database pool exhausted");
    assert_eq!(app.aggregator().stats().total, 1);
}
