use actix_web::{test, web, App};
use auth_service::{configure, AppState, Pipeline, Settings};
use chrono::DateTime;

#[actix_web::test]
async fn test_health_check_does_not_warm_store() {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let state = AppState::new(config).expect("Failed to build state");
    let store = state.store.clone();

    let app = test::init_service(
        App::new()
            .wrap(Pipeline)
            .app_data(web::Data::new(state))
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "cold");
    assert!(DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    assert_eq!(store.connect_attempts(), 0);

    // Any other route warms the store first.
    let req = test::TestRequest::get().uri("/").to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::get().uri("/health").to_request();
    let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["store"], "warm");
    assert_eq!(store.connect_attempts(), 1);
}
