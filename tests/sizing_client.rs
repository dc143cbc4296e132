#![cfg(feature = "sizing")]

use mockito::{Matcher, Server};
use pipeliner::sizing::{SIZING_PATH, SizingProfile, fetch_recommendations};

const BODY: &str = r#"{"controllers":[{"name":"billing-web","containers":{"web":{"requests":{"cpu":0.25,"ram":0.5}}}}]}"#;

#[test]
fn fetches_every_profile() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", SIZING_PATH)
        .match_query(Matcher::UrlEncoded("window".into(), "14d".into()))
        .with_status(200)
        .with_body(BODY)
        .expect(3)
        .create();

    let profiles = SizingProfile::standard();
    let recommendations = fetch_recommendations(&server.url(), &profiles, "14d").unwrap();

    mock.assert();
    for profile in ["development", "production", "high-availability"] {
        let web = &recommendations.lookup(profile, "billing-web").unwrap()["web"];
        assert_eq!(web.cpu_quantity().unwrap().as_str(), "250m");
        assert_eq!(web.ram_quantity().unwrap().as_str(), "512Mi");
    }
}

#[test]
fn percentile_is_sent_per_profile() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", SIZING_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("p".into(), "0.980000".into()),
            Matcher::UrlEncoded("targetCPUUtilization".into(), "0.650000".into()),
        ]))
        .with_status(200)
        .with_body("{}")
        .create();

    let production = vec![SizingProfile::new("production", 0.98, 0.65, 0.65)];
    let recommendations = fetch_recommendations(&server.url(), &production, "7d").unwrap();

    mock.assert();
    assert!(recommendations.profile("production").unwrap().is_empty());
}

#[test]
fn rejected_requests_are_retried_then_fail() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", SIZING_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(3)
        .create();

    let profiles = vec![SizingProfile::new("production", 0.98, 0.65, 0.65)];
    let err = fetch_recommendations(&server.url(), &profiles, "7d").unwrap_err();

    mock.assert();
    let message = format!("{err:#}");
    assert!(message.contains("profile 'production'"), "{message}");
    assert!(message.contains("500"), "{message}");
}
