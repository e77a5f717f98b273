use mcp_resilience::{Config, HealthCheckConfig, HealthMonitor, HealthStatus};
use std::io::Write;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_check(name: &str, server: &MockServer) -> HealthCheckConfig {
    HealthCheckConfig::new(name)
        .with_endpoint(format!("{}/health", server.uri()))
        .with_timeout(Duration::from_millis(500))
        .with_thresholds(2, 3)
}

#[tokio::test]
async fn test_http_probe_healthy_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(2)
        .mount(&server)
        .await;

    let monitor = HealthMonitor::new();
    monitor.register_service(http_check("search", &server)).await.unwrap();

    let first = monitor.check_service("search").await.unwrap();
    let second = monitor.check_service("search").await.unwrap();
    assert!(first.is_success());
    assert_eq!(second.status, HealthStatus::Healthy);

    let metrics = monitor.get_service_health("search").await.unwrap();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.successful_requests, 2);
    assert!(metrics.last_health_check.is_some());
}

#[tokio::test]
async fn test_client_errors_count_as_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let monitor = HealthMonitor::new();
    monitor.register_service(http_check("docs", &server)).await.unwrap();

    let result = monitor.check_service("docs").await.unwrap();
    assert!(result.is_success(), "a 404 still proves the service answers");
}

#[tokio::test]
async fn test_server_errors_drive_unhealthy_then_recovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = HealthMonitor::new();
    monitor.register_service(http_check("news", &server)).await.unwrap();

    let statuses = [
        monitor.check_service("news").await.unwrap().status,
        monitor.check_service("news").await.unwrap().status,
        monitor.check_service("news").await.unwrap().status,
    ];
    assert_eq!(
        statuses,
        [HealthStatus::Degraded, HealthStatus::Degraded, HealthStatus::Unhealthy]
    );
    assert_eq!(monitor.get_system_health().await.status, HealthStatus::Unhealthy);

    assert_eq!(
        monitor.check_service("news").await.unwrap().status,
        HealthStatus::Unhealthy
    );
    assert_eq!(
        monitor.check_service("news").await.unwrap().status,
        HealthStatus::Healthy
    );

    let history = monitor.get_service_history("news").await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history.iter().filter(|r| !r.is_success()).count(), 3);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let monitor = HealthMonitor::new();
    monitor
        .register_service(http_check("slow", &server).with_timeout(Duration::from_millis(100)))
        .await
        .unwrap();

    let result = monitor.check_service("slow").await.unwrap();
    assert!(!result.is_success());
    assert!(result.error.unwrap().contains("timed out"));
    assert!(result.response_time < Duration::from_secs(1));
}

#[tokio::test]
async fn test_unreachable_endpoint_fails() {
    let monitor = HealthMonitor::new();
    monitor
        .register_service(
            HealthCheckConfig::new("offline")
                .with_endpoint("http://127.0.0.1:1/health")
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    let result = monitor.check_service("offline").await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_background_monitoring_probes_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = HealthMonitor::new();
    monitor
        .register_service(http_check("ticker", &server).with_interval(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(monitor.start_monitoring().await);
    tokio::time::sleep(Duration::from_millis(350)).await;
    monitor.stop_monitoring().await;

    let probed = server.received_requests().await.unwrap_or_default().len();
    assert!(probed >= 2, "expected repeated probes, saw {probed}");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let after_stop = server.received_requests().await.unwrap_or_default().len();
    assert_eq!(probed, after_stop);
}

#[tokio::test]
async fn test_services_registered_from_config_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[[health.services]]
service = "arxiv"
endpoint = "{uri}/arxiv"
interval_secs = 30
timeout_ms = 750

[[health.services]]
service = "crossref"
endpoint = "{uri}/crossref"
healthy_threshold = 1
"#,
        uri = server.uri()
    )
    .unwrap();

    let config = Config::load_with_env(Some(file.path()), Vec::new()).unwrap();
    assert_eq!(config.health.services.len(), 2);
    assert_eq!(config.health.services[0].timeout, Duration::from_millis(750));

    let monitor = HealthMonitor::new();
    for service in &config.health.services {
        monitor
            .register_service(HealthCheckConfig::from(service))
            .await
            .unwrap();
    }

    for service in ["arxiv", "crossref"] {
        assert!(monitor.check_service(service).await.unwrap().is_success());
    }
    let system = monitor.get_system_health().await;
    assert_eq!(system.total_services, 2);
    assert_eq!(system.status, HealthStatus::Healthy);
}
