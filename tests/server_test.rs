//! Integration tests for the dashboard HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use chrono_tz::Tz;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use water_quality_dashboard::activity::{create_shared_log, SharedActivityLog};
    use water_quality_dashboard::fetcher::FetcherConfig;
    use water_quality_dashboard::server::{run, ServerConfig};
    use water_quality_dashboard::store::{
        create_shared_store, ReadingStore, RetentionPolicy, SharedStore,
    };
    use water_quality_dashboard::PipelineSettings;

    fn upstream_rows() -> serde_json::Value {
        serde_json::json!([
            {"_id": "r1", "timestamp": "2024-03-01T09:00:00Z", "pH": 7.0, "TDS": 100},
            {"_id": "r2", "timestamp": "2024-03-01T09:05:00Z", "pH": 7.2, "TDS": "110"},
            {"_id": "r3", "timestamp": "2024-03-01T09:15:00Z", "pH": 6.8, "Depth": 2.5}
        ])
    }

    /// Start a stub upstream API on a random port.
    async fn start_upstream(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind upstream");
        let addr = listener.local_addr().expect("No upstream address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    async fn healthy_upstream() -> SocketAddr {
        start_upstream(Router::new().route("/data", get(|| async { Json(upstream_rows()) }))).await
    }

    async fn failing_upstream() -> SocketAddr {
        start_upstream(Router::new().route(
            "/data",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        ))
        .await
    }

    async fn switchable_data(State(healthy): State<Arc<AtomicBool>>) -> Response {
        if healthy.load(Ordering::SeqCst) {
            Json(upstream_rows()).into_response()
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
        }
    }

    /// Upstream that serves readings until the flag is cleared.
    async fn switchable_upstream() -> (SocketAddr, Arc<AtomicBool>) {
        let healthy = Arc::new(AtomicBool::new(true));
        let router = Router::new()
            .route("/data", get(switchable_data))
            .with_state(healthy.clone());
        (start_upstream(router).await, healthy)
    }

    fn empty_store() -> SharedStore {
        create_shared_store(ReadingStore::new(RetentionPolicy::Unbounded, Tz::UTC))
    }

    async fn start_server(
        upstream: Option<SocketAddr>,
    ) -> (SocketAddr, tokio::sync::oneshot::Sender<()>, SharedActivityLog) {
        let mut config = ServerConfig::new(0, PipelineSettings::default());
        if let Some(upstream) = upstream {
            config = config.with_fetcher(FetcherConfig::new(
                format!("http://{}/data", upstream),
                Tz::UTC,
            ));
            config.fetch_on_request = true;
        }

        let activity = create_shared_log();
        let (addr, shutdown_tx) = run(config, empty_store(), activity.clone())
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        (addr, shutdown_tx, activity)
    }

    fn latest_value<'a>(view: &'a serde_json::Value, field: &str) -> &'a str {
        view["latest"]["values"]
            .as_array()
            .and_then(|values| values.iter().find(|v| v["field"] == field))
            .and_then(|v| v["value"].as_str())
            .expect("Missing latest value")
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _) = start_server(None).await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_pages_are_served() {
        let (addr, shutdown_tx, _) = start_server(None).await;

        let landing = reqwest::get(format!("http://{}/", addr))
            .await
            .expect("Failed to send request")
            .text()
            .await
            .expect("Failed to read body");
        assert!(landing.contains("/dashboard/"));

        // Without the trailing slash the page is reached through a redirect
        let page = reqwest::get(format!("http://{}/dashboard", addr))
            .await
            .expect("Failed to send request");
        assert!(page.status().is_success());
        let html = page.text().await.expect("Failed to read body");
        assert!(html.contains("Water Quality Monitoring Dashboard"));
        assert!(html.contains("uPlot"));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_options_endpoint() {
        let (addr, shutdown_tx, _) = start_server(None).await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/api/options", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["parameters"].as_array().map(|a| a.len()), Some(4));
        assert_eq!(body["parameters"][1]["key"], "TDS");
        assert_eq!(body["parameters"][1]["unit"], "ppm");
        assert_eq!(body["time_ranges"].as_array().map(|a| a.len()), Some(6));
        assert_eq!(body["aggregations"][2]["code"], "H");
        assert_eq!(body["defaults"]["range"], "6H");
        assert_eq!(body["defaults"]["aggregation"], "10T");
        assert_eq!(body["refresh_interval_ms"], 600_000);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_dashboard_from_upstream() {
        let upstream = healthy_upstream().await;
        let (addr, shutdown_tx, activity) = start_server(Some(upstream)).await;

        let view: serde_json::Value = reqwest::get(format!(
            "http://{}/api/dashboard?params=pH,Depth&range=1H&aggregation=10T",
            addr
        ))
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");

        assert_eq!(view["total_readings"], 3);

        let rows = view["table"]["rows"].as_array().expect("Missing rows");
        assert_eq!(rows.len(), 2);
        let ph = rows[0]["pH"].as_f64().expect("Missing pH mean");
        assert!((ph - 7.1).abs() < 1e-9);
        assert!((rows[0]["TDS"].as_f64().unwrap_or_default() - 105.0).abs() < 1e-9);

        let series = view["series"].as_array().expect("Missing series");
        assert_eq!(series.len(), 2);
        assert_eq!(series[1]["name"], "Water Level (m)");
        assert!(series[1]["points"][0]["y"].is_null());
        assert_eq!(series[1]["points"][1]["y"], 2.5);

        assert_eq!(latest_value(&view, "pH"), "6.80");
        assert_eq!(latest_value(&view, "TDS"), "--");

        assert!(activity.stats().fetches_succeeded >= 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_export_xlsx_download() {
        let upstream = healthy_upstream().await;
        let (addr, shutdown_tx, activity) = start_server(Some(upstream)).await;

        let response = reqwest::get(format!(
            "http://{}/api/export?range=1D&aggregation=30T&format=xlsx",
            addr
        ))
        .await
        .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("water_quality_data_"));
        assert!(disposition.contains(".xlsx"));

        let bytes = response.bytes().await.expect("Failed to read body");
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(activity.stats().exports_written, 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_export_csv_download() {
        let upstream = healthy_upstream().await;
        let (addr, shutdown_tx, _) = start_server(Some(upstream)).await;

        let body = reqwest::get(format!(
            "http://{}/api/export?range=1H&aggregation=H&format=csv",
            addr
        ))
        .await
        .expect("Failed to send request")
        .text()
        .await
        .expect("Failed to read body");

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "timestamp,pH,TDS,Depth,FlowInd");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2024-03-01 09:00:00,"));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_export_with_empty_store_is_no_content() {
        let (addr, shutdown_tx, activity) = start_server(None).await;

        let response = reqwest::get(format!("http://{}/api/export", addr))
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(activity.stats().exports_written, 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_failing_upstream_serves_empty_dashboard() {
        let upstream = failing_upstream().await;
        let (addr, shutdown_tx, _) = start_server(Some(upstream)).await;

        let view: serde_json::Value = reqwest::get(format!("http://{}/api/dashboard", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(view["total_readings"], 0);
        assert!(view["window"].is_null());
        assert_eq!(view["series"].as_array().map(|a| a.len()), Some(0));
        assert_eq!(view["table"]["columns"].as_array().map(|a| a.len()), Some(0));
        assert_eq!(latest_value(&view, "FlowInd"), "--");

        let status: serde_json::Value = reqwest::get(format!("http://{}/api/status", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(status["stored_readings"], 0);
        assert!(status["activity"]["fetches_failed"].as_u64().unwrap_or_default() >= 1);
        assert!(status["upstream"].as_str().unwrap_or_default().ends_with("/data"));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stored_readings() {
        let (upstream, healthy) = switchable_upstream().await;
        let (addr, shutdown_tx, activity) = start_server(Some(upstream)).await;
        let url = format!("http://{}/api/dashboard?params=pH&range=1H", addr);

        let before: serde_json::Value = reqwest::get(&url)
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(before["total_readings"], 3);
        assert_eq!(latest_value(&before, "pH"), "6.80");
        assert_eq!(activity.stats().fetches_failed, 0);

        healthy.store(false, Ordering::SeqCst);

        let response = reqwest::get(&url).await.expect("Failed to send request");
        assert!(response.status().is_success());
        let after: serde_json::Value = response.json().await.expect("Failed to parse JSON");

        assert_eq!(after["total_readings"], 3);
        assert_eq!(latest_value(&after, "pH"), "6.80");
        assert_eq!(latest_value(&after, "Depth"), "2.50");
        assert_eq!(after["table"], before["table"]);
        assert_eq!(after["window"], before["window"]);
        assert!(activity.stats().fetches_failed >= 1);
        assert!(activity.stats().fetches_succeeded >= 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx, _) = start_server(None).await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/api/dashboard", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
