//! Read-only status server
//!
//! JSON views over the pipeline tables plus `/metrics` and `/health`.
//! The only write is `POST /api/gateways/{id}/identify`, which publishes a
//! command to the gateway. Uses hyper for the HTTP server.

use crate::domain::event::format_epoch_ms;
use crate::domain::types::GatewayRecord;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::pipeline::Pipeline;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Default and maximum `limit` for `/api/events`
const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 100;

/// Everything the handlers read
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    pub site_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
}

#[derive(Serialize)]
struct GatewayView<'a> {
    #[serde(flatten)]
    record: &'a GatewayRecord,
    last_seen: String,
}

#[derive(Serialize)]
struct MqttStatus<'a> {
    connected: bool,
    host: &'a str,
    port: u16,
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "http_json_encode_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Parse `limit` from a query string, clamped to the event log capacity
fn event_limit(query: Option<&str>) -> usize {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("limit="))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT)
}

/// Gateway id from `/api/gateways/{id}/identify`
fn identify_target(path: &str) -> Option<&str> {
    let id = path.strip_prefix("/api/gateways/")?.strip_suffix("/identify")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

/// Route a request to its handler
fn route(
    method: &Method,
    path: &str,
    query: Option<&str>,
    state: &ApiState,
) -> Response<Full<Bytes>> {
    let pipeline = &state.pipeline;

    match (method, path) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(
                pipeline.metrics(),
                pipeline.active_sensor_count(),
                pipeline.known_sensor_count(),
                pipeline.bus_connected(),
                &state.site_id,
            );
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/api/events") => {
            json_response(StatusCode::OK, &pipeline.recent_events(event_limit(query)))
        }
        (&Method::GET, "/api/sensors") => json_response(StatusCode::OK, &pipeline.sensor_states()),
        (&Method::GET, "/api/unmapped") => {
            json_response(StatusCode::OK, &pipeline.unmapped_devices())
        }
        (&Method::GET, "/api/gateways") => {
            let gateways = pipeline.gateways();
            let views: Vec<GatewayView> = gateways
                .iter()
                .map(|record| GatewayView {
                    record,
                    last_seen: format_epoch_ms(record.last_seen_at),
                })
                .collect();
            json_response(StatusCode::OK, &views)
        }
        (&Method::GET, "/api/products") => json_response(StatusCode::OK, &pipeline.products()),
        (&Method::GET, "/api/mqtt/status") => json_response(
            StatusCode::OK,
            &MqttStatus {
                connected: pipeline.bus_connected(),
                host: &state.mqtt_host,
                port: state.mqtt_port,
            },
        ),
        (&Method::POST, _) => match identify_target(path) {
            Some(gateway_id) if pipeline.identify_gateway(gateway_id) => json_response(
                StatusCode::OK,
                &serde_json::json!({ "status": "ok", "gateway_id": gateway_id }),
            ),
            Some(gateway_id) if !pipeline.bus_connected() => {
                warn!(gateway = %gateway_id, "gateway_identify_unavailable");
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &serde_json::json!({ "status": "error", "error": "mqtt_disconnected" }),
                )
            }
            Some(gateway_id) => {
                warn!(gateway = %gateway_id, "gateway_identify_rejected");
                json_response(
                    StatusCode::BAD_GATEWAY,
                    &serde_json::json!({ "status": "error", "error": "publish_failed" }),
                )
            }
            None => text_response(StatusCode::NOT_FOUND, "Not Found"),
        },
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), req.uri().query(), &state))
}

/// Start the status HTTP server
pub async fn start_status_server(
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "status_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DeviceId, GatewayUpdate, Product};
    use crate::infra::config::RuntimeSettings;
    use crate::infra::metrics::Metrics;
    use crate::services::catalog::Catalog;
    use crate::services::gateway_registry::GatewayRegistry;
    use crate::services::publisher::{BusPublisher, DisconnectedPublisher};
    use http_body_util::BodyExt;
    use std::time::Duration;

    struct AlwaysConnected;

    impl BusPublisher for AlwaysConnected {
        fn publish(&self, _topic: &str, _payload: Vec<u8>) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Connected, but the client refuses every publish
    struct RejectingPublisher;

    impl BusPublisher for RejectingPublisher {
        fn publish(&self, _topic: &str, _payload: Vec<u8>) -> bool {
            false
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn state_with(publisher: Arc<dyn BusPublisher>) -> ApiState {
        let gateways = Arc::new(GatewayRegistry::in_memory());
        let update = GatewayUpdate { ip: Some("10.0.0.5".into()), ..Default::default() };
        gateways.upsert("gw1", &update, 0);
        let pipeline = Pipeline::new(
            Arc::new(Catalog::new()),
            gateways,
            Arc::new(RuntimeSettings::new(Duration::from_secs(2), Duration::from_secs(5))),
            publisher,
            Arc::new(Metrics::new()),
        );
        ApiState {
            pipeline: Arc::new(pipeline),
            site_id: "store1".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
        }
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str, query: Option<&str>, state: &ApiState) -> Response<Full<Bytes>> {
        route(&Method::GET, path, query, state)
    }

    #[test]
    fn test_event_limit() {
        assert_eq!(event_limit(None), 50);
        assert_eq!(event_limit(Some("limit=10")), 10);
        assert_eq!(event_limit(Some("x=1&limit=500")), 100);
        assert_eq!(event_limit(Some("limit=abc")), 50);
    }

    #[test]
    fn test_identify_target() {
        assert_eq!(identify_target("/api/gateways/gw1/identify"), Some("gw1"));
        assert_eq!(identify_target("/api/gateways//identify"), None);
        assert_eq!(identify_target("/api/gateways/a/b/identify"), None);
        assert_eq!(identify_target("/api/gateways/gw1"), None);
    }

    #[tokio::test]
    async fn test_events_newest_first_with_limit() {
        let state = state_with(Arc::new(DisconnectedPublisher));
        state.pipeline.catalog().upsert(Product {
            mac: DeviceId::parse("aa").unwrap(),
            sku: "SKU-1".to_string(),
            name: "Mug".to_string(),
            video: "mug.mp4".to_string(),
            screen: "s1".to_string(),
            timeout_override: None,
            dedup_override: None,
        });
        state.pipeline.handle_message("bthome/aa/state", br#"{"motion":true}"#, 10_000);

        let response = get("/api/events", Some("limit=1"), &state);
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["type"], "play");
        assert_eq!(json[0]["mac"], "aa");
    }

    #[tokio::test]
    async fn test_sensors_and_unmapped() {
        let state = state_with(Arc::new(DisconnectedPublisher));
        state.pipeline.handle_message("bthome/bb/state", br#"{"motion":false}"#, 10_000);

        let json = body_json(get("/api/sensors", None, &state)).await;
        assert_eq!(json[0]["mac"], "bb");
        assert_eq!(json[0]["active"], false);
        assert!(json[0]["product"].is_null());

        let json = body_json(get("/api/unmapped", None, &state)).await;
        assert_eq!(json, serde_json::json!(["bb"]));
    }

    #[tokio::test]
    async fn test_gateways_and_status() {
        let state = state_with(Arc::new(DisconnectedPublisher));

        let json = body_json(get("/api/gateways", None, &state)).await;
        assert_eq!(json[0]["gateway_id"], "gw1");
        assert_eq!(json[0]["ip"], "10.0.0.5");
        assert_eq!(json[0]["last_seen"], "1970-01-01T00:00:00Z");

        let json = body_json(get("/api/mqtt/status", None, &state)).await;
        assert_eq!(json["connected"], false);
        assert_eq!(json["port"], 1883);
    }

    #[test]
    fn test_identify_requires_connection() {
        let state = state_with(Arc::new(DisconnectedPublisher));
        let response = route(&Method::POST, "/api/gateways/gw1/identify", None, &state);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let state = state_with(Arc::new(AlwaysConnected));
        let response = route(&Method::POST, "/api/gateways/gw1/identify", None, &state);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_identify_rejected_while_connected() {
        let state = state_with(Arc::new(RejectingPublisher));
        let response = route(&Method::POST, "/api/gateways/gw+1/identify", None, &state);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"], "publish_failed");
    }

    #[test]
    fn test_health_metrics_and_not_found() {
        let state = state_with(Arc::new(DisconnectedPublisher));
        assert_eq!(get("/health", None, &state).status(), StatusCode::OK);
        assert_eq!(get("/metrics", None, &state).status(), StatusCode::OK);
        assert_eq!(get("/nope", None, &state).status(), StatusCode::NOT_FOUND);
        let response = route(&Method::POST, "/api/events", None, &state);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
