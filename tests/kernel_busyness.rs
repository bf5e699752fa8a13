// Kernel busyness collection against a backend whose kernel states change over time.
#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::Duration,
    };

    use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
    use sidecar_proxy::{
        HandlerContext, HandlerFactory, MetricsHandler, MetricsRegistry, SidecarServer,
        config::{LabelSet, LivenessConfig, SidecarConfig},
        core::handlers::JupyterKernelBusynessHandler,
        ports::metrics_handler::{JUPYTER_KERNEL_BUSYNESS, MetricName},
    };
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    const IDLE: u8 = 0;
    const BUSY: u8 = 1;
    const EMPTY: u8 = 2;
    const BROKEN: u8 = 3;
    const GARBAGE: u8 = 4;

    async fn kernels(State(mode): State<Arc<AtomicU8>>) -> impl IntoResponse {
        match mode.load(Ordering::SeqCst) {
            IDLE => (
                StatusCode::OK,
                r#"[{"id":"k1","name":"python3","execution_state":"idle","connections":1}]"#,
            ),
            BUSY => (
                StatusCode::OK,
                r#"[{"id":"k1","execution_state":"idle"},{"id":"k2","execution_state":"busy"}]"#,
            ),
            EMPTY => (StatusCode::OK, "[]"),
            BROKEN => (StatusCode::INTERNAL_SERVER_ERROR, "kernel manager unavailable"),
            _ => (StatusCode::OK, "<html>not json</html>"),
        }
    }

    async fn jupyter_backend(mode: Arc<AtomicU8>) -> SocketAddr {
        let app = Router::new()
            .route("/api/kernels", get(kernels))
            .with_state(mode);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn registered_handler(
        forward_addr: SocketAddr,
        registry: &MetricsRegistry,
    ) -> JupyterKernelBusynessHandler {
        let handler = JupyterKernelBusynessHandler::new(
            MetricName::from(JUPYTER_KERNEL_BUSYNESS),
            LabelSet::new("default-tenant", "jupyter", "jupyter-0"),
            &forward_addr.to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        handler.register_metrics(registry).unwrap();
        handler
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poll_follows_kernel_states() {
        let mode = Arc::new(AtomicU8::new(IDLE));
        let backend = jupyter_backend(mode.clone()).await;
        let registry = MetricsRegistry::new();
        let handler = registered_handler(backend, &registry);

        assert_eq!(handler.poll_once().await.unwrap(), 0.0);
        assert_eq!(handler.busyness(), Some(0.0));

        mode.store(BUSY, Ordering::SeqCst);
        assert_eq!(handler.poll_once().await.unwrap(), 1.0);
        assert_eq!(handler.busyness(), Some(1.0));

        mode.store(EMPTY, Ordering::SeqCst);
        assert_eq!(handler.poll_once().await.unwrap(), 0.0);
        assert_eq!(handler.busyness(), Some(0.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_poll_keeps_previous_value() {
        let mode = Arc::new(AtomicU8::new(BUSY));
        let backend = jupyter_backend(mode.clone()).await;
        let registry = MetricsRegistry::new();
        let handler = registered_handler(backend, &registry);

        handler.poll_once().await.unwrap();
        assert_eq!(handler.busyness(), Some(1.0));

        mode.store(BROKEN, Ordering::SeqCst);
        assert!(handler.poll_once().await.is_err());
        assert_eq!(handler.busyness(), Some(1.0));

        mode.store(GARBAGE, Ordering::SeqCst);
        assert!(handler.poll_once().await.is_err());
        assert_eq!(handler.busyness(), Some(1.0));

        mode.store(IDLE, Ordering::SeqCst);
        assert_eq!(handler.poll_once().await.unwrap(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_backend_keeps_initial_value() {
        let unused = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let registry = MetricsRegistry::new();
        let handler = registered_handler(unused, &registry);

        assert!(handler.poll_once().await.is_err());
        assert_eq!(handler.busyness(), Some(0.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gauge_exposed_by_running_sidecar() {
        let mode = Arc::new(AtomicU8::new(BUSY));
        let backend = jupyter_backend(mode.clone()).await;
        let marker_dir = TempDir::new().unwrap();
        let config = SidecarConfig {
            forward_addr: backend.to_string(),
            namespace: "default-tenant".to_string(),
            service_name: "jupyter".to_string(),
            instance_name: "jupyter-0".to_string(),
            metric_names: vec![JUPYTER_KERNEL_BUSYNESS.to_string()],
            kernel_poll_interval_secs: 1,
            liveness: LivenessConfig {
                marker_path: marker_dir.path().join("connection_alive"),
                interval_secs: 3600,
            },
            ..SidecarConfig::default()
        };
        let shutdown = CancellationToken::new();
        let server = SidecarServer::new(
            &config.metric_names,
            &HandlerFactory::with_defaults(),
            &HandlerContext::from_config(&config),
            shutdown.clone(),
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sidecar = listener.local_addr().unwrap();
        tokio::spawn(async move { server.run(listener).await.unwrap() });

        let expected = "jupyter_kernel_busyness{instance_name=\"jupyter-0\",namespace=\"default-tenant\",service_name=\"jupyter\"} 1";
        let client = reqwest::Client::new();
        let mut seen = false;
        for _ in 0..50 {
            let text = client
                .get(format!("http://{sidecar}/metrics"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            if text.contains(expected) {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(seen, "busy kernel never reported");

        shutdown.cancel();
    }
}
