//! Request spans tagged with the service name

use axum::{body::Body, http::Request};
use std::sync::Arc;
use tracing::{info_span, Span};

/// Span factory for `TraceLayer::make_span_with`
pub fn request_span(service: &str) -> impl Fn(&Request<Body>) -> Span + Clone {
    let service: Arc<str> = Arc::from(service);
    move |request: &Request<Body>| {
        info_span!(
            "request",
            service = %service,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_span_carries_service_name() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let make_span = request_span("yamdb-test");
        let request = Request::builder().uri("/api/v1/titles/").body(Body::empty()).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let span = make_span(&request);
            let _entered = span.enter();
            tracing::info!("handled");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("service=yamdb-test"), "{output}");
        assert!(output.contains("uri=/api/v1/titles/"), "{output}");
    }
}
