//! Shared harness: the mock server on a random local port.

use std::time::Duration;

use finance_client::ClientDefaults;
use mock_server::AppState;
use tokio::net::TcpListener;

/// Start the mock server and return its base URL.
pub async fn spawn_server(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run_with_state(listener, state));
    format!("http://{addr}")
}

/// Defaults with short retry delays so failure paths finish quickly.
#[allow(dead_code)]
pub fn fast_defaults() -> ClientDefaults {
    ClientDefaults::default()
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5))
}
