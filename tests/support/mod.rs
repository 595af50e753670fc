// ABOUTME: Test support utilities.
// ABOUTME: Provides tracing setup, a recording dialer, and the SSH container helper.

use async_trait::async_trait;
use sshdial::error::{Error, Result};
use sshdial::transport::{BoxedStream, Dialer, Target, TransportPath};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

// Each test binary only uses some of these modules, so allow dead_code.
#[allow(dead_code)]
pub mod ssh_container;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("sshdial=debug".parse().unwrap())
            .add_directive("russh=info".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// One recorded dial attempt.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub struct DialAttempt {
    pub path: TransportPath,
    pub target: Target,
    pub timeout: Duration,
}

/// Dialer that records every attempt and then refuses the connection.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct RecordingDialer {
    attempts: Arc<Mutex<Vec<DialAttempt>>>,
}

#[allow(dead_code)]
impl RecordingDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<DialAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(
        &self,
        path: &TransportPath,
        target: &Target,
        timeout: Duration,
    ) -> Result<BoxedStream> {
        self.attempts.lock().unwrap().push(DialAttempt {
            path: path.clone(),
            target: target.clone(),
            timeout,
        });
        Err(Error::DialFailed {
            address: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "recorded"),
        })
    }
}
