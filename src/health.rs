//! Post-deployment health gate.
//!
//! A smoke-test suite is an ordered battery of readiness probes run
//! after the executor reports success. Port and HTTP probes poll with a
//! bounded attempt budget spaced one second apart, tolerating service
//! warm-up; custom probes run once over the remote shell. Every probe
//! runs even after an earlier failure so the full report is produced.

use crate::remote::RemoteShell;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default per-probe attempt budget (attempts x 1 second spacing).
pub const DEFAULT_ATTEMPTS: u32 = 30;

/// Connect/request budget for a single probe attempt.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for a one-shot custom remote command.
const CUSTOM_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Spacing between poll attempts.
const POLL_SPACING: Duration = Duration::from_secs(1);

/// Low-level readiness probes against one host.
pub struct HealthCheck {
    host: String,
    attempts: u32,
    http: reqwest::Client,
}

impl HealthCheck {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            attempts: DEFAULT_ATTEMPTS,
            http: reqwest::Client::new(),
        }
    }

    /// Override the polling attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// One TCP connect attempt against `host:port`.
    pub async fn check_port(&self, port: u16) -> bool {
        let addr = format!("{}:{}", self.host, port);
        match tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "port check failed");
                false
            }
            Err(_) => {
                warn!(addr = %addr, "port check timed out");
                false
            }
        }
    }

    /// One HTTP GET expecting exactly `expected_status`.
    pub async fn check_http(&self, url: &str, expected_status: u16) -> bool {
        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().as_u16() == expected_status,
            Err(e) => {
                warn!(url, error = %e, "http check failed");
                false
            }
        }
    }

    /// Poll until `host:port` accepts a connection or the budget runs out.
    pub async fn wait_for_port(&self, port: u16) -> bool {
        info!(host = %self.host, port, "waiting for port");

        for attempt in 0..self.attempts {
            if self.check_port(port).await {
                info!(port, "port is available");
                return true;
            }
            if attempt + 1 < self.attempts {
                tokio::time::sleep(POLL_SPACING).await;
            }
        }

        error!(port, attempts = self.attempts, "port did not become available");
        false
    }

    /// Poll until `url` returns `expected_status` or the budget runs out.
    pub async fn wait_for_http(&self, url: &str, expected_status: u16) -> bool {
        info!(url, expected_status, "waiting for http endpoint");

        for attempt in 0..self.attempts {
            if self.check_http(url, expected_status).await {
                info!(url, "endpoint is responding");
                return true;
            }
            if attempt + 1 < self.attempts {
                tokio::time::sleep(POLL_SPACING).await;
            }
        }

        error!(url, attempts = self.attempts, "endpoint did not respond correctly");
        false
    }

    /// Run a custom check command on the host, once.
    pub async fn run_custom(
        &self,
        command: &str,
        user: Option<&str>,
        shell: &dyn RemoteShell,
    ) -> bool {
        match shell
            .run(&self.host, user, command, CUSTOM_CHECK_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => {
                info!(command, "custom check passed");
                true
            }
            Ok(output) => {
                error!(
                    command,
                    exit = output.exit_code,
                    stdout = %output.stdout,
                    stderr = %output.stderr,
                    "custom check failed"
                );
                false
            }
            Err(e) => {
                error!(command, error = %e, "custom check errored");
                false
            }
        }
    }
}

/// One smoke test descriptor. Order of addition is order of execution.
#[derive(Debug, Clone)]
pub enum SmokeTest {
    Port {
        port: u16,
        name: String,
    },
    Http {
        url: String,
        expected_status: u16,
        name: String,
    },
    Custom {
        command: String,
        name: String,
    },
}

impl SmokeTest {
    pub fn name(&self) -> &str {
        match self {
            SmokeTest::Port { name, .. } => name,
            SmokeTest::Http { name, .. } => name,
            SmokeTest::Custom { name, .. } => name,
        }
    }
}

/// Ordered battery of smoke tests against one host.
pub struct SmokeTestSuite {
    check: HealthCheck,
    user: Option<String>,
    tests: Vec<SmokeTest>,
}

impl SmokeTestSuite {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            check: HealthCheck::new(host),
            user: None,
            tests: Vec::new(),
        }
    }

    /// User for custom checks run over the remote shell.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Override the polling attempt budget for port/http probes.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.check = self.check.with_attempts(attempts);
        self
    }

    pub fn add_port_check(&mut self, port: u16) {
        self.tests.push(SmokeTest::Port {
            port,
            name: format!("Port {port}"),
        });
    }

    pub fn add_http_check(&mut self, url: impl Into<String>, expected_status: u16) {
        let url = url.into();
        self.tests.push(SmokeTest::Http {
            name: format!("HTTP {url}"),
            url,
            expected_status,
        });
    }

    pub fn add_custom_check(&mut self, command: impl Into<String>, name: impl Into<String>) {
        self.tests.push(SmokeTest::Custom {
            command: command.into(),
            name: name.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Run every test in order and return the conjunction.
    ///
    /// No short-circuit: later tests run even after a failure. An empty
    /// suite trivially passes.
    pub async fn run_all(&self, shell: &dyn RemoteShell) -> bool {
        if self.tests.is_empty() {
            info!("no smoke tests configured");
            return true;
        }

        info!(count = self.tests.len(), "running smoke tests");

        let mut passed = 0usize;
        let mut failed = 0usize;

        for test in &self.tests {
            let result = match test {
                SmokeTest::Port { port, .. } => self.check.wait_for_port(*port).await,
                SmokeTest::Http {
                    url,
                    expected_status,
                    ..
                } => self.check.wait_for_http(url, *expected_status).await,
                SmokeTest::Custom { command, .. } => {
                    self.check
                        .run_custom(command, self.user.as_deref(), shell)
                        .await
                }
            };

            if result {
                info!(test = test.name(), "smoke test passed");
                passed += 1;
            } else {
                error!(test = test.name(), "smoke test failed");
                failed += 1;
            }
        }

        info!(passed, failed, "smoke test results");
        failed == 0
    }
}
