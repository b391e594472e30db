use std::sync::LazyLock;
use std::time::Duration;

/// `User-Agent` sent with every outbound request
pub fn user_agent() -> String {
    format!("mfw-queue/{}", crate::pkg_version())
}

/// Process-wide HTTP client
///
/// Built lazily on first use and shared by every executor and notification
/// sink so connections are pooled across jobs. Per-request timeouts are set
/// by the caller; the client-level timeout is only an upper bound.
///
/// ```ignore
/// use crate::external::HTTP_CLIENT;
///
/// let response = HTTP_CLIENT
///     .post("http://localhost:9000/content")
///     .json(&payload)
///     .timeout(Duration::from_secs(60))
///     .send()
///     .await?;
/// ```
pub static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        // Timeouts
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(10))
        // Connection pooling
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        // HTTP/2 settings
        .http2_adaptive_window(true)
        .http2_keep_alive_interval(Duration::from_secs(10))
        .http2_keep_alive_timeout(Duration::from_secs(20))
        // Compression
        .gzip(true)
        .brotli(true)
        .zstd(true)
        .user_agent(user_agent())
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
});
