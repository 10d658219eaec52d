use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use streamer_crypto::ChunkCipher;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::config::StreamerConfig;
use crate::error::ConfigError;
use crate::events::EventSink;
use crate::files;
use crate::pump::StreamPump;
use crate::registry::TransferRegistry;
use crate::task::{PreparedRequest, TransferTask};
use crate::types::{
    Direction, FileInfo, TransferId, TransferOptions, TransferRecord, TransferStatus,
};

/// Entry point for starting, cancelling and inspecting transfers.
///
/// Each transfer runs on its own tokio task; the registry is the only state
/// they share. Construct one `Streamer` per running instance and pass it (or
/// an `Arc` of it) to callers.
pub struct Streamer {
    config: StreamerConfig,
    client: Client,
    registry: Arc<TransferRegistry>,
    sink: Arc<dyn EventSink>,
}

impl Streamer {
    pub fn new(config: StreamerConfig, sink: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        Self::with_registry(config, Arc::new(TransferRegistry::new()), sink)
    }

    /// Use an externally owned registry, e.g. one shared with a sink that
    /// cancels transfers.
    pub fn with_registry(
        config: StreamerConfig,
        registry: Arc<TransferRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            config,
            client,
            registry,
            sink,
        })
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Validate `options`, register the transfer and spawn it.
    ///
    /// Configuration problems (URL, method, headers, key or nonce) are
    /// returned here and nothing is registered. Everything after that is
    /// reported through the event sink. Must be called inside a tokio runtime.
    pub fn start_transfer(
        &self,
        direction: Direction,
        options: TransferOptions,
    ) -> Result<TransferId, ConfigError> {
        let request = prepare_request(direction, &options)?;
        let path = files::resolve_local_path(&options.path)?;

        let cipher = match &options.encryption {
            Some(spec) => spec
                .key_material()?
                .map(|material| ChunkCipher::new(direction.cipher_direction(), material))
                .transpose()?,
            None => None,
        };

        let id = options
            .custom_transfer_id
            .filter(|id| !id.trim().is_empty())
            .map(TransferId::from)
            .unwrap_or_else(TransferId::generate);

        let token = CancellationToken::new();
        self.registry.register(id.clone(), direction, token.clone())?;

        info!(
            transfer_id = %id,
            %direction,
            method = %request.method,
            url = %request.url,
            encrypted = cipher.is_some(),
            "transfer queued"
        );

        let span = info_span!("transfer", transfer_id = %id, %direction);
        let task = TransferTask {
            id: id.clone(),
            direction,
            request,
            path,
            cipher,
            client: self.client.clone(),
            pump: StreamPump::new(self.config.chunk_size, self.config.progress),
            registry: self.registry.clone(),
            sink: self.sink.clone(),
            token,
            bytes: AtomicU64::new(0),
            total: AtomicU64::new(0),
        };
        tokio::spawn(task.run().instrument(span));

        Ok(id)
    }

    pub fn start_upload(&self, options: TransferOptions) -> Result<TransferId, ConfigError> {
        self.start_transfer(Direction::Upload, options)
    }

    pub fn start_download(&self, options: TransferOptions) -> Result<TransferId, ConfigError> {
        self.start_transfer(Direction::Download, options)
    }

    /// Returns whether a queued or active transfer was found and signalled.
    pub fn cancel_transfer(&self, id: &TransferId) -> bool {
        self.registry.cancel(id)
    }

    pub fn get_status(&self, id: &TransferId) -> Option<TransferStatus> {
        self.registry.status(id)
    }

    pub fn get_record(&self, id: &TransferId) -> Option<TransferRecord> {
        self.registry.get(id)
    }

    pub fn list_active(&self, direction: Direction) -> HashMap<TransferId, TransferStatus> {
        self.registry.list_active(direction)
    }

    /// Forget a finished transfer. Returns false for unknown or live ids.
    pub fn clear_terminal(&self, id: &TransferId) -> bool {
        self.registry.clear_terminal(id)
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo, ConfigError> {
        files::file_info(path).await
    }
}

fn prepare_request(
    direction: Direction,
    options: &TransferOptions,
) -> Result<PreparedRequest, ConfigError> {
    let url = Url::parse(options.url.trim()).map_err(|e| ConfigError::InvalidUrl {
        url: options.url.clone(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    }

    let method = match options.method.as_deref().map(str::trim) {
        None | Some("") => direction.default_method(),
        Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(m.to_string()))?,
    };

    let mut headers = HeaderMap::with_capacity(options.headers.len() + 1);
    for (name, value) in &options.headers {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }
    if direction == Direction::Upload && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(files::DEFAULT_MIME_TYPE),
        );
    }

    Ok(PreparedRequest {
        url,
        method,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use streamer_crypto::{CipherMode, EncryptionSpec};

    fn streamer() -> Streamer {
        Streamer::new(StreamerConfig::default(), Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn request_defaults() {
        let opts = TransferOptions::new("http://localhost:3000/upload", "/tmp/a");
        let up = prepare_request(Direction::Upload, &opts).unwrap();
        assert_eq!(up.method, Method::POST);
        assert_eq!(up.headers[CONTENT_TYPE], "application/octet-stream");

        let down = prepare_request(Direction::Download, &opts).unwrap();
        assert_eq!(down.method, Method::GET);
        assert!(down.headers.is_empty());
    }

    #[test]
    fn request_honours_method_and_headers() {
        let opts = TransferOptions::new("https://example.com/x", "/tmp/a")
            .method("put")
            .header("Authorization", "Bearer t")
            .header("Content-Type", "image/png");
        let req = prepare_request(Direction::Upload, &opts).unwrap();
        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.headers["authorization"], "Bearer t");
        assert_eq!(req.headers[CONTENT_TYPE], "image/png");
    }

    #[test]
    fn request_rejects_bad_input() {
        let bad_url = TransferOptions::new("not a url", "/tmp/a");
        assert!(matches!(
            prepare_request(Direction::Upload, &bad_url),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let ftp = TransferOptions::new("ftp://example.com/file", "/tmp/a");
        assert!(matches!(
            prepare_request(Direction::Download, &ftp),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));

        let method = TransferOptions::new("http://h/x", "/tmp/a").method("GE T");
        assert!(matches!(
            prepare_request(Direction::Download, &method),
            Err(ConfigError::InvalidMethod(_))
        ));

        let header = TransferOptions::new("http://h/x", "/tmp/a").header("bad header", "v");
        assert!(matches!(
            prepare_request(Direction::Download, &header),
            Err(ConfigError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn config_errors_never_register() {
        let streamer = streamer();

        let mut spec = EncryptionSpec::new("AAAA", "AAAA", CipherMode::Ctr);
        spec.nonce = None;
        let opts = TransferOptions::new("http://127.0.0.1:9/upload", "/tmp/a")
            .encryption(spec)
            .transfer_id("cfg");
        assert!(matches!(
            streamer.start_upload(opts),
            Err(ConfigError::Encryption(_))
        ));
        assert!(streamer.get_status(&TransferId::from("cfg")).is_none());
        assert!(streamer.registry().is_empty());

        let empty_path = TransferOptions::new("http://127.0.0.1:9/upload", "file://");
        assert!(matches!(streamer.start_upload(empty_path), Err(ConfigError::EmptyPath)));
    }

    #[tokio::test]
    async fn duplicate_custom_ids_are_rejected() {
        let streamer = streamer();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        let opts = TransferOptions::new("http://127.0.0.1:9/upload", path.to_str().unwrap())
            .transfer_id("same");

        streamer.start_upload(opts.clone()).unwrap();
        assert!(matches!(
            streamer.start_upload(opts),
            Err(ConfigError::DuplicateId(_))
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = StreamerConfig {
            chunk_size: 0,
            ..StreamerConfig::default()
        };
        assert!(matches!(
            Streamer::new(config, Arc::new(NullSink)),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }
}
