mod error;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use self::error::ProcessError;

use crate::engine::{guess_format, Format, Transformer};
use crate::hash::{fingerprint, shard, tokey};
use crate::kvstore::{KvStore, KvStoreError};
use crate::models::ImageDescriptor;
use crate::parameters::{Parameters, SizeLimits, Source};
use crate::signature::{canonical_query, verify_sign};
use crate::storage::{format_http_date, HttpClient, Storage, StorageError};

const CHILDREN_SUFFIX: &str = ":children";

type SharedResult = Shared<BoxFuture<'static, Result<ImageDescriptor, ProcessError>>>;

/// A source file written through `upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub path: String,
    /// Empty when the source storage has no base URL.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub width: usize,
    pub depth: usize,
    pub rest_only: bool,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            width: 1,
            depth: 2,
            rest_only: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    /// Signing is disabled when unset or empty.
    pub secret_key: Option<String>,
    pub shard: ShardOptions,
    /// Output format when neither the request nor the source tells one.
    pub default_format: Option<Format>,
    pub default_quality: Option<u8>,
    pub enable_cascade_delete: bool,
    /// Collapse concurrent misses on the same key into one computation.
    pub single_flight: bool,
    pub allowed_mimetypes: Vec<String>,
    pub size_limits: SizeLimits,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Skip the cache and recompute.
    pub force: bool,
    /// Raw `If-Modified-Since` header value.
    pub if_modified_since: Option<String>,
}

struct Inner {
    config: ProcessorConfig,
    kvstore: Arc<dyn KvStore>,
    source: Arc<dyn Storage>,
    destination: Arc<dyn Storage>,
    engine: Arc<dyn Transformer>,
    client: HttpClient,
    inflight: Mutex<HashMap<String, SharedResult>>,
}

/// Cache-or-compute pipeline shared by all requests.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        kvstore: Arc<dyn KvStore>,
        source: Arc<dyn Storage>,
        destination: Arc<dyn Storage>,
        engine: Arc<dyn Transformer>,
        client: HttpClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                kvstore,
                source,
                destination,
                engine,
                client,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    /// Returns the descriptor of the image derived from `params`, computing
    /// and recording it on a cache miss.
    pub async fn process(
        &self,
        params: &HashMap<String, String>,
        options: &ProcessOptions,
    ) -> Result<ImageDescriptor, ProcessError> {
        let parameters = self.validate(params)?;

        let key = fingerprint(params);
        log::debug!("Processing {:?} with key {}", parameters.operation, key);

        if options.if_modified_since.is_some() && !options.force && self.inner.kvstore.exists(&key).await {
            log::info!("Key {} found, image not modified", key);
            return Err(ProcessError::NotModified);
        }

        if !options.force {
            if let Some(descriptor) = self.cached(&key).await {
                log::info!("Key {} found in kvstore", key);
                return Ok(descriptor);
            }
        }

        log::info!("Key {} not found in kvstore, processing", key);

        if self.inner.config.single_flight {
            self.process_shared(key, parameters).await
        } else {
            self.compute(key, parameters).await
        }
    }

    fn validate(&self, params: &HashMap<String, String>) -> Result<Parameters, ProcessError> {
        let config = &self.inner.config;
        let parameters = Parameters::from_map(
            params,
            config.default_quality,
            &config.allowed_mimetypes,
            &config.size_limits,
        )?;

        if let Some(secret) = config.secret_key.as_deref().filter(|s| !s.is_empty()) {
            if !verify_sign(secret, &canonical_query(params)) {
                log::warn!("Invalid signature for {:?}", params);
                return Err(ProcessError::Unauthorized);
            }
        }

        Ok(parameters)
    }

    async fn cached(&self, key: &str) -> Option<ImageDescriptor> {
        match self.inner.kvstore.get(key).await {
            Ok(Some(value)) => match ImageDescriptor::from_json(&value) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    log::warn!("Malformed descriptor for key {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Unable to read key {}: {}", key, e);
                None
            }
        }
    }

    async fn process_shared(&self, key: String, parameters: Parameters) -> Result<ImageDescriptor, ProcessError> {
        let future = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(&key) {
                Some(future) => {
                    log::debug!("Joining in-flight computation for key {}", key);
                    future.clone()
                }
                None => {
                    let this = self.clone();
                    let owned = key.clone();
                    let future = async move {
                        let result = this.compute(owned.clone(), parameters).await;
                        this.inner.inflight.lock().remove(&owned);
                        result
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, future.clone());
                    future
                }
            }
        };

        future.await
    }

    async fn compute(&self, key: String, parameters: Parameters) -> Result<ImageDescriptor, ProcessError> {
        let (content, source_headers) = self.fetch(&parameters.source).await?;

        let format = parameters
            .format
            .or_else(|| guess_format(&content))
            .or(self.inner.config.default_format)
            .unwrap_or(Format::Jpeg);

        let mut options = parameters.options;
        options.format = format;

        let engine = self.inner.engine.clone();
        let operation = parameters.operation;
        let output = tokio::task::spawn_blocking(move || engine.transform(&content, operation, &options))
            .await
            .map_err(|e| ProcessError::Transform(e.to_string()))??;

        let filepath = format!("{}.{}", self.shard_filename(&key), format.extension());

        self.inner.destination.save(&filepath, &output).await.map_err(|e| {
            log::error!("Unable to save {}: {}", filepath, e);
            ProcessError::from(e)
        })?;
        log::info!("Image {} saved to destination storage", filepath);

        let modified = format_http_date(&Utc::now());

        // The key identifies the derived image, whatever the source said
        let mut headers: BTreeMap<String, String> = source_headers
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("etag"))
            .collect();
        headers.insert("Content-Type".to_string(), format.content_type().to_string());
        headers.insert("Last-Modified".to_string(), modified.clone());
        headers.insert("ETag".to_string(), key.clone());

        let descriptor = ImageDescriptor {
            url: self.inner.destination.url(&filepath),
            key,
            filepath,
            size: output.len() as i64,
            modified,
            headers,
        };

        self.inner
            .kvstore
            .set(&descriptor.key, &descriptor.to_json())
            .await
            .map_err(|e| {
                log::error!("Unable to record key {}: {}", descriptor.key, e);
                ProcessError::from(e)
            })?;

        if self.inner.config.enable_cascade_delete {
            if let Source::Path(path) = &parameters.source {
                self.add_child(path, &descriptor.key).await?;
            }
        }

        log::info!("Image {} processed", descriptor.key);

        Ok(descriptor)
    }

    async fn fetch(&self, source: &Source) -> Result<(Vec<u8>, HashMap<String, String>), ProcessError> {
        match source {
            Source::Url(url) => {
                let file = self.inner.client.get(url.as_str()).await.map_err(ProcessError::from_fetch)?;
                Ok((file.content, file.headers))
            }
            Source::Path(path) => {
                let content = self.inner.source.open(path).await.map_err(ProcessError::from_fetch)?;
                let headers = self.inner.source.headers(path).await.unwrap_or_else(|e| {
                    log::warn!("Unable to read headers of {}: {}", path, e);
                    HashMap::new()
                });
                Ok((content, headers))
            }
        }
    }

    fn children_key(path: &str) -> String {
        format!("{}{}", tokey(&[path]), CHILDREN_SUFFIX)
    }

    async fn children(&self, children_key: &str) -> Result<Vec<String>, ProcessError> {
        match self.inner.kvstore.get(children_key).await? {
            Some(value) => serde_json::from_str(&value)
                .map_err(|e| ProcessError::Backend(format!("Malformed children list {}: {}", children_key, e))),
            None => Ok(Vec::new()),
        }
    }

    // Read-modify-write: concurrent computations on the same source may lose a child.
    async fn add_child(&self, path: &str, key: &str) -> Result<(), ProcessError> {
        let children_key = Self::children_key(path);
        let mut children = self.children(&children_key).await?;

        if !children.iter().any(|child| child == key) {
            children.push(key.to_string());
            let value = serde_json::to_string(&children).map_err(|e| ProcessError::Backend(e.to_string()))?;
            self.inner.kvstore.set(&children_key, &value).await?;
        }

        Ok(())
    }

    /// Writes a new source file. Only the final component of `filename` is kept.
    pub async fn upload(&self, filename: &str, content: &[u8]) -> Result<UploadedFile, ProcessError> {
        let name = std::path::Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProcessError::Unprocessable(format!("Invalid filename {:?}", filename)))?;

        if guess_format(content).is_none() {
            return Err(ProcessError::Unprocessable(format!("{} is not a supported image", name)));
        }

        self.inner.source.save(name, content).await.map_err(|e| {
            log::error!("Unable to upload {}: {}", name, e);
            ProcessError::from(e)
        })?;
        log::info!("Source file {} uploaded ({} bytes)", name, content.len());

        Ok(UploadedFile {
            filename: name.to_string(),
            path: name.to_string(),
            url: self.inner.source.url(name),
        })
    }

    /// Deletes a source file along with every image derived from it.
    pub async fn delete(&self, path: &str) -> Result<(), ProcessError> {
        if !self.inner.source.exists(path).await {
            return Err(ProcessError::NotFound(path.to_string()));
        }

        self.inner.source.delete(path).await?;
        log::info!("Source file {} deleted", path);

        if !self.inner.config.enable_cascade_delete {
            return Ok(());
        }

        let children_key = Self::children_key(path);
        if !self.inner.kvstore.exists(&children_key).await {
            return Ok(());
        }

        for key in self.children(&children_key).await? {
            self.delete_child(&key).await?;
        }

        self.inner.kvstore.delete(&children_key).await?;

        Ok(())
    }

    async fn delete_child(&self, key: &str) -> Result<(), ProcessError> {
        let Some(descriptor) = self.cached(key).await else {
            return Ok(());
        };

        match self.inner.destination.delete(&descriptor.filepath).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.inner.kvstore.delete(key).await {
            Ok(()) | Err(KvStoreError::KeyNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        log::info!("Derived image {} deleted", key);

        Ok(())
    }

    pub async fn get_key(&self, key: &str) -> Result<Option<String>, ProcessError> {
        Ok(self.inner.kvstore.get(key).await?)
    }

    pub async fn key_exists(&self, key: &str) -> bool {
        self.inner.kvstore.exists(key).await
    }

    pub async fn file_exists(&self, path: &str) -> bool {
        self.inner.destination.exists(path).await
    }

    /// Bytes of a processed image.
    pub async fn load(&self, descriptor: &ImageDescriptor) -> Result<Vec<u8>, ProcessError> {
        Ok(self.inner.destination.open(&descriptor.filepath).await?)
    }

    /// Sharded location of `key` in the destination storage, without extension.
    pub fn shard_filename(&self, key: &str) -> String {
        let shard_options = &self.inner.config.shard;
        shard(key, shard_options.width, shard_options.depth, shard_options.rest_only).join("/")
    }

    pub async fn close(&self) -> Result<(), ProcessError> {
        Ok(self.inner.kvstore.close().await?)
    }
}
