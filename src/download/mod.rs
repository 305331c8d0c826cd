//! Network retrieval of package bundles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
#[cfg(test)]
use mockall::automock;
use std::path::Path;
use std::sync::Arc;

use crate::http::HttpClient;
use crate::runtime::Runtime;

/// Trait for fetching a URL into a local file.
///
/// This abstracts the network retrieval step of dependency resolution, making
/// it easy to mock in tests without standing up an HTTP server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into the file at `dest`. The destination's parent
    /// directory must already exist.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Default [`Fetcher`] backed by [`HttpClient`], streaming response chunks
/// through the runtime's file creation.
pub struct HttpFetcher<R: Runtime + 'static> {
    runtime: Arc<R>,
    client: HttpClient,
}

impl<R: Runtime + 'static> HttpFetcher<R> {
    pub fn new(runtime: Arc<R>, client: HttpClient) -> Self {
        Self { runtime, client }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Fetcher for HttpFetcher<R> {
    #[tracing::instrument(skip(self, dest))]
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {} -> {:?}", url, dest);

        let dest = dest.to_path_buf();
        self.client
            .download_file(url, || {
                self.runtime
                    .create_file(&dest)
                    .with_context(|| format!("Failed to create download file at {:?}", dest))
            })
            .await?;

        info!("Download complete.");
        Ok(())
    }
}
