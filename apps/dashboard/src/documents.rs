// Cache-backed document list: paging, optimistic insert after upload, optimistic delete
// with rollback, and in-place status patches. All list state lives in one cache key, the
// first-page path of the current filters, so every subscriber to that key sees the changes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheOptions, Mutation, ResourceCache, Subscription};
use crate::errors::ApiError;
use crate::models::document::{DocumentFilters, DocumentListItem, DocumentStatus, UploadResponse};

pub type DocumentPage = Vec<DocumentListItem>;

/// The document endpoints the list needs beyond the cache's own fetcher.
#[async_trait]
pub trait DocumentsApi: Send + Sync {
    async fn list(&self, filters: &DocumentFilters) -> Result<DocumentPage, ApiError>;
    async fn upload(&self, filename: &str, contents: Bytes) -> Result<UploadResponse, ApiError>;
    async fn delete(&self, document_id: &str) -> Result<(), ApiError>;
}

struct Paging {
    filters: DocumentFilters,
    /// Known from the last page this list loaded itself. `None` until then.
    has_more: Option<bool>,
    loading_more: bool,
}

pub struct DocumentList {
    api: Arc<dyn DocumentsApi>,
    cache: ResourceCache<DocumentPage>,
    paging: Mutex<Paging>,
}

impl DocumentList {
    pub fn new(
        api: Arc<dyn DocumentsApi>,
        cache: ResourceCache<DocumentPage>,
        filters: DocumentFilters,
    ) -> Self {
        Self {
            api,
            cache,
            paging: Mutex::new(Paging {
                filters: filters.first_page(),
                has_more: None,
                loading_more: false,
            }),
        }
    }

    /// Cache key holding the whole list for the current filters.
    pub fn key(&self) -> String {
        self.paging.lock().filters.first_page().to_path()
    }

    pub fn filters(&self) -> DocumentFilters {
        self.paging.lock().filters.clone()
    }

    /// Must be called inside a tokio runtime.
    pub fn subscribe(&self, options: CacheOptions) -> Subscription<DocumentPage> {
        self.cache.get(Some(&self.key()), options)
    }

    pub fn documents(&self) -> DocumentPage {
        self.cache
            .peek(&self.key())
            .and_then(|state| state.data)
            .unwrap_or_default()
    }

    /// Whether `load_more` can find anything. Before this list has loaded a page itself,
    /// a full first page in the cache counts as "maybe more".
    pub fn has_more(&self) -> bool {
        let (known, filters) = {
            let paging = self.paging.lock();
            (paging.has_more, paging.filters.clone())
        };
        known.unwrap_or_else(|| match self.cache.peek(&filters.first_page().to_path()) {
            Some(state) => state
                .data
                .map_or(true, |list| filters.is_full_page(list.len())),
            None => true,
        })
    }

    /// Switches the status filter and starts again from the first page.
    pub fn set_status_filter(&self, status: Option<DocumentStatus>) -> String {
        let mut paging = self.paging.lock();
        paging.filters = DocumentFilters {
            status_filter: status,
            ..paging.filters.first_page()
        };
        paging.has_more = None;
        paging.filters.to_path()
    }

    /// Refetches the first page, dropping any pages appended by `load_more`.
    pub async fn refresh(&self) -> Result<DocumentPage, ApiError> {
        let first = {
            let mut paging = self.paging.lock();
            paging.filters = paging.filters.first_page();
            paging.has_more = None;
            paging.filters.clone()
        };
        let list = self
            .cache
            .mutate(&first.to_path(), Mutation::Revalidate)
            .await?
            .unwrap_or_default();
        self.paging.lock().has_more = Some(first.is_full_page(list.len()));
        Ok(list)
    }

    /// Fetches the next page and appends it to the cached list. Returns how many documents
    /// were added; zero when there is nothing more or another load is already running.
    pub async fn load_more(&self) -> Result<usize, ApiError> {
        if !self.has_more() {
            return Ok(0);
        }
        let (key, next) = {
            let mut paging = self.paging.lock();
            if paging.loading_more {
                return Ok(0);
            }
            paging.loading_more = true;
            (paging.filters.first_page().to_path(), paging.filters.next_page())
        };

        let page = match self.api.list(&next).await {
            Ok(page) => page,
            Err(err) => {
                self.paging.lock().loading_more = false;
                return Err(err);
            }
        };
        let added = page.len();
        let more = next.is_full_page(added);

        let appended = self
            .cache
            .mutate(
                &key,
                Mutation::update(move |current: Option<&DocumentPage>| {
                    let mut list = current.cloned().unwrap_or_default();
                    list.extend(page);
                    list
                }),
            )
            .await;

        let mut paging = self.paging.lock();
        paging.loading_more = false;
        appended?;
        debug!("Loaded {added} more documents at offset {}", next.offset);
        paging.filters = next;
        paging.has_more = Some(more);
        Ok(added)
    }

    /// Uploads a file and puts a placeholder for it at the top of the list.
    pub async fn upload(&self, filename: &str, contents: Bytes) -> Result<UploadResponse, ApiError> {
        let response = self.api.upload(filename, contents).await?;
        info!("Uploaded {filename} as {}", response.document_id);

        let item = DocumentListItem::from_upload(&response, filename, Utc::now());
        self.cache
            .mutate(
                &self.key(),
                Mutation::update(move |current: Option<&DocumentPage>| {
                    let mut list = vec![item];
                    list.extend(current.into_iter().flatten().cloned());
                    list
                }),
            )
            .await?;
        Ok(response)
    }

    /// Removes a document from the list right away, then deletes it remotely.
    /// If the delete fails the list is put back as it was and the error is returned.
    pub async fn remove(&self, document_id: &str) -> Result<(), ApiError> {
        let key = self.key();
        let previous = self.cache.peek(&key).and_then(|state| state.data);

        let id = document_id.to_string();
        self.cache
            .mutate(
                &key,
                Mutation::update(move |current: Option<&DocumentPage>| {
                    current
                        .into_iter()
                        .flatten()
                        .filter(|doc| doc.id.to_string() != id)
                        .cloned()
                        .collect()
                }),
            )
            .await?;

        if let Err(err) = self.api.delete(document_id).await {
            warn!("Delete of {document_id} failed, restoring list: {err}");
            if let Some(previous) = previous {
                self.cache.mutate(&key, Mutation::Value(previous)).await?;
            }
            return Err(err);
        }
        info!("Deleted document {document_id}");
        Ok(())
    }

    /// Patches one document's status in place without a request.
    pub async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), ApiError> {
        let id = document_id.to_string();
        self.cache
            .mutate(
                &self.key(),
                Mutation::update(move |current: Option<&DocumentPage>| {
                    let mut list = current.cloned().unwrap_or_default();
                    for doc in list.iter_mut().filter(|doc| doc.id.to_string() == id) {
                        doc.status = status;
                    }
                    list
                }),
            )
            .await?;
        Ok(())
    }
}
