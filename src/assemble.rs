//! Context assembly: download selected files, extract their text and join
//! the results into one delimited context.
//!
//! Downloads run with a bounded fan-out and extraction runs on the blocking
//! pool. Output order always equals selection order.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::credential::Credential;
use crate::endpoints::Endpoints;
use crate::error::DriveError;
use crate::extract::Extractor;
use crate::models::{AssembledContext, ExtractedDocument, SelectedFile};
use crate::remote::RemoteResourceClient;

/// Rejects an empty selection or an entry with a blank required field.
///
/// Runs before any network call.
pub fn validate_selection(files: &[SelectedFile]) -> Result<(), DriveError> {
    if files.is_empty() {
        return Err(DriveError::InvalidSelection("No files selected".to_string()));
    }
    for (index, file) in files.iter().enumerate() {
        let missing = file.missing_fields();
        if !missing.is_empty() {
            return Err(DriveError::InvalidSelection(format!(
                "Invalid file payload at index {}: missing {}",
                index,
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

pub struct ContextAssembler<'a> {
    client: &'a dyn RemoteResourceClient,
    endpoints: &'a Endpoints,
    extractor: Arc<Extractor>,
    concurrency: usize,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        client: &'a dyn RemoteResourceClient,
        endpoints: &'a Endpoints,
        extractor: Arc<Extractor>,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            endpoints,
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    /// Builds the context for `files`.
    ///
    /// A download failure aborts the whole assembly with a
    /// [`DriveError::RemoteFetch`] naming the file; extraction problems
    /// never do.
    pub async fn assemble(
        &self,
        files: &[SelectedFile],
        cred: &Credential,
    ) -> Result<AssembledContext, DriveError> {
        validate_selection(files)?;

        let fetched: Vec<(ExtractedDocument, usize)> = stream::iter(files.iter().cloned())
            .map(|file| async move { self.fetch_and_extract(&file, cred).await })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let fetched_bytes = fetched.iter().map(|(_, n)| n).sum();
        let documents: Vec<ExtractedDocument> = fetched.into_iter().map(|(doc, _)| doc).collect();
        let text_len: usize = documents.iter().map(|d| d.text.len()).sum();
        let context = AssembledContext::from_documents(&documents, fetched_bytes);

        tracing::debug!(
            file_count = context.document_count,
            bytes = context.fetched_bytes,
            text_len,
            context_len = context.text.len(),
            "context assembled"
        );
        Ok(context)
    }

    async fn fetch_and_extract(
        &self,
        file: &SelectedFile,
        cred: &Credential,
    ) -> Result<(ExtractedDocument, usize), DriveError> {
        let url = self.endpoints.item_content(&file.drive_id, &file.file_id);
        let bytes = self.client.get_bytes(&url, cred).await.map_err(|e| {
            DriveError::from_remote(e, "File not found").for_file(&file.file_name)
        })?;
        let size = bytes.len();
        tracing::debug!(file = %file.file_name, bytes = size, "file downloaded");

        let extractor = Arc::clone(&self.extractor);
        let name = file.file_name.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(file = %file.file_name, error = %e, "extraction task failed");
                format!(
                    "[Could not extract text from {}: extraction task failed]",
                    file.file_name
                )
            });

        Ok((
            ExtractedDocument {
                file_name: file.file_name.clone(),
                text,
            },
            size,
        ))
    }
}
