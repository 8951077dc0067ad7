//! Database-level endpoints: one thin method per REST action.

use serde_json::{json, Value};
use settee_core::{
    CallError, CallOptions, CallResult, LogicalRequest, PageSpec, RowSeed, ServerVersion,
};

use crate::client::Client;
use crate::document::Document;

/// Handle on one database of a [`Client`].
pub struct Database<'a> {
    client: &'a Client,
    name: String,
}

impl<'a> Database<'a> {
    pub(crate) fn new(client: &'a Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn path(&self, suffix: &str) -> String {
        format!("/{}{suffix}", urlencoding::encode(&self.name))
    }

    fn doc_path(&self, id: &str) -> String {
        self.path(&format!("/{}", urlencoding::encode(id)))
    }

    /// `PUT /{db}` — create the database.
    pub async fn create(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::put(self.path(""))
            .with_body(json!({}))
            .with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `DELETE /{db}`.
    pub async fn delete(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::delete(self.path("")).with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `GET /{db}` — database metadata.
    pub async fn info(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get(self.path("")).with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `HEAD /{db}` — cheap existence probe.
    pub async fn exists(&self, options: &CallOptions) -> Result<bool, CallError> {
        let request = LogicalRequest::head(self.path("")).with_options(options);
        let result = self.client.dispatcher().dispatch(request).await?;
        Ok(result.is_ok())
    }

    /// `GET /{db}/_all_docs`, paged. Rows materialize through a hook
    /// reading the response's "rows" array; documents appear on rows
    /// when the caller asked for `include_docs`.
    pub async fn all_docs(
        &self,
        spec: PageSpec,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get(self.path("/_all_docs"))
            .with_options(&CallOptions::new().on_row(rows_array_hook("rows")))
            .with_options(options);
        self.client.first_page(request, spec).await
    }

    /// `POST /{db}/_find`, paged. The selector travels in the body; the
    /// paginator folds skip/limit/bookmark into it per round.
    pub async fn find(
        &self,
        selector: Value,
        spec: PageSpec,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::post(self.path("/_find"))
            .with_body(json!({ "selector": selector }))
            .introduced(ServerVersion::new(2, 0, 0))
            .with_options(&CallOptions::new().on_row(rows_array_hook("docs")))
            .with_options(options);
        self.client.first_page(request, spec).await
    }

    /// `POST /{db}/_bulk_docs`.
    pub async fn bulk_docs(
        &self,
        docs: Vec<Value>,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::post(self.path("/_bulk_docs"))
            .with_body(json!({ "docs": docs }))
            .with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `GET /{db}/{id}`.
    pub async fn get_doc(&self, id: &str, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get(self.doc_path(id)).with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `GET /{db}/{id}?attachments=true` — document plus attachment
    /// parts in one multipart response.
    pub async fn get_doc_with_attachments(
        &self,
        id: &str,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get(self.doc_path(id))
            .with_query("attachments", "true")
            .with_header("accept", "multipart/related")
            .with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `PUT /{db}/{id}` — store a document at its current revision.
    pub async fn put_doc(
        &self,
        doc: &Document,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::put(self.doc_path(doc.id()))
            .with_body(doc.to_wire())
            .with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `DELETE /{db}/{id}?rev=...`.
    pub async fn delete_doc(
        &self,
        id: &str,
        rev: &str,
        options: &CallOptions,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::delete(self.doc_path(id))
            .with_query("rev", rev)
            .with_options(options);
        self.client.dispatcher().dispatch(request).await
    }

    /// `GET /{db}/{id}/{name}` — one attachment's bytes. A missing
    /// attachment is `None`, not an error.
    pub async fn attachment(
        &self,
        id: &str,
        name: &str,
        options: &CallOptions,
    ) -> Result<Option<Vec<u8>>, CallError> {
        let path = format!(
            "{}/{}",
            self.doc_path(id),
            urlencoding::encode(name)
        );
        let request = LogicalRequest::get(path)
            .with_header("accept", "*/*")
            .with_options(options);
        let result = self.client.dispatcher().dispatch(request).await?;

        if !result.is_ok() {
            return Ok(None);
        }
        Ok(result
            .response()
            .and_then(|response| response.parts().first())
            .map(|part| part.bytes.clone()))
    }
}

impl std::fmt::Debug for Database<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

/// Row hook over a top-level response array: raw fragment, its "value"
/// field as the interpreted form, and the joined document when present.
fn rows_array_hook(
    key: &'static str,
) -> impl Fn(&CallResult, usize, usize) -> Option<RowSeed> + Send + Sync + 'static {
    move |result, number, _column| {
        let answer = result.raw_answer().ok()?;
        let raw = answer.get(key)?.get(number - 1)?.clone();
        let value = raw.get("value").cloned().unwrap_or_else(|| raw.clone());
        let mut seed = RowSeed::new(raw.clone(), value);
        if let Some(doc) = raw.get("doc") {
            if !doc.is_null() {
                seed = seed.with_doc(doc.clone());
            }
        }
        Some(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use settee_core::{HookSet, Outcome, WireResponse};

    fn result_with_rows(body: &Value) -> CallResult {
        CallResult::new(HookSet::default())
            .finalize(Outcome::from_response("local", WireResponse::json(200, body)))
    }

    #[test]
    fn rows_hook_reads_value_and_doc() {
        let hook = rows_array_hook("rows");
        let result = result_with_rows(&json!({
            "rows": [
                {"id": "a", "key": "a", "value": {"rev": "1-x"}, "doc": {"_id": "a"}},
                {"id": "b", "key": "b", "value": {"rev": "1-y"}},
            ]
        }));

        let first = hook(&result, 1, 0).expect("row 1");
        assert_eq!(first.value, json!({"rev": "1-x"}));
        assert_eq!(first.doc, Some(json!({"_id": "a"})));

        let second = hook(&result, 2, 0).expect("row 2");
        assert!(second.doc.is_none());

        assert!(hook(&result, 3, 0).is_none());
    }
}
