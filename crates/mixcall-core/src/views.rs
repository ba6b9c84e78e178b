use serde::Serialize;

use crate::config::SessionConfig;
use crate::errors::MixcallError;

#[derive(Debug, Serialize)]
struct ViewPatch<'a> {
    op: &'a str,
    path: &'a str,
    value: &'a str,
}

/// Marks a published stream as part of the server-composed common view.
///
/// The session treats this as fire-and-forget: failure is logged, never
/// propagated, and the publication is not rolled back.
pub struct ViewClient {
    http: reqwest::Client,
}

impl ViewClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// One `PATCH {base}rooms/{conference_id}/streams/{publication_id}`
    /// with a single JSON-Patch replace on `/info/inViews`.
    pub async fn tag_for_common_view(
        &self,
        config: &SessionConfig,
        conference_id: &str,
        publication_id: &str,
    ) -> Result<(), MixcallError> {
        let base = config.server_base();
        if base.is_empty() {
            return Err(MixcallError::Configuration(
                "server base URL is not set".into(),
            ));
        }

        let url = format!("{base}rooms/{conference_id}/streams/{publication_id}");
        let body = [ViewPatch {
            op: "replace",
            path: "/info/inViews",
            value: "common",
        }];

        tracing::debug!("tagging publication {publication_id} for common view in {conference_id}");

        let resp = self
            .http
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MixcallError::Tag(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MixcallError::Tag(format!(
                "view patch returned status {}",
                resp.status()
            )));
        }

        Ok(())
    }
}
