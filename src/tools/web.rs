//! Web search through the provider's grounding capability.

use serde_json::{Value, json};

use crate::provider::Provider;

pub(super) struct WebTools<'a> {
    pub gateway: &'a dyn Provider,
}

impl WebTools<'_> {
    pub async fn web_search(&self, args: &Value) -> Result<Value, String> {
        let query = args["query"].as_str().unwrap_or_default();
        let answer = self
            .gateway
            .grounded_search(query)
            .await
            .map_err(|e| e.to_string())?;

        let sources: Vec<Value> = answer
            .citations
            .iter()
            .map(|c| json!({ "title": c.title, "url": c.url }))
            .collect();

        Ok(json!({ "text": answer.text, "sources": sources }))
    }
}
