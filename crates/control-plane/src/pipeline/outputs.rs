use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const WEB_BUCKET_KEY: &str = "WebBucketName";
pub const API_ENDPOINT_KEY: &str = "ApiEndpoint";
pub const APP_URL_KEY: &str = "CloudFrontUrl";

#[derive(Debug, Clone, Default)]
pub struct StackOutputs {
    /// Every string-valued output across every stack, flattened.
    pub raw: BTreeMap<String, String>,
    pub web_bucket: String,
    pub api_url: String,
    pub app_url: String,
}

/// Parse the deploy stage's outputs file: a map of stack name to output
/// key/value pairs. A missing file, unparseable content, or absent well-known
/// keys all degrade to empty fields rather than failing the run.
pub fn read_outputs(path: &Path) -> StackOutputs {
    let raw = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<BTreeMap<String, BTreeMap<String, serde_json::Value>>>(&content) {
            Ok(stacks) => {
                let mut flat = BTreeMap::new();
                for (_stack, outputs) in stacks {
                    for (key, value) in outputs {
                        if let Some(s) = value.as_str() {
                            flat.insert(key, s.to_owned());
                        }
                    }
                }
                flat
            }
            Err(err) => {
                warn!(event = "outputs.parse_failed", path = %path.display(), error = %err);
                BTreeMap::new()
            }
        },
        Err(err) => {
            warn!(event = "outputs.missing", path = %path.display(), error = %err);
            BTreeMap::new()
        }
    };
    let lookup = |key: &str| raw.get(key).cloned().unwrap_or_default();
    StackOutputs {
        web_bucket: lookup(WEB_BUCKET_KEY),
        api_url: lookup(API_ENDPOINT_KEY),
        app_url: lookup(APP_URL_KEY),
        raw,
    }
}
