use async_trait::async_trait;
use reqwest::multipart::Form;
use serde_json::Value;
use tracing::debug;

use tgb_core::{
    api::Endpoints,
    config::BotOptions,
    errors::{ApiRejection, Error, ResponseParameters},
    ports::{encode_param, ApiRequest, BotApi, ParamValue},
    Result,
};

use crate::files::{resolve, Resolved};

/// HTTP request executor for `{base_api_url}/bot{token}[/test]/{method}`.
///
/// Stateless between calls; cheap to clone.
#[derive(Clone, Debug)]
pub struct ApiClient {
    token: String,
    base_api_url: String,
    test_environment: bool,
    filepath: bool,
    http: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    error_code: Option<i64>,
    #[serde(default)]
    description: String,
    parameters: Option<ResponseParameters>,
}

impl ApiClient {
    pub fn new(token: impl Into<String>, options: &BotOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = &options.request.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        if let Some(ua) = &options.request.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let http = builder
            .build()
            .map_err(|e| Error::fatal_with("http client build failed", e))?;

        Ok(Self {
            token: token.into(),
            base_api_url: options.base_api_url.trim_end_matches('/').to_string(),
            test_environment: options.test_environment,
            filepath: options.filepath,
            http,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn method_url(&self, method: &str) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("telegram bot token not provided".to_string()));
        }
        let env = if self.test_environment { "/test" } else { "" };
        Ok(format!(
            "{}/bot{}{env}/{method}",
            self.base_api_url, self.token
        ))
    }

    /// Download URL for a `file_path` returned by `getFile`.
    pub fn file_link(&self, file_path: &str) -> String {
        let env = if self.test_environment { "/test" } else { "" };
        format!(
            "{}/file/bot{}{env}/{}",
            self.base_api_url,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    /// Resolve a file id with `getFile` and fetch its bytes.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.get_file(file_id).await?;
        let Some(path) = file.file_path else {
            return Err(Error::fatal(format!("file {file_id} has no file_path")));
        };

        let resp = self
            .http
            .get(self.file_link(&path))
            .send()
            .await
            .map_err(|e| Error::fatal_with("file download failed", e.without_url()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::fatal_with("file download failed", e.without_url()))?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
            });
        }
        Ok(bytes.to_vec())
    }

    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let url = self.method_url(&request.method)?;
        let method = request.method;

        let mut fields: Vec<(String, Resolved)> = Vec::new();
        for (name, value) in request.params.into_inner() {
            match value {
                ParamValue::Value(v) => {
                    if let Some(s) = encode_param(&v) {
                        fields.push((name, Resolved::Field(s)));
                    }
                }
                ParamValue::File(f) => {
                    let resolved = resolve(&name, f, self.filepath).await?;
                    fields.push((name, resolved));
                }
            }
        }

        let multipart = fields
            .iter()
            .any(|(_, v)| matches!(v, Resolved::Upload(_)));
        debug!(%method, multipart, "calling api");

        let mut builder = self.http.post(url);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = if multipart {
            let mut form = Form::new();
            for (name, v) in fields {
                form = match v {
                    Resolved::Field(s) => form.text(name, s),
                    Resolved::Upload(part) => form.part(name, part),
                };
            }
            builder.multipart(form)
        } else {
            let pairs: Vec<(String, String)> = fields
                .into_iter()
                .filter_map(|(name, v)| match v {
                    Resolved::Field(s) => Some((name, s)),
                    Resolved::Upload(_) => None,
                })
                .collect();
            builder.form(&pairs)
        };

        // Strip the URL from transport errors: it embeds the token.
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::fatal_with(format!("{method} request failed"), e.without_url()))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::fatal_with(format!("{method} response failed"), e.without_url()))?;

        normalize(status, &body)
    }
}

/// Map a raw response into the `result` payload or a classified error.
pub(crate) fn normalize(status: u16, body: &[u8]) -> Result<Value> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(env) => env,
        Err(e) => {
            let body = String::from_utf8_lossy(body).into_owned();
            if !(200..300).contains(&status) {
                return Err(Error::Http { status, body });
            }
            return Err(Error::Parse {
                message: format!("error parsing response: {e}"),
                body,
            });
        }
    };

    if envelope.ok {
        return Ok(envelope.result);
    }

    Err(Error::Rejected(ApiRejection {
        error_code: envelope.error_code.unwrap_or(i64::from(status)),
        description: envelope.description,
        parameters: envelope.parameters,
    }))
}

#[async_trait]
impl BotApi for ApiClient {
    async fn call(&self, request: ApiRequest) -> Result<Value> {
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tgb_core::{
        domain::ChatId,
        ports::{InputFile, Params},
    };
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const TOKEN: &str = "123:abc";

    fn client(server: &MockServer) -> ApiClient {
        let options = BotOptions {
            base_api_url: server.uri(),
            ..BotOptions::default()
        };
        ApiClient::new(TOKEN, &options).unwrap()
    }

    async fn last_body(server: &MockServer) -> String {
        let reqs = server.received_requests().await.unwrap();
        String::from_utf8_lossy(&reqs.last().unwrap().body).into_owned()
    }

    #[test]
    fn normalize_classifies_responses() {
        assert_eq!(normalize(200, br#"{"ok":true,"result":[1]}"#).unwrap(), json!([1]));
        assert_eq!(normalize(200, br#"{"ok":true}"#).unwrap(), Value::Null);

        let err = normalize(
            429,
            br#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":3}}"#,
        )
        .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(3));

        let err = normalize(502, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, Error::Http { status: 502, .. }));

        let err = normalize(200, b"not json").unwrap_err();
        assert!(matches!(err, Error::Parse { ref body, .. } if body == "not json"));

        // No error_code: fall back to the HTTP status.
        let err = normalize(409, br#"{"ok":false,"description":"Conflict"}"#).unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn send_message_is_form_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendMessage")))
            .and(body_string_contains("chat_id=9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 11, "chat": {"id": 9, "type": "private"}, "date": 1, "text": "hi"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        let markup = json!({"inline_keyboard": [[{"text": "a", "callback_data": "b"}]]});
        let msg = api
            .send_message(ChatId(9), "hi", Params::new().with("reply_markup", markup))
            .await
            .unwrap();
        assert_eq!(msg.message_id.0, 11);

        let body = last_body(&server).await;
        assert!(body.contains("text=hi"));
        assert!(body.contains("reply_markup=%7B%22inline_keyboard%22"));
    }

    #[tokio::test]
    async fn rate_limit_is_a_remote_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests",
                "parameters": {"retry_after": 3}
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_me().await.unwrap_err();
        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.error_code, 429);
        assert_eq!(rejection.description, "Too Many Requests");
        assert_eq!(err.retry_after(), Some(3));
    }

    #[tokio::test]
    async fn missing_token_fails_before_the_network() {
        let options = BotOptions {
            base_api_url: "http://127.0.0.1:9".to_string(),
            ..BotOptions::default()
        };
        let api = ApiClient::new("", &options).unwrap();
        let err = api.call(ApiRequest::new("getMe")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn connection_failure_is_fatal_and_hides_the_token() {
        let options = BotOptions {
            base_api_url: "http://127.0.0.1:9".to_string(),
            ..BotOptions::default()
        };
        let api = ApiClient::new(TOKEN, &options).unwrap();
        let err = api
            .call(ApiRequest::new("getMe").timeout(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fatal { .. }));
        let chain = format!("{err} {:?}", std::error::Error::source(&err));
        assert!(!chain.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_environment_uses_test_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/test/getMe")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "T"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = BotOptions {
            base_api_url: server.uri(),
            test_environment: true,
            ..BotOptions::default()
        };
        let me = ApiClient::new(TOKEN, &options).unwrap().get_me().await.unwrap();
        assert!(me.is_bot);
    }

    #[tokio::test]
    async fn bytes_upload_switches_to_multipart_with_sniffed_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendPhoto")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 1, "chat": {"id": 5}}
            })))
            .mount(&server)
            .await;

        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        client(&server)
            .send_photo(5, InputFile::bytes(png), Params::new().with("caption", "c"))
            .await
            .unwrap();

        let body = last_body(&server).await;
        assert!(body.contains(r#"name="photo"; filename="photo.png""#));
        assert!(body.to_lowercase().contains("content-type: image/png"));
        assert!(body.contains(r#"name="caption""#));
    }

    #[tokio::test]
    async fn file_id_string_stays_form_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 1, "chat": {"id": 5}}
            })))
            .mount(&server)
            .await;

        client(&server)
            .send_document(5, InputFile::id("BQACAgIAAx"), Params::new())
            .await
            .unwrap();
        assert!(last_body(&server).await.contains("document=BQACAgIAAx"));
    }

    #[tokio::test]
    async fn local_path_is_uploaded_under_its_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.pdf");
        std::fs::write(&file, b"%PDF-1.4\n").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 1, "chat": {"id": 5}}
            })))
            .mount(&server)
            .await;

        client(&server)
            .send_document(5, InputFile::from(file), Params::new())
            .await
            .unwrap();
        let body = last_body(&server).await;
        assert!(body.contains(r#"filename="report.pdf""#));
        assert!(body.contains("%PDF-1.4"));
    }

    #[tokio::test]
    async fn download_file_resolves_path_then_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getFile")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"file_id": "f1", "file_unique_id": "u1", "file_path": "photos/file_0.jpg"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{TOKEN}/photos/file_0.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpegdata".to_vec()))
            .mount(&server)
            .await;

        let api = client(&server);
        assert_eq!(
            api.file_link("photos/file_0.jpg"),
            format!("{}/file/bot{TOKEN}/photos/file_0.jpg", server.uri())
        );
        assert_eq!(api.download_file("f1").await.unwrap(), b"jpegdata".to_vec());
    }
}
