/// Gmail OAuth2 认证流程
///
/// 优先使用缓存的凭据文件；缺失或损坏时走控制台授权码流程（带 PKCE）
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl, basic::BasicClient,
};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use crate::config::client_secret::ClientApp;
use crate::config::storage::CredentialStore;
use crate::error::AuthError;
use crate::mail::gmail::types::Credential;

/// 授权码输入来源
pub trait CodePrompt {
    /// 向操作员展示授权 URL，并读取其输入（授权码或完整的回调 URL）
    fn read_code(&self, auth_url: &Url) -> impl Future<Output = Result<String, AuthError>> + Send;
}

/// 从标准输入读取授权码
pub struct ConsolePrompt;

impl CodePrompt for ConsolePrompt {
    async fn read_code(&self, auth_url: &Url) -> Result<String, AuthError> {
        println!(
            "Go to the following link in your browser then type the authorization code:\n{}",
            auth_url
        );

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(AuthError::Prompt)?;

        Ok(line)
    }
}

/// 获取可用的凭据
///
/// 1. 读取缓存文件，可用则直接返回（不会提示输入）
/// 2. 否则执行交互式授权并保存（权限 0600）
pub async fn obtain<P: CodePrompt>(
    app: &ClientApp,
    store: &CredentialStore,
    prompt: &P,
) -> Result<Credential, AuthError> {
    match store.load() {
        Ok(Some(credential)) if credential.is_usable() => {
            tracing::info!("✅ 使用缓存的凭据: {}", store.path().display());
            return Ok(credential);
        }
        Ok(Some(_)) => {
            tracing::warn!("缓存的凭据已过期且无 Refresh Token，需要重新授权");
        }
        Ok(None) => {
            tracing::info!("📭 无缓存凭据，开始授权流程");
        }
        Err(e) => {
            tracing::warn!("⚠️ 缓存的凭据无效: {}，重新授权", e);
        }
    }

    let credential = authorize(app, prompt).await?;

    println!("Saving credential file to: {}", store.path().display());
    store.save(&credential)?;

    Ok(credential)
}

/// 执行交互式授权
async fn authorize<P: CodePrompt>(app: &ClientApp, prompt: &P) -> Result<Credential, AuthError> {
    tracing::info!("🔐 开始 Gmail OAuth2 认证流程");

    let client = build_client(app)?;
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    // access_type=offline 才会返回 refresh_token
    let (auth_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(app.scopes.iter().map(|s| Scope::new(s.clone())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    tracing::debug!("授权 URL: {}", auth_url);

    let input = prompt.read_code(&auth_url).await?;
    let code = extract_code(&input, &csrf_state)?;

    tracing::info!("✅ 收到授权码，开始交换 Token");

    let credential = exchange_code_for_token(&client, code, pkce_verifier).await?;

    tracing::info!("🎉 OAuth2 认证流程完成");
    Ok(credential)
}

fn build_client(app: &ClientApp) -> Result<BasicClient, AuthError> {
    Ok(BasicClient::new(
        ClientId::new(app.client_id.clone()),
        Some(ClientSecret::new(app.client_secret.clone())),
        AuthUrl::new(app.auth_uri.clone())?,
        Some(TokenUrl::new(app.token_uri.clone())?),
    )
    .set_redirect_uri(RedirectUrl::new(app.redirect_uri.clone())?))
}

/// 解析操作员的输入
///
/// 支持直接粘贴授权码，或粘贴浏览器地址栏中的完整回调 URL（此时校验 state）
fn extract_code(input: &str, csrf_state: &CsrfToken) -> Result<AuthorizationCode, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::MissingCode);
    }

    let Ok(parsed) = Url::parse(input) else {
        return Ok(AuthorizationCode::new(input.to_string()));
    };

    let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Err(AuthError::Exchange(format!("用户拒绝授权: {}", error)));
    }

    if let Some(state) = params.get("state") {
        if state != csrf_state.secret() {
            return Err(AuthError::StateMismatch);
        }
    }

    params
        .get("code")
        .map(|code| AuthorizationCode::new(code.clone()))
        .ok_or(AuthError::MissingCode)
}

/// 交换授权码为 Token
async fn exchange_code_for_token(
    client: &BasicClient,
    code: AuthorizationCode,
    verifier: PkceCodeVerifier,
) -> Result<Credential, AuthError> {
    let token_response = client
        .exchange_code(code)
        .set_pkce_verifier(verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| {
            tracing::error!("Token 交换详细错误: {:?}", e);
            AuthError::Exchange(e.to_string())
        })?;

    let refresh_token = token_response.refresh_token().map(|t| t.secret().to_string());
    if refresh_token.is_none() {
        tracing::warn!("⚠️ 未收到 refresh_token，Access Token 过期后需要重新授权");
    }

    Ok(Credential::new(
        token_response.access_token().secret().to_string(),
        refresh_token,
        token_response.expires_in().map(|d| d.as_secs() as i64),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 记录授权 URL 并返回固定输入
    struct ScriptedPrompt {
        reply: String,
        seen: Mutex<Vec<Url>>,
    }

    impl ScriptedPrompt {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl CodePrompt for ScriptedPrompt {
        async fn read_code(&self, auth_url: &Url) -> Result<String, AuthError> {
            self.seen.lock().unwrap().push(auth_url.clone());
            Ok(self.reply.clone())
        }
    }

    fn test_app(server_uri: &str) -> ClientApp {
        ClientApp {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            auth_uri: format!("{}/auth", server_uri),
            token_uri: format!("{}/token", server_uri),
            redirect_uri: "http://localhost".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/gmail.modify".to_string()],
        }
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=4%2Fabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "1//new"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_valid_cache_does_not_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        store
            .save(&Credential::new("cached".into(), Some("r".into()), Some(3600)))
            .unwrap();

        let prompt = ScriptedPrompt::new("unused");
        let credential = obtain(&test_app("http://127.0.0.1:9"), &store, &prompt)
            .await
            .unwrap();

        assert_eq!(credential.access_token, "cached");
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_cache_runs_interactive_flow() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        let prompt = ScriptedPrompt::new("4/abc\n");

        let credential = obtain(&test_app(&server.uri()), &store, &prompt)
            .await
            .unwrap();

        assert_eq!(prompt.calls(), 1);
        assert_eq!(credential.access_token, "ya29.new");
        assert_eq!(credential.refresh_token.as_deref(), Some("1//new"));

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.access_token, "ya29.new");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        let url = prompt.seen.lock().unwrap()[0].clone();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(params.get("client_id").map(String::as_str), Some("client-id"));
        assert!(params.contains_key("code_challenge"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_runs_interactive_flow() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = CredentialStore::new(&path);
        let prompt = ScriptedPrompt::new("4/abc");

        let credential = obtain(&test_app(&server.uri()), &store, &prompt)
            .await
            .unwrap();

        assert_eq!(prompt.calls(), 1);
        assert_eq!(credential.access_token, "ya29.new");
        assert_eq!(store.load().unwrap().unwrap().access_token, "ya29.new");
    }

    #[tokio::test]
    async fn test_failed_exchange_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));

        let err = obtain(&test_app(&server.uri()), &store, &ScriptedPrompt::new("bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Exchange(_)));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));

        let err = obtain(
            &test_app("http://127.0.0.1:9"),
            &store,
            &ScriptedPrompt::new("  \n"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AuthError::MissingCode));
    }

    #[test]
    fn test_extract_code_from_redirect_url() {
        let state = CsrfToken::new("xyz".to_string());

        let code = extract_code("http://localhost/?state=xyz&code=4/abc&scope=s", &state).unwrap();
        assert_eq!(code.secret(), "4/abc");

        let err = extract_code("http://localhost/?state=other&code=4/abc", &state).unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));

        let err = extract_code("http://localhost/?error=access_denied", &state).unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_extract_bare_code() {
        let state = CsrfToken::new("xyz".to_string());
        let code = extract_code("  4/0AX4XfWh\n", &state).unwrap();
        assert_eq!(code.secret(), "4/0AX4XfWh");
    }
}
