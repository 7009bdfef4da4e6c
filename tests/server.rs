mod common;

use async_trait::async_trait;
use common::{item, FakeProvider, BASE};
use drive_qa::assemble::ContextAssembler;
use drive_qa::config::Config;
use drive_qa::credential::Credential;
use drive_qa::endpoints::Endpoints;
use drive_qa::error::DriveError;
use drive_qa::extract::Extractor;
use drive_qa::llm::{ChatMessage, ChatModel};
use drive_qa::models::SelectedFile;
use drive_qa::remote::{RemoteError, RemoteResourceClient};
use drive_qa::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct EchoModel {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, DriveError> {
        let user = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(user);
        Ok("42".to_string())
    }
}

async fn spawn(provider: Arc<FakeProvider>, model: Arc<EchoModel>) -> String {
    let mut config = Config::default();
    config.graph.base_url = BASE.to_string();
    let client: Arc<dyn RemoteResourceClient> = provider;
    let app = router(AppState::new(config, client, model)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn body(resp: reqwest::Response) -> Value {
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let base = spawn(Arc::default(), Arc::default()).await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json = body(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn listing_without_token_is_401() {
    let provider = Arc::new(FakeProvider::default());
    let base = spawn(provider.clone(), Arc::default()).await;
    let resp = reqwest::get(format!("{}/files/by-path?folder_path=Docs", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(body(resp).await["error"]["code"], "missing_token");
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn listing_json_shape() {
    let ep = Endpoints::new(BASE);
    let provider = Arc::new(
        FakeProvider::default()
            .json(ep.my_drive(), json!({"id": "me"}))
            .json(
                ep.my_drive_children("Docs"),
                json!({"value": [item("1", "a.pdf")]}),
            )
            .roles("me", "1", &["Write"]),
    );
    let base = spawn(provider, Arc::default()).await;
    let resp = reqwest::Client::new()
        .get(format!("{}/files/by-path", base))
        .query(&[("folder_path", "Docs")])
        .header("Authorization", "Bearer tok")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json = body(resp).await;
    assert_eq!(json["drive_id"], "me");
    let first = &json["items"][0];
    assert_eq!(first["id"], "1");
    assert_eq!(first["name"], "a.pdf");
    assert_eq!(first["type"], "file");
    assert_eq!(first["roles"], json!(["write"]));
    assert_eq!(first["canRead"], true);
    assert_eq!(first["canWrite"], true);
}

#[tokio::test]
async fn denied_listing_maps_to_403() {
    let ep = Endpoints::new(BASE);
    let provider = Arc::new(
        FakeProvider::default().json_err(ep.item_children("d", "x"), RemoteError::Forbidden),
    );
    let base = spawn(provider, Arc::default()).await;
    let resp = reqwest::Client::new()
        .get(format!("{}/files/children?drive_id=d&item_id=x", base))
        .header("Authorization", "tok")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let json = body(resp).await;
    assert_eq!(json["error"]["code"], "access_denied");
    assert_eq!(
        json["error"]["message"],
        "You do not have permission to access this resource"
    );
}

#[tokio::test]
async fn children_requires_both_ids() {
    let base = spawn(Arc::default(), Arc::default()).await;
    let resp = reqwest::Client::new()
        .get(format!("{}/files/children?drive_id=d", base))
        .header("Authorization", "tok")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(body(resp).await["error"]["code"], "malformed_input");
}

#[tokio::test]
async fn chat_with_no_files_is_rejected_before_fetching() {
    let provider = Arc::new(FakeProvider::default());
    let model = Arc::new(EchoModel::default());
    let base = spawn(provider.clone(), model.clone()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat/query", base))
        .header("Authorization", "Bearer tok")
        .json(&json!({"question": "anything?", "selected_files": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json = body(resp).await;
    assert_eq!(json["error"]["code"], "invalid_selection");
    assert_eq!(provider.call_count(), 0);
    assert!(model.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_answers_from_selected_files() {
    let ep = Endpoints::new(BASE);
    let provider = Arc::new(
        FakeProvider::default()
            .bytes(ep.item_content("d", "1"), b"The launch is on Tuesday.")
            .bytes(ep.item_content("d", "2"), b"PK"),
    );
    let model = Arc::new(EchoModel::default());
    let base = spawn(provider.clone(), model.clone()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat/query", base))
        .header("Authorization", "raw-token")
        .json(&json!({
            "question": "When is the launch?",
            "selected_files": [
                {"file_id": "1", "drive_id": "d", "file_name": "plan.txt"},
                {"file_id": "2", "drive_id": "d", "file_name": "assets.zip"}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body(resp).await, json!({"answer": "42"}));

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[0].contains("--- plan.txt ---\nThe launch is on Tuesday."));
    assert!(prompts[0].contains("--- assets.zip ---\n[Unsupported file format: zip]"));
    assert!(provider
        .tokens
        .lock()
        .unwrap()
        .iter()
        .all(|t| t == "Bearer raw-token"));
}

#[tokio::test]
async fn failed_download_is_bad_gateway_naming_file() {
    let base = spawn(Arc::default(), Arc::default()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat/query", base))
        .header("Authorization", "tok")
        .json(&json!({
            "question": "q",
            "selected_files": [{"file_id": "gone", "drive_id": "d", "file_name": "Budget.xlsx"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let json = body(resp).await;
    assert_eq!(json["error"]["code"], "remote_fetch");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Budget.xlsx"));
}

#[tokio::test]
async fn malformed_chat_body_is_bad_request() {
    let base = spawn(Arc::default(), Arc::default()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat/query", base))
        .header("Authorization", "tok")
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(body(resp).await["error"]["code"], "bad_request");
}

#[tokio::test]
async fn context_assembly_runs_on_a_spawned_task() {
    let ep = Endpoints::new(BASE);
    let provider = Arc::new(
        FakeProvider::default()
            .bytes(ep.item_content("d", "1"), b"first")
            .bytes(ep.item_content("d", "2"), b"second"),
    );
    let files = vec![
        SelectedFile {
            file_id: "1".to_string(),
            drive_id: "d".to_string(),
            file_name: "a.txt".to_string(),
        },
        SelectedFile {
            file_id: "2".to_string(),
            drive_id: "d".to_string(),
            file_name: "b.txt".to_string(),
        },
    ];

    let task = tokio::spawn(async move {
        let assembler =
            ContextAssembler::new(provider.as_ref(), &ep, Arc::new(Extractor::default()), 2);
        let cred = Credential::parse("tok").unwrap();
        assembler.assemble(&files, &cred).await.map(|c| c.text)
    });
    let text = task.await.unwrap().unwrap();
    let first = text.find("--- a.txt ---\nfirst").unwrap();
    let second = text.find("--- b.txt ---\nsecond").unwrap();
    assert!(first < second);
}
