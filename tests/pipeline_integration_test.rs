//! 流水线集成测试：真实 HTTP 抓取（wiremock）+ 脚本化 Mock LLM

use std::sync::Arc;
use std::time::Duration;

use scribe::config::AppConfig;
use scribe::core::PipelineError;
use scribe::llm::mock::{last_user_message, system_message};
use scribe::llm::MockLlmClient;
use scribe::runtime::create_gateway_with_llm;
use scribe::task::TaskStatus;
use scribe::TaskGateway;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOMATO_PAGE: &str = "<html><head><title>Tomatoes</title></head><body>\
    <nav>Home | Garden</nav>\
    <p>Tomatoes need full sun.</p>\
    <p>Water them deeply twice a week.</p>\
    </body></html>";

const COFFEE_PAGE: &str = "<html><body><p>Grind the beans just before brewing.</p></body></html>";

/// 按阶段指令分派的 LLM 脚本：
/// discover 返回 `<base>/<query-slug>`；extract 先调用 fetch_page 再回传页面文本；synthesize 在输入前加标题
fn scripted_llm(base: String) -> MockLlmClient {
    MockLlmClient::new(move |messages| {
        let system = system_message(messages).unwrap_or_default();
        let last = last_user_message(messages).unwrap_or_default();

        if system.contains("fetch_page") {
            if let Some(observation) = last.strip_prefix("Observation (fetch_page):\n") {
                return Ok(serde_json::json!({ "extracted_text": observation }).to_string());
            }
            let url = last
                .split_whitespace()
                .find(|w| w.starts_with("http"))
                .unwrap_or_default();
            return Ok(serde_json::json!({ "tool": "fetch_page", "args": { "url": url } }).to_string());
        }
        if system.contains("tutorial") {
            return Ok(format!("# Tutorial\n{}", last));
        }
        Ok(format!("The best page is {}/{}", base, last.replace(' ', "-")))
    })
}

async fn setup() -> (MockServer, TaskGateway) {
    let server = MockServer::start().await;
    for (route, body) in [("/growing-tomatoes", TOMATO_PAGE), ("/brewing-coffee", COFFEE_PAGE)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/broken-page"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = create_gateway_with_llm(&AppConfig::default(), Arc::new(scripted_llm(server.uri())))
        .await
        .unwrap();
    (server, gateway)
}

async fn finish(gateway: &TaskGateway, task_id: &str) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(10), gateway.wait_for_terminal(task_id))
        .await
        .expect("pipeline did not finish in time")
        .unwrap()
}

#[tokio::test]
async fn test_growing_tomatoes_reaches_done() {
    let (server, gateway) = setup().await;

    let created = gateway.create_task("growing tomatoes").await.unwrap();
    assert_eq!(created.status, TaskStatus::Created);
    assert_eq!(finish(&gateway, &created.task_id).await, TaskStatus::Done);

    let record = gateway.get_result(&created.task_id).await.unwrap();
    assert_eq!(record.query, "growing tomatoes");
    assert_eq!(record.source_reference, format!("{}/growing-tomatoes", server.uri()));
    assert!(record.content.contains("Tomatoes need full sun."));
    assert!(!record.content.contains("Home | Garden"));
}

#[tokio::test]
async fn test_fetch_server_error_ends_in_error() {
    let (_server, gateway) = setup().await;

    let created = gateway.create_task("broken page").await.unwrap();
    assert_eq!(finish(&gateway, &created.task_id).await, TaskStatus::Error);

    let task = gateway.get_task(&created.task_id).await.unwrap();
    let detail = task.error_detail.clone().unwrap();
    assert!(detail.contains("HTTP 500"), "{detail}");
    assert!(task.extraction().is_none());
    assert!(matches!(
        gateway.get_result(&created.task_id).await,
        Err(PipelineError::NotReady { status: TaskStatus::Error, .. })
    ));
}

#[tokio::test]
async fn test_empty_query_creates_nothing() {
    let (_server, gateway) = setup().await;
    let err = gateway.create_task("").await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_concurrent_tasks_keep_their_own_source() {
    let (server, gateway) = setup().await;

    let tomatoes = gateway.create_task("growing tomatoes").await.unwrap();
    let coffee = gateway.create_task("brewing coffee").await.unwrap();
    assert_ne!(tomatoes.task_id, coffee.task_id);

    assert_eq!(finish(&gateway, &tomatoes.task_id).await, TaskStatus::Done);
    assert_eq!(finish(&gateway, &coffee.task_id).await, TaskStatus::Done);

    let tomatoes = gateway.get_result(&tomatoes.task_id).await.unwrap();
    let coffee = gateway.get_result(&coffee.task_id).await.unwrap();
    assert_eq!(tomatoes.source_reference, format!("{}/growing-tomatoes", server.uri()));
    assert_eq!(coffee.source_reference, format!("{}/brewing-coffee", server.uri()));
    assert!(coffee.content.contains("Grind the beans"));
    assert!(!coffee.content.contains("Tomatoes"));
}

#[tokio::test]
async fn test_synthesize_input_is_extract_output() {
    let (_server, gateway) = setup().await;

    let created = gateway.create_task("growing tomatoes").await.unwrap();
    finish(&gateway, &created.task_id).await;

    let task = gateway.get_task(&created.task_id).await.unwrap();
    let findings = task.findings().unwrap();
    let extraction = task.extraction().unwrap();
    assert!(findings.contains("/growing-tomatoes"));
    assert_eq!(
        task.content().unwrap(),
        format!("# Tutorial\n{}", extraction.extracted_text)
    );
    assert_eq!(task.source_reference.as_deref(), Some(extraction.source_reference.as_str()));
}

#[tokio::test]
async fn test_reads_after_done_are_idempotent() {
    let (_server, gateway) = setup().await;

    let created = gateway.create_task("growing tomatoes").await.unwrap();
    finish(&gateway, &created.task_id).await;

    let first = gateway.get_result(&created.task_id).await.unwrap();
    for _ in 0..3 {
        assert_eq!(gateway.get_status(&created.task_id).await.unwrap(), TaskStatus::Done);
        assert_eq!(gateway.get_result(&created.task_id).await.unwrap(), first);
    }
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (_server, gateway) = setup().await;
    assert!(matches!(
        gateway.get_status("task_does_not_exist").await,
        Err(PipelineError::NotFound(_))
    ));
    assert!(matches!(
        gateway.get_result("task_does_not_exist").await,
        Err(PipelineError::NotFound(_))
    ));
}

#[cfg(feature = "async-sqlite")]
#[tokio::test]
async fn test_result_survives_in_sqlite() {
    use scribe::persistence::{RecordSink, SqliteRecordSink};

    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("scribe.db");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/growing-tomatoes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOMATO_PAGE))
        .mount(&server)
        .await;

    let mut cfg = AppConfig::default();
    cfg.storage.db_path = Some(db_path.clone());
    let gateway = create_gateway_with_llm(&cfg, Arc::new(scripted_llm(server.uri())))
        .await
        .unwrap();

    let created = gateway.create_task("growing tomatoes").await.unwrap();
    assert_eq!(finish(&gateway, &created.task_id).await, TaskStatus::Done);

    let sink = SqliteRecordSink::new(&db_path).await.unwrap();
    let stored = sink.find(&created.task_id).await.unwrap().unwrap();
    assert_eq!(stored, gateway.get_result(&created.task_id).await.unwrap());
}
