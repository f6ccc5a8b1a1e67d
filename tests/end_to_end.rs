use std::sync::Arc;

use assay::executor::ClientOptions;
use assay::executor::HttpTransport;
use assay::model::AssertionKind;
use assay::model::AssertionSpec;
use assay::model::Environment;
use assay::model::ExecutionStatus;
use assay::model::Operator;
use assay::model::RequestTemplate;
use assay::model::SuiteStatus;
use assay::model::TestDefinition;
use assay::parser::Assay;
use assay::runner::Runner;
use assay::store::MemoryStore;
use assay::store::ResultStore;
use assay::validator::Validator;
use reqwest::Method;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn runner(store: Arc<MemoryStore>) -> Runner {
    let transport = HttpTransport::new(&ClientOptions::default()).unwrap();
    Runner::new(Arc::new(transport), store)
}

#[tokio::test]
async fn substituted_request_passes_status_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .mount(&server)
        .await;

    let environment = Environment {
        name: "local".into(),
        variables: [
            ("base_url".to_string(), server.uri()),
            ("user_id".to_string(), "42".to_string()),
        ]
        .into(),
        is_default: true,
    };
    let request = RequestTemplate::new("get-user", Method::GET, "{{base_url}}/users/{{user_id}}");
    let test = TestDefinition::new("user exists", Arc::new(request)).with_assertion(
        AssertionSpec::new(AssertionKind::StatusCode, 200, Operator::Equals),
    );

    let store = Arc::new(MemoryStore::new());
    let result = runner(store.clone())
        .with_environment(Some(&environment))
        .run_test(&test)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Passed);
    let outcome = &result.evaluation.as_ref().unwrap().assertions[0];
    assert_eq!(outcome.kind, AssertionKind::StatusCode);
    assert_eq!(outcome.expected, json!(200));
    assert_eq!(outcome.actual, json!(200));
    assert!(outcome.passed);

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.total_results, 1);
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn workspace_file_runs_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_json(json!({"status": "ok", "checks": [{"name": "db", "up": true}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;

    let src = format!(
        r#"
        [settings]
        concurrency = 2

        [[environments]]
        name = "local"
        default = true
        variables = {{ base_url = "{}", token = "s3cret" }}

        [[requests]]
        name = "health"
        method = "GET"
        url = "{{{{base_url}}}}/health"

        [[requests]]
        name = "create-order"
        method = "POST"
        url = "{{{{base_url}}}}/orders"
        body = '{{"sku": "A-1"}}'
        auth = {{ type = "bearer", token = "{{{{token}}}}" }}

        [[tests]]
        name = "healthy"
        request = "health"
        assertions = [
          {{ type = "status_code", expected = 200 }},
          {{ type = "header", header_name = "Content-Type", expected = "json", operator = "contains" }},
          {{ type = "body_json", json_path = "checks.0.up", expected = true }},
        ]

        [[tests]]
        name = "order created"
        request = "create-order"
        assertions = [
          {{ type = "status_code", expected = 201 }},
          {{ type = "body_contains", text = "created" }},
        ]

        [[tests]]
        name = "order is instant"
        request = "create-order"
        assertions = [{{ type = "status_code", expected = 200 }}]
        "#,
        server.uri()
    );

    let assay: Assay = toml::from_str(&src).unwrap();
    let workspace = Validator::new(&assay, &src, "assay.toml").validate().unwrap();
    let suite = workspace.suite("default").unwrap();

    let store = Arc::new(MemoryStore::new());
    let result = runner(store.clone())
        .with_environment(workspace.default_environment())
        .with_concurrency(workspace.settings.concurrency)
        .run_suite(suite)
        .await;

    assert_eq!(result.environment.as_deref(), Some("local"));
    assert_eq!(result.total_tests, 3);
    assert_eq!(result.passed_tests, 2);
    assert_eq!(result.failed_tests, 1);
    assert_eq!(result.status, SuiteStatus::Failed);

    let statuses: Vec<_> = result.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [
            ExecutionStatus::Passed,
            ExecutionStatus::Passed,
            ExecutionStatus::Failed
        ]
    );

    let recent = store.recent_executions(1).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn unreachable_host_is_an_error_not_a_failure() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = format!("http://127.0.0.1:{port}/never");
    let request = RequestTemplate::new("down", Method::GET, &url);
    let test = TestDefinition::new("down", Arc::new(request)).with_assertion(AssertionSpec::new(
        AssertionKind::StatusCode,
        200,
        Operator::Equals,
    ));

    let result = runner(Arc::new(MemoryStore::new()))
        .run_test(&test)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.error_message.is_some());
    assert!(result.response.unwrap().status_code.is_none());
}
