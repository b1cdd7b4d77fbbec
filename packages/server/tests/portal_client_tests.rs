//! Driver client behavior against a mocked automation sidecar.

use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use server::kernel::portal_client::PortalDriverFactory;
use server::kernel::traits::{
    DocumentOutcome, DocumentRequest, DriverError, DriverFactory, PortalCredentials,
};

fn credentials() -> PortalCredentials {
    PortalCredentials {
        ruc: "20123456789".into(),
        sol_user: "USER1".into(),
        sol_key: "secret".into(),
    }
}

async fn mock_session_open(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "session_id": "s-1" })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_passes_credentials_through() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/login"))
        .and(body_json(serde_json::json!({
            "ruc": "20123456789",
            "sol_user": "USER1",
            "sol_key": "secret",
        })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.mailbox_session(true).await.unwrap();
    driver.login(&credentials()).await.unwrap();
}

#[tokio::test]
async fn rejected_login_is_an_auth_error() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad sol key"))
        .mount(&server)
        .await;

    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.mailbox_session(true).await.unwrap();
    let err = driver.login(&credentials()).await.unwrap_err();
    assert!(matches!(err, DriverError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn open_mailbox_returns_row_count() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/mailbox/open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "rows": 7 })))
        .mount(&server)
        .await;

    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.mailbox_session(true).await.unwrap();
    assert_eq!(driver.open_mailbox().await.unwrap(), 7);
}

#[tokio::test]
async fn expired_session_surfaces_as_auth_mid_scan() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-1/mailbox/panel"))
        .respond_with(ResponseTemplate::new(403).set_body_string("session expired"))
        .mount(&server)
        .await;

    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.mailbox_session(true).await.unwrap();
    let err = driver.panel_text().await.unwrap_err();
    assert!(matches!(err, DriverError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn fetch_document_writes_the_artifact() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/documents/fetch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-file-name", "F001-123.xml")
                .set_body_bytes(b"<xml/>".to_vec()),
        )
        .mount(&server)
        .await;

    let dest = std::env::temp_dir().join(format!("portal-test-{}", uuid::Uuid::new_v4()));
    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.document_session(true).await.unwrap();
    let request = DocumentRequest {
        item_id: "0001-1".into(),
        doc_type: "01".into(),
        series: Some("F001".into()),
        number: Some("123".into()),
        supplier_ruc: Some("20555555551".into()),
        kind: "xml".into(),
    };

    match driver.fetch_document(&request, &dest).await.unwrap() {
        DocumentOutcome::Fetched { path, sha256 } => {
            assert!(path.ends_with("F001-123.xml"));
            assert_eq!(std::fs::read(&path).unwrap(), b"<xml/>");
            assert_eq!(sha256.len(), 64);
        }
        other => panic!("expected fetched artifact, got {other:?}"),
    }
    let _ = std::fs::remove_dir_all(dest);
}

#[tokio::test]
async fn missing_artifact_is_not_found_not_an_error() {
    let server = MockServer::start().await;
    mock_session_open(&server).await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/documents/fetch"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dest = std::env::temp_dir().join(format!("portal-test-{}", uuid::Uuid::new_v4()));
    let factory = PortalDriverFactory::new(server.uri());
    let mut driver = factory.document_session(true).await.unwrap();
    let request = DocumentRequest {
        item_id: "0001-2".into(),
        doc_type: "01".into(),
        series: Some("F001".into()),
        number: Some("456".into()),
        supplier_ruc: None,
        kind: "xml".into(),
    };

    let outcome = driver.fetch_document(&request, &dest).await.unwrap();
    assert!(matches!(outcome, DocumentOutcome::NotFound));
}
