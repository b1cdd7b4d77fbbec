use std::time::Duration;

use sire_client::{report_params, SireClient, SireError};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SireClient {
    SireClient::with_base_urls(server.uri(), server.uri())
        .with_polling(Duration::from_millis(10), Duration::from_millis(500))
}

#[tokio::test]
async fn token_exchange_returns_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/clientessol/cid/oauth2/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-123",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let creds = client
        .request_token("cid", "secret", "20123456789", "USER1", "clave")
        .await
        .unwrap();
    assert_eq!(creds.token, "tok-123");
    assert!(creds.expires_at > chrono::Utc::now());
}

#[tokio::test]
async fn token_rejection_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/clientessol/.*/oauth2/token/$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Usuario o clave incorrectos"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .request_token("cid", "secret", "20123456789", "USER1", "mala")
        .await
        .unwrap_err();
    match err {
        SireError::Auth(msg) => assert!(msg.contains("Usuario o clave incorrectos")),
        other => panic!("expected Auth, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_export_returns_ticket_number() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"exportacioncomprobantepropuesta$"))
        .and(query_param("codTipoArchivo", "1"))
        .and(query_param("fecEmisionIni", "2025-08-01"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"numTicket": "T-42"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let ticket = client
        .submit_export("tok", "202508", "2025-08-01", "2025-08-31")
        .await
        .unwrap();
    assert_eq!(ticket, "T-42");
}

#[tokio::test]
async fn submit_export_empty_period_is_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"exportacioncomprobantepropuesta$"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "errors": [{"cod": "1070", "msg": "No existe información para el periodo"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit_export("tok", "202508", "2025-08-01", "2025-08-31")
        .await
        .unwrap_err();
    assert!(matches!(err, SireError::NoData));
}

#[tokio::test]
async fn submit_export_numeric_no_data_code_is_recognized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"exportacioncomprobantepropuesta$"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "errors": [{"cod": 1070, "msg": "Sin información"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit_export("tok", "202508", "2025-08-01", "2025-08-31")
        .await
        .unwrap_err();
    assert!(matches!(err, SireError::NoData));
}

#[tokio::test]
async fn submit_export_without_ticket_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"exportacioncomprobantepropuesta$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"otro": 1})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit_export("tok", "202508", "2025-08-01", "2025-08-31")
        .await
        .unwrap_err();
    assert!(matches!(err, SireError::MalformedResponse { .. }));
}

#[tokio::test]
async fn wait_until_done_polls_to_terminal_state() {
    let server = MockServer::start().await;
    // First two polls report in-progress, the third reports done.
    Mock::given(method("GET"))
        .and(path_regex(r"consultaestadotickets$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "registros": [{
                "numTicket": "T-42",
                "codEstadoProceso": "03",
                "desEstadoProceso": "En proceso"
            }]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"consultaestadotickets$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "registros": [{
                "numTicket": "T-42",
                "codEstadoProceso": "06",
                "desEstadoProceso": "Terminado",
                "codProceso": "9",
                "archivoReporte": [
                    {"nomArchivoReporte": "reporte.zip", "codTipoAchivoReporte": "01"}
                ]
            }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = client.wait_until_done("tok", "202508", "T-42").await.unwrap();
    assert!(record.is_done());

    let params = report_params(&record).unwrap();
    assert_eq!(params.file_name, "reporte.zip");
    assert_eq!(params.file_type, "01");
    assert_eq!(params.process_code, "9");
}

#[tokio::test]
async fn wait_until_done_times_out_on_stuck_ticket() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"consultaestadotickets$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "registros": [{
                "numTicket": "T-42",
                "codEstadoProceso": "03",
                "desEstadoProceso": "En proceso"
            }]
        })))
        .mount(&server)
        .await;

    let client = SireClient::with_base_urls(server.uri(), server.uri())
        .with_polling(Duration::from_millis(5), Duration::from_millis(30));
    let err = client.wait_until_done("tok", "202508", "T-42").await.unwrap_err();
    match err {
        SireError::Timeout { ticket, .. } => assert_eq!(ticket, "T-42"),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_token_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"consultaestadotickets$"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.ticket_status("tok", "202508", "T-42").await.unwrap_err();
    assert!(matches!(err, SireError::Auth(_)));
}

#[tokio::test]
async fn download_report_returns_raw_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"archivoreporte$"))
        .and(query_param("nomArchivoReporte", "reporte.zip"))
        .and(query_param("codLibro", "080000"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04contenido".to_vec()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = sire_client::ReportParams {
        file_name: "reporte.zip".into(),
        file_type: "01".into(),
        process_code: "9".into(),
    };
    let bytes = client
        .download_report("tok", "202508", "T-42", &params)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"consultaestadotickets$"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.ticket_status("tok", "202508", "T-42").await.unwrap_err();
    assert!(err.is_transient());
}
