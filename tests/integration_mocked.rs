/// Integration tests with a mocked World Bank API and in-memory blob storage
/// Tests the extract and transform steps without hitting real external services
use object_store::memory::InMemory;
use std::sync::Arc;
use std::time::Duration;
use wb_loans_pipeline::blob_storage::BlobStore;
use wb_loans_pipeline::extractor::{extract, WorldBankClient};
use wb_loans_pipeline::models::Step;
use wb_loans_pipeline::transformer::{parse_bronze, transform};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESOURCE_PATH: &str = "/resource/zucq-nrc3.json";

/// Helper function to create a client pointed at the mock server
fn create_test_client(mock_server: &MockServer, row_limit: u32) -> WorldBankClient {
    WorldBankClient::new(
        format!("{}{}", mock_server.uri(), RESOURCE_PATH),
        row_limit,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn create_test_store() -> BlobStore {
    BlobStore::new(Arc::new(InMemory::new()), "rfd-container")
}

fn loan(number: &str, country: &str, principal: &str) -> serde_json::Value {
    serde_json::json!({
        "end_of_period": "2024-09-30T00:00:00.000",
        "loan_number": number,
        "region": "Western and Central Africa",
        "country_code": "3A",
        "country": country,
        "loan_status": "Disbursing",
        "original_principal_amount": principal,
        "repaid_to_ibrd": "0",
        "repaid_3rd_party": "0",
        "undisbursed_amount": "0"
    })
}

#[tokio::test]
async fn test_extract_writes_bronze_artifact() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        loan("IBRD00010", "Cote d'Ivoire", "500"),
        loan("IBRD00020", "Cote d'Ivoire", "300"),
    ]);

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .and(query_param("$limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 2);
    let store = create_test_store();

    let report = extract(&client, &store, "bronze.csv").await.unwrap();

    assert_eq!(report.step, Step::Extract);
    assert_eq!(report.rows, Some(2));
    assert!(report.message.contains("rfd-container/bronze.csv"));
    assert_eq!(report.checksum.as_ref().map(|c| c.len()), Some(64));

    let bronze = store.read_file("bronze.csv").await.unwrap();
    let header: Vec<&str> = bronze.lines().next().unwrap().split(',').collect();
    assert_eq!(header.len(), 10);
    for column in ["end_of_period", "loan_number", "country_code", "repaid_to_ibrd"] {
        assert!(header.contains(&column), "missing column {}", column);
    }
    assert_eq!(bronze.lines().count(), 3);
    assert!(!bronze.contains('\r'));
}

#[tokio::test]
async fn test_extract_overwrites_previous_artifact() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([loan("IBRD00010", "Chile", "1")])),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 10);
    let store = create_test_store();
    store
        .load_string("stale,data\n1,2\n", "bronze.csv", true)
        .await
        .unwrap();

    extract(&client, &store, "bronze.csv").await.unwrap();

    let bronze = store.read_file("bronze.csv").await.unwrap();
    assert!(!bronze.contains("stale"));
    assert!(bronze.contains("IBRD00010"));
}

#[tokio::test]
async fn test_extract_api_error_is_propagated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 10);
    let store = create_test_store();

    let result = extract(&client, &store, "bronze.csv").await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("500"));
    // Nothing was staged, so the next step cannot pick up a phantom artifact
    assert!(store.read_file("bronze.csv").await.unwrap_err().is_missing_artifact());
}

#[tokio::test]
async fn test_extract_rejects_non_array_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"message": "rate limited"})),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 10);
    let store = create_test_store();

    let result = extract(&client, &store, "bronze.csv").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_extract_then_transform_end_to_end() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        loan("IBRD00010", "Cote d'Ivoire", "500"),
        loan("IBRD00020", "Cote d'Ivoire", "300"),
        loan("IBRD00030", "Cote d'Ivoire", "0"),
    ]);

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 50_000);
    let store = create_test_store();

    extract(&client, &store, "bronze.csv").await.unwrap();
    let report = transform(&store, "bronze.csv", "silver.csv").await.unwrap();
    assert_eq!(report.rows, Some(3));

    let silver = store.read_file("silver.csv").await.unwrap();
    let loans = parse_bronze(&silver).unwrap();
    assert!(loans
        .iter()
        .all(|l| l.region.as_deref() == Some("WESTERN AND CENTRAL AFRICA")));
    let total: f64 = loans.iter().map(|l| l.debt_remaining).sum();
    assert_eq!(total, 800.0);
}

#[tokio::test]
async fn test_transform_fails_on_payload_without_repayment_columns() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"loan_number": "IBRD00010", "region": "Africa", "country": "Kenya",
             "loan_status": "Repaying", "original_principal_amount": "10",
             "undisbursed_amount": "0"}
        ])))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server, 10);
    let store = create_test_store();

    extract(&client, &store, "bronze.csv").await.unwrap();

    let err = transform(&store, "bronze.csv", "silver.csv")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("repaid_to_ibrd"));
    assert!(store.read_file("silver.csv").await.is_err());
}

#[tokio::test]
async fn test_transform_three_records_sum_to_800() {
    let store = create_test_store();
    let bronze = "\
loan_number,region,country,loan_status,original_principal_amount,repaid_to_ibrd,repaid_3rd_party,undisbursed_amount
IBRD00010,Western and Central Africa,Cote d'Ivoire,Disbursing,500,,,0
IBRD00020,Western and Central Africa,Cote d'Ivoire,Disbursing,300,,,0
IBRD00030,Western and Central Africa,Cote d'Ivoire,Disbursing,0,,,0
";
    store.load_string(bronze, "bronze.csv", true).await.unwrap();

    let report = transform(&store, "bronze.csv", "silver.csv").await.unwrap();
    assert_eq!(report.step, Step::Transform);
    assert_eq!(report.rows, Some(3));

    let silver = store.read_file("silver.csv").await.unwrap();
    let mut reader = csv::Reader::from_reader(silver.as_bytes());
    let loans: Vec<wb_loans_pipeline::models::SilverLoan> =
        reader.deserialize().collect::<Result<_, _>>().unwrap();

    assert_eq!(loans.len(), 3);
    assert!(loans
        .iter()
        .all(|l| l.country.as_deref() == Some("COTE DIVOIRE")));
    let total: f64 = loans.iter().map(|l| l.debt_remaining).sum();
    assert_eq!(total, 800.0);
}

#[tokio::test]
async fn test_transform_without_bronze_reports_missing_artifact() {
    let store = create_test_store();

    let err = transform(&store, "bronze.csv", "silver.csv")
        .await
        .unwrap_err();

    assert!(err.is_missing_artifact());
}

#[tokio::test]
async fn test_silver_output_reparses_as_bronze() {
    // Silver is a superset of the bronze projection, so transforming it again
    // must leave every record unchanged.
    let store = create_test_store();
    let bronze = "\
loan_number,region,country,loan_status,original_principal_amount,repaid_to_ibrd,repaid_3rd_party,undisbursed_amount
 ibrd 0001 ,East  Asia and Pacific,China,Fully Repaid,1000,200,,
";
    store.load_string(bronze, "bronze.csv", true).await.unwrap();
    transform(&store, "bronze.csv", "silver.csv").await.unwrap();

    let silver = store.read_file("silver.csv").await.unwrap();
    let first = parse_bronze(bronze).unwrap();
    let second = parse_bronze(&silver).unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0].loan_number.as_deref(), Some("IBRD 0001"));
    assert_eq!(first[0].region.as_deref(), Some("EAST ASIA AND PACIFIC"));
    assert_eq!(first[0].debt_remaining, 800.0);
}

#[tokio::test]
async fn test_concurrent_extracts_to_separate_blobs() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([loan("IBRD00010", "Peru", "10")])),
        )
        .expect(4)
        .mount(&mock_server)
        .await;

    let store = create_test_store();

    let mut handles = vec![];
    for i in 0..4 {
        let client = create_test_client(&mock_server, 10);
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            extract(&client, &store, &format!("run-{}/bronze.csv", i)).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
    for i in 0..4 {
        assert!(store
            .read_file(&format!("run-{}/bronze.csv", i))
            .await
            .is_ok());
    }
}
