//! Integration tests for the west.cn DNS-01 provider against a mocked registrar API.

use std::sync::Arc;

use async_trait::async_trait;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cp_acme::{ChallengeError, ChallengeRecord, ChallengeSolver};
use cp_dns::{DnsError, DnsResult, ZoneResolver};
use cp_west::{WestClient, WestDnsProvider, WestError};

const DUPLICATE_ERRCODE: i64 = 50004;

struct StaticZone(&'static str);

#[async_trait]
impl ZoneResolver for StaticZone {
    async fn find_zone(&self, _fqdn: &str) -> DnsResult<String> {
        Ok(self.0.to_string())
    }
}

struct NoZone;

#[async_trait]
impl ZoneResolver for NoZone {
    async fn find_zone(&self, fqdn: &str) -> DnsResult<String> {
        Err(DnsError::ZoneNotFound(fqdn.to_string()))
    }
}

fn provider(server: &MockServer, zones: Arc<dyn ZoneResolver>) -> WestDnsProvider {
    let api = WestClient::new(&server.uri(), "user", "secret").unwrap();
    WestDnsProvider::new(api, zones, Some(DUPLICATE_ERRCODE))
}

async fn mount_add(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/domain/"))
        .and(query_param("act", "adddnsrecord"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_delete(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/domain/"))
        .and(query_param("act", "deldnsrecord"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "errcode": 0, "msg": ""
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_present_sends_expected_form() {
    let server = MockServer::start().await;
    let value = ChallengeRecord::new("example.com", "tok.thumb").value;

    Mock::given(method("POST"))
        .and(path("/domain/"))
        .and(query_param("act", "adddnsrecord"))
        .and(body_string_contains("domain=example.com"))
        .and(body_string_contains("host=_acme-challenge"))
        .and(body_string_contains("type=TXT"))
        .and(body_string_contains(format!("value={}", value)))
        .and(body_string_contains("ttl=60"))
        .and(body_string_contains("level=10"))
        .and(body_string_contains("username=user"))
        .and(body_string_contains("token="))
        .and(body_string_contains("time="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "clientid": "c1", "data": { "id": 1234 }, "msg": "", "errcode": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    provider.present("example.com", "tok", "tok.thumb").await.unwrap();

    let session = provider.session("example.com", "tok", "tok.thumb").unwrap();
    assert_eq!(session.record_id, 1234);
    assert_eq!(session.zone, "example.com");
}

#[tokio::test]
async fn test_cleanup_exactly_once() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "data": { "id": 99 }
        })),
    )
    .await;
    mount_delete(&server, 1).await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    provider.present("example.com", "tok", "tok.thumb").await.unwrap();

    provider.cleanup("example.com", "tok", "tok.thumb").await.unwrap();
    assert_eq!(provider.session_count(), 0);

    let second = provider.cleanup("example.com", "tok", "tok.thumb").await;
    assert!(matches!(second, Err(ChallengeError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_cleanup_without_present_fails() {
    let server = MockServer::start().await;
    mount_delete(&server, 0).await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    let result = provider.remove_challenge("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(WestError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_failed_delete_still_drops_session() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "data": { "id": 5 }
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(query_param("act", "deldnsrecord"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": 10001, "msg": "delete failed"
        })))
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    provider.present("example.com", "tok", "tok.thumb").await.unwrap();

    let result = provider.cleanup("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(ChallengeError::Provider(_))));
    assert_eq!(provider.session_count(), 0);
}

#[tokio::test]
async fn test_duplicate_record_is_adopted() {
    let server = MockServer::start().await;
    let value = ChallengeRecord::new("*.example.com", "tok.thumb").value;

    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": DUPLICATE_ERRCODE, "msg": "record exists"
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/domain/"))
        .and(query_param("act", "getdnsrecord"))
        .and(body_string_contains("domain=example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200,
            "data": [
                { "id": 10, "item": "www", "value": "1.2.3.4", "type": "A" },
                { "id": 11, "item": "_acme-challenge", "value": "stale", "type": "TXT" },
                { "id": 12, "item": "_acme-challenge", "value": value, "type": "TXT" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    provider.present("*.example.com", "tok", "tok.thumb").await.unwrap();

    let session = provider.session("*.example.com", "tok", "tok.thumb").unwrap();
    assert_eq!(session.record_id, 12);
}

#[tokio::test]
async fn test_duplicate_without_match_fails() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": DUPLICATE_ERRCODE, "msg": "record exists"
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(query_param("act", "getdnsrecord"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200,
            "data": [{ "id": 11, "item": "_acme-challenge", "value": "other", "type": "TXT" }]
        })))
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    let result = provider.add_challenge("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(WestError::DuplicateNotFound { .. })));
    assert_eq!(provider.session_count(), 0);
}

#[tokio::test]
async fn test_duplicate_when_list_fails() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": DUPLICATE_ERRCODE, "msg": "record exists"
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(query_param("act", "getdnsrecord"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": 1, "msg": "list failed"
        })))
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    let result = provider.add_challenge("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(WestError::Api { errcode: 1, .. })));
}

#[tokio::test]
async fn test_other_errcode_skips_read_back() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 500, "errcode": 10002, "msg": "bad token"
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(query_param("act", "getdnsrecord"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    let result = provider.add_challenge("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(WestError::Api { errcode: 10002, .. })));
}

#[tokio::test]
async fn test_gbk_error_message_is_decoded() {
    let server = MockServer::start().await;
    let (body, _, _) =
        encoding_rs::GBK.encode(r#"{"result":500,"errcode":10003,"msg":"域名不存在"}"#);
    mount_add(&server, ResponseTemplate::new(200).set_body_bytes(body.into_owned())).await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    match provider.add_challenge("example.com", "tok", "tok.thumb").await {
        Err(WestError::Api { errcode, msg }) => {
            assert_eq!(errcode, 10003);
            assert_eq!(msg, "域名不存在");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zone_resolution_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(NoZone));
    let result = provider.present("example.com", "tok", "tok.thumb").await;
    assert!(matches!(result, Err(ChallengeError::ZoneResolution { .. })));
}

#[tokio::test]
async fn test_subdomain_host_relative_to_zone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("act", "adddnsrecord"))
        .and(body_string_contains("host=_acme-challenge.shop"))
        .and(body_string_contains("domain=example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "data": { "id": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Arc::new(StaticZone("example.com")));
    provider.present("shop.example.com", "tok", "tok.thumb").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_collide() {
    let server = MockServer::start().await;
    mount_add(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": 200, "data": { "id": 1 }
        })),
    )
    .await;
    mount_delete(&server, 20).await;

    let provider = Arc::new(provider(&server, Arc::new(StaticZone("example.com"))));
    let mut handles = Vec::new();
    for i in 0..20 {
        let provider = provider.clone();
        handles.push(tokio::spawn(async move {
            let domain = format!("d{}.example.com", i);
            let token = format!("tok{}", i);
            let key_auth = format!("{}.thumb", token);
            provider.present(&domain, &token, &key_auth).await.unwrap();
            provider.cleanup(&domain, &token, &key_auth).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(provider.session_count(), 0);
}
