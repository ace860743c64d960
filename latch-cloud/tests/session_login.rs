// latch-cloud/tests/session_login.rs
// 登录与设备列表集成测试, 用本地 TCP stub 模拟后端

use latch_cloud::{CloudConfig, CloudError, CloudSession};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP/1.1 stub: one canned answer per request, connection
/// closed after each response.
async fn spawn_stub<F>(handler: F) -> String
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let header_end = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.trim().eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
                let (status, reply) = handler(&path, &body);
                let response = format!(
                    "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    reply.len(),
                    reply
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    base
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        _ => "Error",
    }
}

/// Base URL nothing listens on, so requests fail at connect
fn refused_base() -> String {
    let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = sock.local_addr().unwrap().port();
    drop(sock);
    format!("http://127.0.0.1:{port}")
}

fn session_against(base: &str) -> CloudSession {
    CloudSession::new(
        CloudConfig::new("17300000000", "secret")
            .with_base_url(base)
            .with_timeout(5),
    )
    .unwrap()
}

#[tokio::test]
async fn login_extracts_identity_and_token() {
    let base = spawn_stub(|path, body| {
        assert_eq!(path, "/speaker/oauth2/loginPassword");
        // Password goes over the wire hashed, never in clear
        assert!(body.contains(r#""countrycode":86"#));
        assert!(body.contains(r#""phone":"17300000000""#));
        assert!(!body.contains("secret"));
        (
            200,
            r#"&&&START&&&{"code":0,"data":{"id":"u1","token":"tok1","ssecurity":"sec1"}}"#
                .to_string(),
        )
    })
    .await;

    let mut session = session_against(&base);
    assert!(session.login().await.unwrap());
    assert!(session.is_logged_in());
    assert_eq!(session.user_id(), Some("u1"));
    assert_eq!(session.service_token(), Some("tok1"));
    assert_eq!(session.security_key(), Some("sec1"));
    assert_eq!(session.identity(), "u1");
    assert_eq!(session.failed_logins(), 0);
}

#[tokio::test]
async fn numeric_user_id_is_accepted() {
    let base = spawn_stub(|_, _| {
        (
            200,
            r#"{"code":0,"data":{"id":8273645,"token":"tok1"}}"#.to_string(),
        )
    })
    .await;

    let mut session = session_against(&base);
    assert!(session.login().await.unwrap());
    assert_eq!(session.user_id(), Some("8273645"));
}

#[tokio::test]
async fn login_is_skipped_once_logged_in() {
    // No backend at all: a session holding identity and token must not
    // touch the network again.
    let mut session = session_against(&refused_base());
    session.restore(&latch_cloud::StoredAuth::new(
        "17300000000",
        "cn",
        "u1",
        "tok1",
        "",
    ));
    assert!(session.login().await.unwrap());
    assert_eq!(session.failed_logins(), 0);
}

#[tokio::test]
async fn rejected_login_raises_access_denied() {
    let base = spawn_stub(|_, _| (401, r#"{"code":401,"message":"bad password"}"#.to_string())).await;

    let mut session = session_against(&base);
    let err = session.login().await.unwrap_err();
    match err {
        CloudError::AccessDenied(msg) => assert!(msg.contains("Access denied")),
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    assert_eq!(session.failed_logins(), 1);
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn unreachable_backend_reports_false_not_an_error() {
    let mut session = session_against(&refused_base());
    assert!(!session.login().await.unwrap());
    assert_eq!(session.failed_logins(), 1);
}

#[tokio::test]
async fn repeated_rejections_reset_the_session() {
    let base = spawn_stub(|_, _| (401, "{}".to_string())).await;

    let mut session = session_against(&base);
    for attempt in 1..=10u32 {
        assert!(session.login().await.is_err());
        assert_eq!(session.failed_logins(), attempt);
    }
    // The attempt that crosses the threshold wipes the counter with the
    // rest of the session state, and still reports failure.
    assert!(session.login().await.is_err());
    assert_eq!(session.failed_logins(), 0);
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn device_list_decodes_records() {
    let base = spawn_stub(|path, body| match path {
        "/speaker/oauth2/loginPassword" => (
            200,
            r#"{"code":0,"data":{"id":"u1","token":"tok1"}}"#.to_string(),
        ),
        "/speaker/device/getUserDevice" => {
            assert!(body.contains(r#""token":"tok1""#));
            assert!(body.contains(r#""userId":"u1""#));
            (
                200,
                r#"&&&START&&&{"code":0,"data":[
                    {"id":"lock1","did":"xlock1x9","name":"Front Door","pid":"7","parent_id":"","mac":"AA:BB","localip":"10.0.0.9"},
                    {"id":"d1","did":"xd1x9","name":"Inner Part","pid":"21","parent_id":"d1x"}
                ]}"#
                .to_string(),
            )
        }
        other => panic!("unexpected path {other}"),
    })
    .await;

    let mut session = session_against(&base);
    assert!(session.login().await.unwrap());
    let devices = session.get_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name, "Front Door");
    assert!(!devices[0].is_hidden());
    assert!(devices[1].is_hidden());
}

#[tokio::test]
async fn device_list_rejection_is_access_denied() {
    let base = spawn_stub(|_, _| (401, "{}".to_string())).await;

    let session = session_against(&base);
    let err = session.get_devices().await.unwrap_err();
    assert!(matches!(err, CloudError::AccessDenied(_)));
}

#[tokio::test]
async fn miot_request_unwraps_the_result_field() {
    let base = spawn_stub(|path, body| {
        assert_eq!(path, "/miotspec/prop/get");
        assert!(body.contains(r#""params""#));
        (
            200,
            r#"{"code":0,"result":[{"did":"d1","siid":7,"piid":1,"value":false,"code":0}]}"#
                .to_string(),
        )
    })
    .await;

    let session = session_against(&base);
    let value = session.get_prop("d1", 7, 1).await.unwrap();
    assert_eq!(value, Some(serde_json::json!(false)));
}

#[tokio::test]
async fn check_access_distinguishes_denied_from_transient() {
    let ok = spawn_stub(|_, _| (200, "{}".to_string())).await;
    assert!(session_against(&ok).check_access().await.unwrap());

    let denied = spawn_stub(|_, _| (403, "{}".to_string())).await;
    let err = session_against(&denied).check_access().await.unwrap_err();
    assert!(matches!(err, CloudError::AccessDenied(_)));

    let broken = spawn_stub(|_, _| (500, "{}".to_string())).await;
    let err = session_against(&broken).check_access().await.unwrap_err();
    assert!(matches!(err, CloudError::Transient(_)));
}
