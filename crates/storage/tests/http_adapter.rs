use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use revise_core::model::{DocumentId, NewSession, SessionTag};
use serde_json::{Value, json};
use storage::auth::AuthContext;
use storage::http::{HttpConfig, HttpRepository};
use storage::repository::{
    ExamQuery, ExamRepository, RelationField, RelationOp, SessionRepository, StorageError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    url: Url,
    authorization: Option<String>,
    body: String,
}

impl Recorded {
    fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Answers each incoming connection with the next canned response.
struct StubStore {
    addr: SocketAddr,
    recorded: Arc<Mutex<Vec<Recorded>>>,
}

impl StubStore {
    async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (stream, _) = listener.accept().await.unwrap();
                let request = answer(stream, status, &body).await;
                sink.lock().unwrap().push(request);
            }
        });
        Self { addr, recorded }
    }

    fn repo(&self, auth: AuthContext) -> HttpRepository {
        let config = HttpConfig::new(&format!("http://{}", self.addr)).unwrap();
        HttpRepository::new(config, Arc::new(auth)).unwrap()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn answer(mut stream: TcpStream, status: u16, body: &str) -> Recorded {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let header = |name: &str| {
        head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    };
    let content_length = header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending body");
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let recorded = Recorded {
        method,
        url: Url::parse(&format!("http://stub{target}")).unwrap(),
        authorization: header("authorization"),
        body: String::from_utf8_lossy(&buf[header_end..header_end + content_length]).into_owned(),
    };

    let reply = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(reply.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
    recorded
}

#[tokio::test]
async fn list_sends_bracket_query_and_reads_wrapped_items() {
    let body = json!({
        "data": [{
            "id": 1,
            "documentId": "ex1",
            "attributes": {
                "idexam": "MAT",
                "nom": "Maths",
                "date": "2024-06-10T08:00:00.000Z",
                "poids": 30,
                "sessions": {"data": []}
            }
        }],
        "meta": {"pagination": {"page": 1, "pageSize": 10, "pageCount": 1, "total": 1}}
    });
    let stub = StubStore::start(vec![(200, body.to_string())]).await;
    let repo = stub.repo(AuthContext::anonymous().with_api_token("static-token"));

    let page = repo.list_exams(&ExamQuery::default()).await.unwrap();
    assert_eq!(page.exams.len(), 1);
    assert_eq!(page.exams[0].name(), "Maths");
    assert_eq!(page.pagination.total, 1);

    let requests = stub.requests();
    let request = &requests[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.url.path(), "/api/exams");
    assert_eq!(request.authorization.as_deref(), Some("Bearer static-token"));
    assert_eq!(request.query("sort[0]").as_deref(), Some("date:asc"));
    assert_eq!(request.query("pagination[withCount]").as_deref(), Some("true"));
    assert_eq!(
        request.query("populate[sessions][fields][0]").as_deref(),
        Some("documentId")
    );
}

#[tokio::test]
async fn invalid_owner_key_is_classified() {
    let body = json!({
        "data": null,
        "error": {"status": 400, "name": "ValidationError", "message": "Invalid key eleves", "details": {"key": "eleves"}}
    });
    let stub = StubStore::start(vec![(400, body.to_string())]).await;
    let repo = stub.repo(AuthContext::anonymous());

    let err = repo
        .list_exams(&ExamQuery::probe(RelationField::new("eleves"), 9))
        .await
        .unwrap_err();
    assert_eq!(err, StorageError::InvalidKey { key: "eleves".into() });

    let requests = stub.requests();
    assert_eq!(requests[0].authorization, None);
    assert_eq!(
        requests[0].query("filters[eleves][user][id][$eq]").as_deref(),
        Some("9")
    );
}

#[tokio::test]
async fn relation_updates_put_operator_payloads() {
    let stub = StubStore::start(vec![
        (200, json!({"data": {"id": 1, "documentId": "ex1"}}).to_string()),
        (400, json!({"error": {"status": 400, "name": "ValidationError", "message": "Invalid relation operation"}}).to_string()),
    ])
    .await;
    let repo = stub.repo(AuthContext::anonymous());
    let exam = DocumentId::new("ex1");
    let sessions = RelationField::new("sessions");
    let ids = vec![DocumentId::new("s1"), DocumentId::new("s2")];

    repo.update_relation(&exam, &sessions, &RelationOp::Connect(ids.clone()))
        .await
        .unwrap();
    let err = repo
        .update_relation(&exam, &sessions, &RelationOp::Set(ids))
        .await
        .unwrap_err();
    assert!(err.is_shape_rejection());

    let requests = stub.requests();
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].url.path(), "/api/exams/ex1");
    assert_eq!(
        requests[0].json(),
        json!({"data": {"sessions": {"connect": ["s1", "s2"]}}})
    );
    assert_eq!(requests[1].json(), json!({"data": {"sessions": ["s1", "s2"]}}));
}

#[tokio::test]
async fn session_create_and_delete_round_trip() {
    let start = Utc.with_ymd_and_hms(2024, 6, 6, 16, 0, 0).unwrap();
    let created = json!({
        "data": {
            "id": 5,
            "documentId": "s5",
            "idsession": 123_456_780,
            "date_debut": "2024-06-06T16:00:00.000Z",
            "date_fin": "2024-06-06T17:00:00.000Z",
            "avancement": 0,
            "commentaire": "Auto-generated revision session for Maths"
        }
    });
    let stub = StubStore::start(vec![(201, created.to_string()), (204, String::new())]).await;
    let repo = stub.repo(AuthContext::anonymous());

    let session = repo
        .create_session(&NewSession {
            tag: SessionTag::new(123_456_780),
            start,
            end: start + Duration::minutes(60),
            progress: 0,
            comment: "Auto-generated revision session for Maths".into(),
        })
        .await
        .unwrap();
    assert_eq!(session.document_id().as_str(), "s5");
    assert_eq!(session.start(), start);

    repo.delete_session(session.document_id()).await.unwrap();

    let requests = stub.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].url.path(), "/api/sessions");
    let sent = requests[0].json();
    assert_eq!(sent["data"]["idsession"], json!(123_456_780));
    assert_eq!(sent["data"]["avancement"], json!(0));
    assert_eq!(requests[1].method, "DELETE");
    assert_eq!(requests[1].url.path(), "/api/sessions/s5");
}
