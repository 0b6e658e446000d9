//! Remote service adapter against a local stand-in for the IEDB tools API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mhcpred_common::{RemoteServiceOptions, RetryPolicy};
use mhcpred_core::{ExecutionOptions, IedbMethod, MhcPredError, Predictor, RemoteServiceAdapter};
use pretty_assertions::assert_eq;

/// How the stand-in answers the n-th request.
#[derive(Clone, Copy)]
enum Reply {
    Unavailable,
    TooManyRequests,
    BadGateway,
    Table,
    Html,
    ServerError,
}

struct Request {
    path: String,
    form: Vec<(String, String)>,
}

async fn read_request(stream: &mut TcpStream) -> anyhow::Result<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let form = url::form_urlencoded::parse(&buf[header_end..header_end + length])
        .into_owned()
        .collect();
    Ok(Request { path, form })
}

/// IEDB-style table echoing the requested peptides; IC50 grows with position.
fn iedb_table(form: &[(String, String)]) -> String {
    let field = |name: &str| {
        form.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    let allele = field("allele");
    let mut table = String::from("allele\tseq_num\tstart\tend\tlength\tpeptide\tic50\tpercentile_rank\n");
    for (i, peptide) in field("sequence_text").lines().enumerate() {
        table.push_str(&format!(
            "{}\t{}\t1\t{}\t{}\t{}\t{:.1}\t{:.2}\n",
            allele,
            i + 1,
            peptide.len(),
            peptide.len(),
            peptide,
            25.0 * (i + 1) as f64,
            0.1 * (i + 1) as f64
        ));
    }
    table
}

async fn respond(stream: &mut TcpStream, reply: Reply, request: &Request) -> anyhow::Result<()> {
    let (status, extra, body) = match reply {
        Reply::Unavailable => ("503 Service Unavailable", "Retry-After: 0\r\n", "busy\n".to_string()),
        Reply::TooManyRequests => (
            "429 Too Many Requests",
            "Retry-After: Wed, 21 Oct 2015 07:28:00 GMT\r\n",
            "slow down\n".to_string(),
        ),
        Reply::BadGateway => ("502 Bad Gateway", "", "upstream down\n".to_string()),
        Reply::ServerError => ("500 Internal Server Error", "", "Traceback: method crashed\n".to_string()),
        Reply::Table => ("200 OK", "", iedb_table(&request.form)),
        Reply::Html => (
            "200 OK",
            "",
            format!("<html><body><h2>Results</h2><pre>{}</pre></body></html>", iedb_table(&request.form)),
        ),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
        status,
        body.len(),
        extra,
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Serves `script` in order, repeating the last reply. Returns the base URL
/// and a request counter.
async fn serve(script: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let reply = script[n.min(script.len() - 1)];
            tokio::spawn(async move {
                if let Ok(request) = read_request(&mut stream).await {
                    assert_eq!(request.path, "/tools_api/mhci/");
                    let _ = respond(&mut stream, reply, &request).await;
                }
            });
        }
    });

    (format!("http://127.0.0.1:{}/tools_api/", addr.port()), hits)
}

fn predictor(base_url: String, max_attempts: u32) -> Predictor {
    let remote = RemoteServiceOptions {
        base_url,
        ..Default::default()
    };
    let adapter = RemoteServiceAdapter::new(IedbMethod::NetMhcPan, &remote).unwrap();
    let options = ExecutionOptions {
        concurrency: 1,
        timeout_secs: 5,
        retry: RetryPolicy {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
        },
        ..Default::default()
    };
    Predictor::new(Arc::new(adapter), &["HLA-A0201"], options).unwrap()
}

#[tokio::test]
async fn test_transient_outage_is_retried() {
    let (url, hits) = serve(vec![Reply::Unavailable, Reply::Table]).await;
    let collection = predictor(url, 3).predict([("ova", "SIINFEKLAV")]).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(collection.len(), 2);
    let best = collection.index(0).unwrap();
    assert_eq!(best.peptide(), "SIINFEKLA");
    assert_eq!(best.offset(), 0);
    assert_eq!(best.affinity(), Some(25.0));
    assert_eq!(best.percentile_rank(), 0.1);
    assert_eq!(best.allele().as_str(), "HLA-A*02:01");
    assert_eq!(best.predictor(), "iedb-netmhcpan");
}

#[tokio::test]
async fn test_persistent_outage_gives_up() {
    let (url, hits) = serve(vec![Reply::Unavailable]).await;
    let err = predictor(url, 3).predict([("ova", "SIINFEKLAV")]).await.unwrap_err();

    assert!(matches!(err.root_cause(), MhcPredError::BackendUnavailable { .. }), "{err}");
    assert!(err.to_string().contains("gave up after 3 attempts"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rate_limit_with_past_date_retries_at_once() {
    let (url, hits) = serve(vec![Reply::TooManyRequests, Reply::Table]).await;
    let started = std::time::Instant::now();
    let collection = predictor(url, 3).predict([("ova", "SIINFEKLAV")]).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(collection.len(), 2);
    assert!(started.elapsed() < std::time::Duration::from_secs(3));
}

#[tokio::test]
async fn test_bad_gateway_is_retried() {
    let (url, hits) = serve(vec![Reply::BadGateway, Reply::Table]).await;
    let collection = predictor(url, 3).predict([("ova", "SIINFEKLAV")]).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(collection.len(), 2);

    let (url, hits) = serve(vec![Reply::BadGateway]).await;
    let err = predictor(url, 2).predict([("ova", "SIINFEKLAV")]).await.unwrap_err();
    assert!(matches!(err.root_cause(), MhcPredError::BackendUnavailable { .. }), "{err}");
    assert!(err.to_string().contains("502"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let (url, hits) = serve(vec![Reply::ServerError, Reply::Table]).await;
    let err = predictor(url, 3).predict([("ova", "SIINFEKLAV")]).await.unwrap_err();

    match err.root_cause() {
        MhcPredError::BackendExecutionFailed { diagnostic, .. } => assert!(diagnostic.contains("Traceback")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_html_response_is_unwrapped() {
    let (url, _) = serve(vec![Reply::Html]).await;
    let collection = predictor(url, 1).predict_peptides(&["SIINFEKL", "GILGFVFTL"]).await.unwrap();
    // One batch per length, so both peptides score as the first row of their
    // table and tie; the sequence id breaks the tie.
    assert_eq!(collection.len(), 2);
    let peptides: Vec<&str> = collection.iter().map(|r| r.peptide()).collect();
    assert_eq!(peptides, vec!["GILGFVFTL", "SIINFEKL"]);
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = predictor(format!("http://127.0.0.1:{}/tools_api/", port), 2)
        .predict([("ova", "SIINFEKLAV")])
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), MhcPredError::BackendUnavailable { .. }), "{err}");
}
