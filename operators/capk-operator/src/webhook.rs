//! 准入校验模块
//!
//! KindCluster 的 spec 在创建后不可修改。该模块实现校验逻辑，并通过
//! HTTPS 接收 API server 发来的 AdmissionReview。未配置证书时以明文
//! HTTP 提供服务，此时需要由前置代理终止 TLS。

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::Http,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use std::convert::Infallible;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use capk_common::{Error, KindCluster, KindClusterSpec};

/// 校验接口路径
pub const VALIDATE_PATH: &str = "/validate-infrastructure-cluster-x-k8s-io-v1alpha4-kindcluster";

/// 检查更新是否修改了不可变字段，返回第一个被修改的字段
pub fn validate_update(old: &KindClusterSpec, new: &KindClusterSpec) -> capk_common::Result<()> {
    if old.replicas != new.replicas {
        return Err(Error::SpecImmutable("replicas"));
    }
    if old.image != new.image {
        return Err(Error::SpecImmutable("image"));
    }
    if old.version != new.version {
        return Err(Error::SpecImmutable("version"));
    }
    if old.feature_gates != new.feature_gates {
        return Err(Error::SpecImmutable("featureGates"));
    }
    if old.runtime_config != new.runtime_config {
        return Err(Error::SpecImmutable("runtimeConfig"));
    }
    Ok(())
}

/// 处理单个准入请求
pub fn review(request: &AdmissionRequest<KindCluster>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    if !matches!(request.operation, Operation::Update) {
        return response;
    }

    let (Some(old), Some(new)) = (&request.old_object, &request.object) else {
        warn!("更新请求 {} 缺少新旧对象，放行", request.uid);
        return response;
    };

    match validate_update(&old.spec, &new.spec) {
        Ok(()) => response,
        Err(e) => {
            info!("拒绝对 KindCluster {} 的更新: {}", request.name, e);
            response.deny(e.to_string())
        }
    }
}

/// 准入校验 HTTP 服务
pub struct WebhookServer;

impl WebhookServer {
    /// 绑定监听地址，返回实际地址与服务运行的 future
    pub fn bind<F>(addr: SocketAddr, shutdown: F) -> Result<(SocketAddr, BoxFuture<'static, Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let make_svc = make_service_fn(|_| async {
            Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
                Ok::<_, Infallible>(handle(req).await)
            }))
        });

        let server = Server::try_bind(&addr)
            .with_context(|| format!("无法监听 {}", addr))?
            .serve(make_svc);
        let local_addr = server.local_addr();

        info!("准入校验服务器启动在 {}", local_addr);

        let serve = async move {
            server
                .with_graceful_shutdown(shutdown)
                .await
                .context("准入校验服务器错误")
        }
        .boxed();

        Ok((local_addr, serve))
    }

    /// 以 HTTPS 绑定监听地址，返回实际地址与服务运行的 future
    pub fn bind_tls<F>(
        addr: SocketAddr,
        tls_config: ServerConfig,
        shutdown: F,
    ) -> Result<(SocketAddr, BoxFuture<'static, Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("无法监听 {}", addr))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        info!("准入校验服务器 (TLS) 启动在 {}", local_addr);

        let serve = async move {
            tokio::pin!(shutdown);
            loop {
                let (stream, peer) = tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("接受连接失败: {}", e);
                            continue;
                        }
                    },
                };

                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!("与 {} 的 TLS 握手失败: {}", peer, e);
                            return;
                        }
                    };
                    let service = service_fn(|req: Request<Body>| async move {
                        Ok::<_, Infallible>(handle(req).await)
                    });
                    if let Err(e) = Http::new().serve_connection(stream, service).await {
                        debug!("与 {} 的连接异常结束: {}", peer, e);
                    }
                });
            }
            Ok(())
        }
        .boxed();

        Ok((local_addr, serve))
    }
}

/// 从 PEM 文件加载服务端证书与私钥
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    let certs: Vec<Certificate> = read_pem(cert_path)?
        .into_iter()
        .filter_map(|item| match item {
            rustls_pemfile::Item::X509Certificate(der) => Some(Certificate(der)),
            _ => None,
        })
        .collect();
    if certs.is_empty() {
        return Err(anyhow::anyhow!("{} 中没有证书", cert_path.display()));
    }

    let key = read_pem(key_path)?
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::PKCS8Key(der)
            | rustls_pemfile::Item::RSAKey(der)
            | rustls_pemfile::Item::ECKey(der) => Some(PrivateKey(der)),
            _ => None,
        })
        .ok_or_else(|| anyhow::anyhow!("{} 中没有私钥", key_path.display()))?;

    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("证书与私钥不匹配")
}

fn read_pem(path: &Path) -> Result<Vec<rustls_pemfile::Item>> {
    let file = File::open(path).with_context(|| format!("无法打开 {}", path.display()))?;
    rustls_pemfile::read_all(&mut BufReader::new(file))
        .with_context(|| format!("无法解析 PEM 文件 {}", path.display()))
}

/// 分发单个 HTTP 请求
pub async fn handle(req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "ok"),
        (&Method::POST, VALIDATE_PATH) => handle_review(req).await,
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn handle_review(req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let admission_review: AdmissionReview<KindCluster> = match serde_json::from_slice(&body) {
        Ok(admission_review) => admission_review,
        Err(e) => {
            error!("解析 AdmissionReview 失败: {}", e);
            return text_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let request: AdmissionRequest<KindCluster> = match admission_review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!("AdmissionReview 缺少请求: {}", e);
            return text_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    debug!("校验 {:?} {}/{}", request.operation, request.namespace.as_deref().unwrap_or(""), request.name);

    match serde_json::to_vec(&review(&request).into_review()) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::io::Write;

    fn spec() -> KindClusterSpec {
        KindClusterSpec {
            replicas: 3,
            feature_gates: BTreeMap::from([("EphemeralContainers".to_string(), true)]),
            ..Default::default()
        }
    }

    fn object(spec: &KindClusterSpec) -> Value {
        json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1alpha4",
            "kind": "KindCluster",
            "metadata": { "name": "alpha", "namespace": "dev" },
            "spec": spec,
        })
    }

    fn review_body(operation: &str, old: Option<Value>, new: Option<Value>) -> Vec<u8> {
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1alpha4", "kind": "KindCluster" },
                "resource": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1alpha4", "resource": "kindclusters" },
                "name": "alpha",
                "namespace": "dev",
                "operation": operation,
                "userInfo": { "username": "admin" },
                "object": new,
                "oldObject": old,
                "dryRun": false,
            }
        });
        serde_json::to_vec(&review).unwrap()
    }

    async fn post_review(body: Vec<u8>) -> (StatusCode, Value) {
        let mut req = Request::new(Body::from(body));
        *req.method_mut() = Method::POST;
        *req.uri_mut() = VALIDATE_PATH.parse().unwrap();

        let response = handle(req).await;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_validate_update_reports_first_changed_field() {
        let old = spec();
        assert!(validate_update(&old, &old.clone()).is_ok());

        let mut new = old.clone();
        new.image = "registry.local/node".to_string();
        new.version = "v1.24.0".to_string();
        assert!(matches!(
            validate_update(&old, &new),
            Err(Error::SpecImmutable("image"))
        ));

        let mut new = old.clone();
        new.replicas = 1;
        new.runtime_config.insert("api/alpha".to_string(), "false".to_string());
        assert!(matches!(
            validate_update(&old, &new),
            Err(Error::SpecImmutable("replicas"))
        ));

        let mut new = old.clone();
        new.version = "v1.24.0".to_string();
        assert!(matches!(
            validate_update(&old, &new),
            Err(Error::SpecImmutable("version"))
        ));

        let mut new = old.clone();
        new.feature_gates.insert("EphemeralContainers".to_string(), false);
        assert!(matches!(
            validate_update(&old, &new),
            Err(Error::SpecImmutable("featureGates"))
        ));

        let mut new = old.clone();
        new.runtime_config.insert("api/alpha".to_string(), "false".to_string());
        assert!(matches!(
            validate_update(&old, &new),
            Err(Error::SpecImmutable("runtimeConfig"))
        ));
    }

    #[test]
    fn test_control_plane_endpoint_is_mutable() {
        let old = spec();
        let mut new = old.clone();
        new.control_plane_endpoint.host = "127.0.0.1".to_string();
        new.control_plane_endpoint.port = 43127;
        assert!(validate_update(&old, &new).is_ok());
    }

    #[tokio::test]
    async fn test_update_of_immutable_field_is_denied() {
        let old = spec();
        let mut new = old.clone();
        new.replicas = 5;

        let (status, review) =
            post_review(review_body("UPDATE", Some(object(&old)), Some(object(&new)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(review["response"]["allowed"], false);
        assert!(review.to_string().contains("replicas"));
    }

    #[tokio::test]
    async fn test_unchanged_update_is_allowed() {
        let old = spec();
        let (_, review) =
            post_review(review_body("UPDATE", Some(object(&old)), Some(object(&old)))).await;
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_create_and_delete_are_allowed() {
        let (_, review) = post_review(review_body("CREATE", None, Some(object(&spec())))).await;
        assert_eq!(review["response"]["allowed"], true);

        let (_, review) = post_review(review_body("DELETE", Some(object(&spec())), None)).await;
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_malformed_review_is_bad_request() {
        let (status, _) = post_review(b"{\"kind\": 1".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn write_pem(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_tls_server_from_pem_files() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = write_pem(&cert.serialize_pem().unwrap());
        let key_file = write_pem(&cert.serialize_private_key_pem());

        let tls_config = load_tls_config(cert_file.path(), key_file.path()).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (addr, serve) = WebhookServer::bind_tls(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            tls_config,
            async {
                let _ = rx.await;
            },
        )
        .unwrap();
        assert_ne!(addr.port(), 0);

        let handle = tokio::spawn(serve);
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_tls_config_requires_certificate_and_key() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = write_pem(&cert.serialize_pem().unwrap());
        let key_file = write_pem(&cert.serialize_private_key_pem());
        let empty = write_pem("");

        assert!(load_tls_config(empty.path(), key_file.path()).is_err());
        assert!(load_tls_config(cert_file.path(), empty.path()).is_err());
        assert!(load_tls_config(cert_file.path(), Path::new("/nonexistent/tls.key")).is_err());
    }

    #[tokio::test]
    async fn test_healthz_and_unknown_paths() {
        let response = handle(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut req = Request::new(Body::empty());
        *req.uri_mut() = "/healthz".parse().unwrap();
        assert_eq!(handle(req).await.status(), StatusCode::OK);
    }
}
