//! 后端客户端模块
//!
//! 通过 HTTP 调用 capk-backend 进程提供的集群后端接口。

use async_trait::async_trait;
use hyper::{
    body::Bytes,
    client::HttpConnector,
    header::{HeaderValue, CONTENT_TYPE},
    Body, Client, Method, Request, StatusCode,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use capk_common::{
    BackendError, BackendResult, ClusterBackend, KindCluster, KindConfig, CLUSTER_NOT_FOUND_HEADER,
};

/// 单次请求的超时时间
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// 基于 HTTP 的集群后端
pub struct HttpBackend {
    /// HTTP 客户端
    client: Client<HttpConnector>,
    /// 服务地址，例如 http://127.0.0.1:3000
    base_url: String,
    /// 请求超时
    timeout: Duration,
}

impl HttpBackend {
    /// 创建指向 `host:port` 的客户端
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("http://{}:{}", host, port),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// 设置请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 服务地址
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 发送请求并返回成功响应的响应体
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> BackendResult<Bytes> {
        let uri = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, uri);

        let mut builder = Request::builder().method(method).uri(&uri);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| BackendError::Request(format!("请求 {} 超时", uri)))?
            .map_err(|e| BackendError::Request(e.to_string()))?;

        // 只有服务端明确标记的 404 才表示集群不存在，地址或路由错误按状态码处理
        let status = response.status();
        if status == StatusCode::NOT_FOUND
            && response.headers().contains_key(CLUSTER_NOT_FOUND_HEADER)
        {
            return Err(BackendError::NotFound(path.trim_start_matches('/').to_string()));
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(BackendError::Status(status.as_u16()));
        }

        hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let body = self.send(Method::GET, path, None).await?;
        serde_json::from_slice(&body).map_err(|e| BackendError::Request(e.to_string()))
    }
}

#[async_trait]
impl ClusterBackend for HttpBackend {
    async fn create(&self, cluster: &KindCluster, _config: &KindConfig) -> BackendResult<()> {
        // 服务端根据完整资源自行生成 kind 配置
        let payload =
            serde_json::to_vec(cluster).map_err(|e| BackendError::Request(e.to_string()))?;
        self.send(Method::POST, "/", Some(payload)).await?;
        Ok(())
    }

    async fn is_ready(&self, name: &str) -> BackendResult<bool> {
        self.get_json(&format!("/{}", name)).await
    }

    async fn kubeconfig(&self, name: &str) -> BackendResult<String> {
        self.get_json(&format!("/{}/kubeconfig", name)).await
    }

    async fn delete(&self, name: &str) -> BackendResult<()> {
        self.send(Method::DELETE, &format!("/{}", name), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Response, Server};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    /// 启动一个按固定状态码应答的服务
    async fn serve_status(status: StatusCode, body: &'static str) -> SocketAddr {
        serve(status, body, false).await
    }

    async fn serve(status: StatusCode, body: &'static str, not_found_marker: bool) -> SocketAddr {
        let make_svc = make_service_fn(move |_| async move {
            Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| async move {
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                if not_found_marker {
                    response
                        .headers_mut()
                        .insert(CLUSTER_NOT_FOUND_HEADER, HeaderValue::from_static("true"));
                }
                Ok::<_, Infallible>(response)
            }))
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            HttpBackend::new("10.0.0.1", 3000).base_url(),
            "http://10.0.0.1:3000"
        );
    }

    #[tokio::test]
    async fn test_marked_not_found_maps_to_not_found() {
        let addr = serve(StatusCode::NOT_FOUND, "", true).await;
        let backend = HttpBackend::new("127.0.0.1", addr.port());

        let err = backend.delete("dev-alpha").await.unwrap_err();
        assert_eq!(err, BackendError::NotFound("dev-alpha".to_string()));
    }

    #[tokio::test]
    async fn test_unmarked_not_found_is_status() {
        // 地址指向了别的服务，或路由不存在
        let addr = serve_status(StatusCode::NOT_FOUND, "Not Found").await;
        let backend = HttpBackend::new("127.0.0.1", addr.port());

        assert_eq!(
            backend.delete("dev-alpha").await.unwrap_err(),
            BackendError::Status(404)
        );
    }

    #[tokio::test]
    async fn test_error_status_maps_to_status() {
        let addr = serve_status(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let backend = HttpBackend::new("127.0.0.1", addr.port());

        assert_eq!(
            backend.is_ready("dev-alpha").await.unwrap_err(),
            BackendError::Status(500)
        );
        assert_eq!(
            backend.kubeconfig("dev-alpha").await.unwrap_err(),
            BackendError::Status(500)
        );
    }

    #[tokio::test]
    async fn test_decodes_json_bodies() {
        let addr = serve_status(StatusCode::OK, "true").await;
        let backend = HttpBackend::new("127.0.0.1", addr.port());
        assert!(backend.is_ready("dev-alpha").await.unwrap());

        let addr = serve_status(StatusCode::OK, "not json").await;
        let backend = HttpBackend::new("127.0.0.1", addr.port());
        assert!(matches!(
            backend.is_ready("dev-alpha").await,
            Err(BackendError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_request_error() {
        // 先绑定再释放，得到一个没有监听者的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = HttpBackend::new("127.0.0.1", port).with_timeout(Duration::from_secs(5));
        assert!(matches!(
            backend.delete("dev-alpha").await,
            Err(BackendError::Request(_))
        ));
    }
}
