//! 后端 HTTP 服务模块
//!
//! 该模块把集群后端接口暴露为 HTTP 接口，供 Operator 远程调用：
//!
//! | 方法 | 路径 | 操作 |
//! |---|---|---|
//! | POST | `/` | 创建集群（请求体为完整 KindCluster 文档） |
//! | GET | `/{name}` | 就绪检查，返回 JSON 布尔值 |
//! | GET | `/{name}/kubeconfig` | 获取 kubeconfig，返回 JSON 字符串 |
//! | DELETE | `/{name}` | 删除集群 |
//!
//! 集群不存在时返回 404 并带上 `x-capk-cluster-not-found` 响应头，
//! 未知路由的 404 不带该头；其他后端错误返回 500。

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use capk_common::{BackendError, ClusterBackend, KindCluster, KindConfig, CLUSTER_NOT_FOUND_HEADER};

/// 后端 HTTP 服务
pub struct BackendServer {
    /// 实际持有集群的后端
    backend: Arc<dyn ClusterBackend>,
}

impl BackendServer {
    /// 创建新的后端服务
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self { backend }
    }

    /// 绑定监听地址，返回实际地址与服务运行的 future
    ///
    /// `shutdown` 完成后服务器停止接收新连接，并等待进行中的请求结束。
    pub fn bind<F>(
        &self,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<(SocketAddr, BoxFuture<'static, Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let backend = self.backend.clone();
        let make_svc = make_service_fn(move |_| {
            let backend = backend.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let backend = backend.clone();
                    async move { Ok::<_, Infallible>(route(backend, req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .with_context(|| format!("无法监听 {}", addr))?
            .serve(make_svc);
        let local_addr = server.local_addr();

        info!("后端服务器启动在 {}", local_addr);

        let serve = async move {
            server
                .with_graceful_shutdown(shutdown)
                .await
                .context("后端服务器错误")
        }
        .boxed();

        Ok((local_addr, serve))
    }
}

/// 分发单个请求
pub async fn route(backend: Arc<dyn ClusterBackend>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    debug!("{} {}", method, path);

    match (&method, segments.as_slice()) {
        (&Method::GET, ["healthz"]) => text_response(StatusCode::OK, "ok"),
        (&Method::POST, []) => handle_create(backend, req).await,
        (&Method::GET, [name]) => match backend.is_ready(name).await {
            Ok(ready) => json_response(StatusCode::OK, &ready),
            Err(e) => error_response(e, "检查集群状态失败"),
        },
        (&Method::GET, [name, "kubeconfig"]) => match backend.kubeconfig(name).await {
            Ok(kubeconfig) => json_response(StatusCode::OK, &kubeconfig),
            Err(e) => error_response(e, "获取 kubeconfig 失败"),
        },
        (&Method::DELETE, [name]) => match backend.delete(name).await {
            Ok(()) => empty_response(StatusCode::OK),
            Err(e) => error_response(e, "删除集群失败"),
        },
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// 处理创建请求
async fn handle_create(backend: Arc<dyn ClusterBackend>, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            error!("读取请求体失败: {}", e);
            return text_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let cluster: KindCluster = match serde_json::from_slice(&body) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!("解析请求失败: {}", e);
            return text_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let config = KindConfig::from_spec(&cluster.spec);
    match backend.create(&cluster, &config).await {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => error_response(e, "创建 kind 集群失败"),
    }
}

fn error_response(err: BackendError, context: &str) -> Response<Body> {
    error!("{}: {}", context, err);
    match err {
        BackendError::NotFound(_) => {
            let mut response = text_response(StatusCode::NOT_FOUND, &err.to_string());
            response
                .headers_mut()
                .insert(CLUSTER_NOT_FOUND_HEADER, HeaderValue::from_static("true"));
            response
        }
        _ => text_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", Body::from(body)),
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    response(status, "text/plain; charset=utf-8", Body::from(text.to_string()))
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn response(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
