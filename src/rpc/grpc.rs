//! Transport plumbing for the plugin service, written out by hand in the same shape `tonic`'s
//! code generator emits for a two-method service. Keeping this in plain source means the crate
//! builds without `protoc` while staying wire compatible with clients generated from the
//! equivalent proto definition (`package api; service PluginService`).

/// Server side: implement [`plugin_service_server::PluginService`] and mount a
/// [`plugin_service_server::PluginServiceServer`] on a tonic router.
pub mod plugin_service_server {
    use std::sync::Arc;
    use tonic::codegen::{empty_body, http, Body, BoxFuture, Context, Poll, Service, StdError};

    use crate::rpc::{ClientEventMessage, Empty, PluginEventMessage, PluginInstances};

    #[tonic::async_trait]
    pub trait PluginService: Send + Sync + 'static {
        /// Server streaming response type for the EventStream method.
        type EventStreamStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<PluginEventMessage, tonic::Status>,
            > + Send
            + 'static;

        /// The bidirectional event stream between one client and one plugin instance.
        async fn event_stream(
            &self,
            request: tonic::Request<tonic::Streaming<ClientEventMessage>>,
        ) -> std::result::Result<tonic::Response<Self::EventStreamStream>, tonic::Status>;

        /// List all live plugin instances.
        async fn get_plugin_instances(
            &self,
            request: tonic::Request<Empty>,
        ) -> std::result::Result<tonic::Response<PluginInstances>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct PluginServiceServer<T> {
        inner: Arc<T>,
    }

    impl<T> PluginServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T> Clone for PluginServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T, B> Service<http::Request<B>> for PluginServiceServer<T>
    where
        T: PluginService,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = Arc::clone(&self.inner);
            match req.uri().path() {
                "/api.PluginService/EventStream" => {
                    struct EventStreamSvc<T>(Arc<T>);
                    impl<T: PluginService> tonic::server::StreamingService<ClientEventMessage>
                        for EventStreamSvc<T>
                    {
                        type Response = PluginEventMessage;
                        type ResponseStream = T::EventStreamStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<ClientEventMessage>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { inner.event_stream(request).await })
                        }
                    }

                    Box::pin(async move {
                        let method = EventStreamSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.streaming(method, req).await)
                    })
                }
                "/api.PluginService/GetPluginInstances" => {
                    struct GetPluginInstancesSvc<T>(Arc<T>);
                    impl<T: PluginService> tonic::server::UnaryService<Empty> for GetPluginInstancesSvc<T> {
                        type Response = PluginInstances;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(&mut self, request: tonic::Request<Empty>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { inner.get_plugin_instances(request).await })
                        }
                    }

                    Box::pin(async move {
                        let method = GetPluginInstancesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(method, req).await)
                    })
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(empty_body())
                        .unwrap())
                }),
            }
        }
    }

    impl<T: PluginService> tonic::server::NamedService for PluginServiceServer<T> {
        const NAME: &'static str = "api.PluginService";
    }
}

/// Client side, used by the integration tests and by Rust tooling that wants to talk to a hosted
/// plugin without generating its own stubs.
pub mod plugin_service_client {
    use tonic::codegen::{http, Body, Bytes, GrpcMethod, StdError};

    use crate::rpc::{ClientEventMessage, Empty, PluginEventMessage, PluginInstances};

    #[derive(Debug, Clone)]
    pub struct PluginServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl PluginServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> PluginServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self {
                inner: tonic::client::Grpc::new(inner),
            }
        }

        pub async fn event_stream(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = ClientEventMessage>,
        ) -> std::result::Result<
            tonic::Response<tonic::Streaming<PluginEventMessage>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/api.PluginService/EventStream");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("api.PluginService", "EventStream"));
            self.inner.streaming(req, path, codec).await
        }

        pub async fn get_plugin_instances(
            &mut self,
            request: impl tonic::IntoRequest<Empty>,
        ) -> std::result::Result<tonic::Response<PluginInstances>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/api.PluginService/GetPluginInstances");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("api.PluginService", "GetPluginInstances"));
            self.inner.unary(req, path, codec).await
        }
    }
}
