//! Error handling in `coord-server`: wraps the engine's own [`coord_core::Error`]
//! plus the concerns specific to hosting it -- config/plan/mask loading and
//! the gRPC transport.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read {path:?}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path:?}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON in {path:?}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Engine(#[from] coord_core::Error),

    #[error("failed to build Kubernetes client: {0}")]
    KubeClient(#[from] kube::Error),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}
